//! The self-describing "dump" consistency check (§4.2 "Dump check", §6
//! "Dump format").
//!
//! Before opening a full session, the host may spawn the child with
//! `RPY_SANDBOX_DUMP=1` in its environment, causing it to print a
//! self-description and exit instead of running. The dump is a sequence of
//! `Key: Value` lines; [`check_dump`] validates it against what this
//! host actually supports.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::dispatch::Registry;

/// This host's supported protocol version (§4.2 "`Version: <n>` — must
/// equal the host's supported protocol version").
pub const PROTOCOL_VERSION: u32 = 1;

/// Normalizes a child-reported platform string the way §4.2 specifies:
/// "`linux2`/`linux3` normalized to `linux`".
fn normalize_platform(platform: &str) -> &str {
    match platform {
        "linux2" | "linux3" => "linux",
        other => other,
    }
}

/// Checks a dump's `Version`/`Platform`/`Funcs` lines against `registry`.
/// Unknown `Key:` lines are ignored (§9 "Open questions": the source is
/// ambiguous here; we specify "ignored").
///
/// `host_platform` is the running host's own platform identifier (e.g.
/// `std::env::consts::OS`, normalized the same way). Returns a list of
/// human-readable errors; empty means the dump is consistent.
pub fn check_dump<R, W>(
    dump: &str,
    registry: &Registry<R, W>,
    host_platform: &str,
    permitted_missing: &[&str],
) -> Vec<String>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut errors = Vec::new();
    let normalized_host = normalize_platform(host_platform);

    for line in dump.lines() {
        let Some((key, value)) = line.split_once(": ") else { continue };
        match key {
            "Version" => {
                if value != PROTOCOL_VERSION.to_string() {
                    errors.push(format!(
                        "Bad version number: expected {}, got {}",
                        PROTOCOL_VERSION, value
                    ));
                }
            }
            "Platform" => {
                let normalized_child = normalize_platform(value);
                if normalized_child != normalized_host {
                    errors.push(format!(
                        "Bad platform: expected {:?}, got {:?}",
                        normalized_host, value
                    ));
                }
            }
            "Funcs" => {
                for fname in value.split(' ').filter(|s| !s.is_empty()) {
                    let implemented = registry.implements_name(fname);
                    let permitted = permitted_missing.contains(&fname);
                    if !implemented && !permitted {
                        errors.push(format!(
                            "Sandboxed function signature not implemented: {}",
                            fname
                        ));
                    }
                }
            }
            _ => {} // unrecognized keys are ignored
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;
    use crate::layers::defaults::DefaultsLayer;
    use std::sync::Arc;

    type TestStream = tokio::io::DuplexStream;

    fn registry_with_write_and_stat() -> Registry<TestStream, TestStream> {
        let layers: Vec<Arc<dyn Layer<TestStream, TestStream>>> = vec![Arc::new(DefaultsLayer::default())];
        Registry::build(layers).unwrap()
    }

    #[test]
    fn good_dump_has_no_errors() {
        let dump = format!("Version: {}\nPlatform: linux\nFuncs: write stat64\n", PROTOCOL_VERSION);
        let errors = check_dump(&dump, &registry_with_write_and_stat(), "linux", &[]);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn unimplemented_func_is_named() {
        let dump = format!(
            "Version: {}\nPlatform: linux\nFuncs: write stat64 nonexistent_call\n",
            PROTOCOL_VERSION
        );
        let errors = check_dump(&dump, &registry_with_write_and_stat(), "linux", &[]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("nonexistent_call"));
    }

    #[test]
    fn normalizes_legacy_linux_platform_strings() {
        let dump = format!("Version: {}\nPlatform: linux2\n", PROTOCOL_VERSION);
        let errors = check_dump(&dump, &registry_with_write_and_stat(), "linux", &[]);
        assert!(errors.is_empty());
    }

    #[test]
    fn bad_version_is_reported() {
        let dump = "Version: 99\nPlatform: linux\n";
        let errors = check_dump(dump, &registry_with_write_and_stat(), "linux", &[]);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dump = format!("Version: {}\nPlatform: linux\nBuildId: deadbeef\n", PROTOCOL_VERSION);
        let errors = check_dump(&dump, &registry_with_write_and_stat(), "linux", &[]);
        assert!(errors.is_empty());
    }

    #[test]
    fn is_pure() {
        let dump = format!(
            "Version: {}\nPlatform: linux\nFuncs: nonexistent_call\n",
            PROTOCOL_VERSION
        );
        let registry = registry_with_write_and_stat();
        let first = check_dump(&dump, &registry, "linux", &[]);
        let second = check_dump(&dump, &registry, "linux", &[]);
        assert_eq!(first, second);
    }
}
