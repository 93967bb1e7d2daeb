//! The defaults layer (§4.3 "Defaults layer").
//!
//! Sits at the bottom of every layer stack: it answers the identity/time/
//! environment family of syscalls directly from [`crate::session::SessionConfig`],
//! and provides named stubs for calls this core never emulates (identity
//! changes, tty control, and a handful the sandboxed runtime probes for
//! unconditionally — §10.6). Anything neither named here nor claimed by a
//! higher layer simply has no chain entry at all, which is a registry miss
//! (§4.2 "missing signature policy"), not a stub response.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errno::{host_strerror, Errno};
use crate::error::SessionError;
use crate::layer::{Delegate, ErrorStub, HandlerCtx, Layer};
use crate::wire::{failure_sentinel, Signature, Value};

/// Named ENOSYS/EPERM/ENOTTY stubs (§4.3 last bullet, §10.6). Identity
/// changes fail `EPERM` (the sandbox never lets the child change who it
/// is); tty probes fail `ENOTTY` (there is no real terminal behind the
/// child's stdio); everything else here is a baseline `ENOSYS`, named
/// individually per §10.6 rather than left to a generic catch-all.
const NAMED_STUBS: &[(&str, Errno)] = &[
    ("uname(p)i", Errno::NoSys),
    ("gettimeofday(pp)i", Errno::NoSys),
    ("setuid(i)i", Errno::Perm),
    ("setgid(i)i", Errno::Perm),
    ("seteuid(i)i", Errno::Perm),
    ("setegid(i)i", Errno::Perm),
    ("setreuid(ii)i", Errno::Perm),
    ("setregid(ii)i", Errno::Perm),
    ("setresuid(iii)i", Errno::Perm),
    ("setresgid(iii)i", Errno::Perm),
    ("isatty(i)i", Errno::NotTy),
    ("ttyname(i)p", Errno::NotTy),
    ("tcgetattr(ip)i", Errno::NotTy),
    ("tcsetattr(iip)i", Errno::NotTy),
    ("ioctl(ipp)i", Errno::NotTy),
];

/// The defaults layer (§4.3). Caches up to 1000 distinct `strerror(n)`
/// results (§4.3: "cached, capped at 1000 distinct `n`"). The domain here
/// is the handful of errno values a child ever probes, so a plain
/// mutex-guarded map that simply stops growing past the cap is enough —
/// there is no staleness or memory-pressure concern an LRU/TTL policy
/// would be solving.
pub struct DefaultsLayer {
    strerror_cache: Mutex<HashMap<i32, std::sync::Arc<str>>>,
}

impl Default for DefaultsLayer {
    fn default() -> Self {
        DefaultsLayer { strerror_cache: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl<R, W> Layer<R, W> for DefaultsLayer
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn provides(&self) -> Vec<Signature> {
        let mut sigs = vec![
            Signature::parse("time(p)i").unwrap(),
            Signature::parse("get_environ()p").unwrap(),
            Signature::parse("getenv(p)p").unwrap(),
            Signature::parse("getcwd(pi)p").unwrap(),
            Signature::parse("strerror(i)p").unwrap(),
            Signature::parse("getuid()i").unwrap(),
            Signature::parse("getgid()i").unwrap(),
            Signature::parse("geteuid()i").unwrap(),
            Signature::parse("getegid()i").unwrap(),
            Signature::parse("getresuid(ppp)i").unwrap(),
            Signature::parse("getresgid(ppp)i").unwrap(),
            Signature::parse("getpid()i").unwrap(),
            Signature::parse("getppid()i").unwrap(),
        ];
        sigs.extend(NAMED_STUBS.iter().map(|(text, _)| Signature::parse(text).unwrap()));
        sigs
    }

    async fn call(
        &self,
        sig: &Signature,
        args: Vec<Value>,
        ctx: &mut HandlerCtx<'_, R, W>,
        _next: Delegate<'_, R, W>,
    ) -> Result<Value, SessionError> {
        if let Some((_, errno)) = NAMED_STUBS.iter().find(|(text, _)| *text == sig.text()) {
            ctx.fail(*errno);
            return Ok(failure_sentinel(sig.ret));
        }

        match sig.text().as_str() {
            "time(p)i" => {
                let elapsed = ctx.session_start.elapsed().as_secs() as i64;
                let now = if ctx.config.use_virtual_time {
                    ctx.config.virtual_time + elapsed
                } else {
                    ctx.config.virtual_time
                };
                if let Some(tloc) = args[0].as_ptr() {
                    if !tloc.is_null() {
                        ctx.codec.deliver(tloc, &now.to_ne_bytes()).await?;
                    }
                }
                Ok(Value::Int(now))
            }
            "get_environ()p" => {
                let addr = ctx.mint_pointer(vec![0u8; 8]).await?;
                Ok(Value::Ptr(addr))
            }
            "getenv(p)p" => Ok(Value::Ptr(crate::heap::VAddr::NULL)),
            "getcwd(pi)p" => {
                let buf = args[0].as_ptr().expect("getcwd buf is a pointer");
                let size = args[1].as_int().expect("getcwd size is an int") as usize;
                let mut bytes = ctx.config.virtual_cwd.clone().into_bytes();
                bytes.push(0);
                if bytes.len() > size {
                    ctx.fail(Errno::Range);
                    return Ok(Value::Ptr(crate::heap::VAddr::NULL));
                }
                ctx.codec.deliver(buf, &bytes).await?;
                Ok(Value::Ptr(buf))
            }
            "strerror(i)p" => {
                let n = args[0].as_int().expect("strerror n is an int") as i32;
                let message: std::sync::Arc<str> = {
                    let mut cache = self.strerror_cache.lock().expect("strerror cache poisoned");
                    if let Some(cached) = cache.get(&n) {
                        cached.clone()
                    } else {
                        let fresh: std::sync::Arc<str> = host_strerror(n).into();
                        if cache.len() < 1000 {
                            cache.insert(n, fresh.clone());
                        }
                        fresh
                    }
                };
                let mut bytes = message.as_bytes().to_vec();
                bytes.push(0);
                let addr = ctx.mint_pointer(bytes).await?;
                Ok(Value::Ptr(addr))
            }
            "getuid()i" => Ok(Value::Int(ctx.config.virtual_uid as i64)),
            "getgid()i" => Ok(Value::Int(ctx.config.virtual_gid as i64)),
            "geteuid()i" => Ok(Value::Int(ctx.config.virtual_uid as i64)),
            "getegid()i" => Ok(Value::Int(ctx.config.virtual_gid as i64)),
            "getresuid(ppp)i" => {
                let uid = (ctx.config.virtual_uid as i32).to_ne_bytes();
                for arg in &args {
                    if let Some(p) = arg.as_ptr() {
                        ctx.codec.deliver(p, &uid).await?;
                    }
                }
                Ok(Value::Int(0))
            }
            "getresgid(ppp)i" => {
                let gid = (ctx.config.virtual_gid as i32).to_ne_bytes();
                for arg in &args {
                    if let Some(p) = arg.as_ptr() {
                        ctx.codec.deliver(p, &gid).await?;
                    }
                }
                Ok(Value::Int(0))
            }
            "getpid()i" => Ok(Value::Int(ctx.config.virtual_pid as i64)),
            "getppid()i" => Ok(Value::Int(ctx.config.virtual_ppid as i64)),
            _ => unreachable!("provides() and call() must stay in sync for {sig}"),
        }
    }
}

/// Eagerly validates every entry of [`NAMED_STUBS`] as a well-formed
/// [`ErrorStub`] (§4.4, §7 bullet 3: configuration errors are "detected
/// eagerly at startup", before a session is ever opened). The runtime
/// `call()` path above matches on signature text directly rather than
/// allocating a stub per call, but this is the genuine config-time check
/// the signature DSL promises: a hand-edited `NAMED_STUBS` entry whose
/// errno/sentinel pairing doesn't match its declared return tag fails
/// here instead of silently misbehaving the first time the child calls it.
/// [`crate::config::SandboxConfig`]'s callers run this once before opening
/// any session.
pub fn validate_named_stubs() -> Result<(), crate::error::ConfigError> {
    for (text, errno) in NAMED_STUBS {
        let sig = Signature::parse(text).expect("NAMED_STUBS entries are well-formed signatures");
        ErrorStub::new(text, *errno, failure_sentinel(sig.ret))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn named_stub(text: &str) -> ErrorStub {
    let (_, errno) = NAMED_STUBS.iter().find(|(t, _)| *t == text).expect("known stub");
    let sig = Signature::parse(text).unwrap();
    ErrorStub::new(text, *errno, failure_sentinel(sig.ret)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::VirtualHeap;
    use crate::session::SessionConfig;
    use crate::vfs::{Node, VfsState};
    use crate::wire::Codec;
    use std::collections::BTreeMap;

    type Stream = tokio::io::DuplexStream;

    fn ctx_parts() -> (VirtualHeap, Option<Errno>, VfsState, SessionConfig, Vec<u8>) {
        let heap = VirtualHeap::new();
        let errno = None;
        let vfs = VfsState::new(Node::dir(BTreeMap::new()), 3..49, 32);
        let config = SessionConfig::default();
        (heap, errno, vfs, config, Vec::new())
    }

    #[tokio::test]
    async fn getpid_returns_configured_value() {
        let (mut heap, mut errno, mut vfs, mut config, mut output) = ctx_parts();
        config.virtual_pid = 42;
        let (client, server) = tokio::io::duplex(64);
        let mut codec = Codec::new(client, server);
        let mut ctx = HandlerCtx {
            heap: &mut heap,
            errno: &mut errno,
            vfs: &mut vfs,
            config: &config,
            codec: &mut codec,
            captured_output: &mut output,
            session_start: std::time::Instant::now(),
        };
        let layer = DefaultsLayer::default();
        let sig = Signature::parse("getpid()i").unwrap();
        let chain: Vec<std::sync::Arc<dyn Layer<Stream, Stream>>> =
            vec![std::sync::Arc::new(DefaultsLayer::default())];
        let delegate = Delegate::new(&chain, 1);
        let result = layer.call(&sig, vec![], &mut ctx, delegate).await.unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn named_stub_matches_declared_errno() {
        let stub = named_stub("setuid(i)i");
        assert_eq!(stub.errno, Errno::Perm);
    }

    #[test]
    fn all_named_stubs_pass_eager_validation() {
        validate_named_stubs().unwrap();
    }

    #[test]
    fn mismatched_sentinel_is_a_config_error() {
        let err = ErrorStub::new("setuid(i)i", Errno::Perm, Value::Ptr(crate::heap::VAddr::NULL))
            .unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::StubReturnTypeMismatch { .. }));
    }
}
