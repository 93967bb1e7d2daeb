//! `sandbox-host`: the runnable binary wrapping [`rpy_sandbox_host`] (§10.1
//! "Process model and CLI"). Analogous to the original `interact.py` entry
//! point: spawn the child with piped, cleared-environment stdio, run one
//! session against it, and report its exit code.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use clap::Parser;
use tokio::process::{Child, Command};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rpy_sandbox_host::config::{self, SandboxConfig, StdoutMode};
use rpy_sandbox_host::dump::{check_dump, PROTOCOL_VERSION};
use rpy_sandbox_host::session::SessionConfig;
use rpy_sandbox_host::{ConfigError, Session, SessionError};

/// Everything that can keep this binary from completing a session: a
/// session-fatal protocol violation, an eager configuration mistake, or
/// plain process/file I/O failure. The library keeps these three tiers
/// distinct (§7); the binary only needs to print whichever one occurred.
#[derive(Debug, thiserror::Error)]
enum HostError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("dump check failed")]
    DumpCheckFailed,
}

/// Host-side process for running a sandboxed subprocess whose OS calls are
/// emulated over its stdio pipes (§10.1).
#[derive(Parser)]
#[command(name = "sandbox-host", version, about)]
struct Cli {
    /// The sandboxed executable to run.
    executable: PathBuf,

    /// Arguments passed to the sandboxed executable.
    args: Vec<String>,

    /// Bind a real directory as the virtual `/tmp` (read-only).
    #[arg(long)]
    tmp: Option<PathBuf>,

    /// Bind a real directory as a virtual interpreter bootstrap path
    /// (paired with `_pypy_init_home`).
    #[arg(long = "lib-path")]
    lib_path: Option<PathBuf>,

    /// Disable ANSI coloring of captured output.
    #[arg(long)]
    nocolor: bool,

    /// Disable sanitization of stdout/stderr (binary-safe mode).
    #[arg(long = "raw-stdout")]
    raw_stdout: bool,

    /// Enable the dump pre-flight check and per-errno stderr logging.
    #[arg(long)]
    debug: bool,

    /// Optional TOML file overlaying the scalar session options. CLI flags
    /// still take precedence over values loaded from this file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("*** {err} ***");
        std::process::exit(1);
    }
}

fn build_sandbox_config(cli: &Cli) -> Result<SandboxConfig, HostError> {
    // Eager, startup-time configuration validation (§7 bullet 3): a
    // hand-edited named-stub table with an errno/sentinel pairing that
    // doesn't match its declared return tag fails here, before the child
    // is ever spawned, rather than misbehaving on its first call.
    rpy_sandbox_host::layers::defaults::validate_named_stubs()?;

    let mut session_options = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)
                .map_err(|e| HostError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?
        }
        None => SessionConfig::default(),
    };
    session_options.debug = session_options.debug || cli.debug;

    let mut root_entries = Vec::new();
    if let Some(tmp) = &cli.tmp {
        root_entries.push(("tmp".to_string(), config::real_dir(tmp.clone(), false, false, vec![])));
    }
    if let Some(lib_path) = &cli.lib_path {
        root_entries
            .push(("pypy".to_string(), config::real_dir(lib_path.clone(), false, false, vec![])));
    }
    let vfs_root = config::dir(root_entries);

    let mut sandbox = SandboxConfig::new(vfs_root);
    sandbox.session = session_options;
    sandbox.forward_stdin = true;
    sandbox.stdout = StdoutMode::Dump { color: !cli.nocolor, raw: cli.raw_stdout };
    if cli.lib_path.is_some() {
        sandbox.interpreter_home = Some("/pypy".to_string());
    }
    Ok(sandbox)
}

async fn run(cli: Cli) -> Result<(), HostError> {
    let sandbox = build_sandbox_config(&cli)?;

    if cli.debug {
        preflight_dump_check(&cli, &sandbox).await?;
    }

    let mut command = Command::new(&cli.executable);
    command
        .args(&cli.args)
        .env_clear()
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Its own process group, so a timed-out `close()` can kill the
        // whole group rather than just the immediate child (§5).
        command.process_group(0);
    }
    let mut child = command.spawn()?;

    info!(pid = ?child.id(), executable = %cli.executable.display(), "spawned sandboxed subprocess");

    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");

    let vfs_state = sandbox.vfs_state();
    let layers = sandbox.build_layers();
    let grace_period = Duration::from_millis(sandbox.session.close_grace_period_ms);
    let mut session = Session::new(stdout, stdin, vfs_state, sandbox.session.clone(), layers)?;

    let run_result = session.run().await;
    if let Err(err) = session.close().await {
        warn!(%err, "error closing session during shutdown");
    }
    // Drop the session's (and with it, the codec's) stdin/stdout handles
    // before waiting on the child, so the child's read side actually sees
    // EOF rather than staying open because this process still holds it.
    drop(session);

    let status = wait_with_grace_period(&mut child, grace_period).await?;
    report_exit(status);

    Ok(run_result?)
}

/// Waits for the child to exit on its own within `grace_period` (§4.6
/// `close()`, §5); past that, kills its process group and reaps it.
async fn wait_with_grace_period(
    child: &mut Child,
    grace_period: Duration,
) -> std::io::Result<ExitStatus> {
    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(?grace_period, "sandboxed subprocess did not exit after close, killing it");
            kill_child_group(child);
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn kill_child_group(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is the id of a process group this host created via
        // `process_group(0)`, and `libc::kill` with a negative pid signals
        // the whole group rather than a single process.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_child_group(child: &mut Child) {
    let _ = child.start_kill();
}

/// §10.6 "A `--debug` pre-flight dump check": spawn the child once with
/// the dump marker, validate it against the registry this session would
/// actually build, and refuse to start the real session on any mismatch.
async fn preflight_dump_check(cli: &Cli, sandbox: &SandboxConfig) -> Result<(), HostError> {
    let output = Command::new(&cli.executable)
        .args(&cli.args)
        .env_clear()
        .env("RPY_SANDBOX_DUMP", "1")
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .output()
        .await?;

    let dump = String::from_utf8_lossy(&output.stdout);
    let layers =
        sandbox.build_layers::<tokio::process::ChildStdout, tokio::process::ChildStdin>();
    let registry = rpy_sandbox_host::dispatch::Registry::build(layers)?;
    let permitted: Vec<&str> =
        sandbox.session.permitted_missing_funcs.iter().map(String::as_str).collect();
    let errors = check_dump(&dump, &registry, std::env::consts::OS, &permitted);

    if !errors.is_empty() {
        for err in &errors {
            eprintln!("*** {err}");
        }
        eprintln!("*** dump check failed (protocol version {PROTOCOL_VERSION}), refusing to start");
        return Err(HostError::DumpCheckFailed);
    }
    Ok(())
}

fn report_exit(status: ExitStatus) {
    match status.code() {
        Some(0) => {}
        Some(code) => {
            println!("*** sandboxed subprocess finished with exit code {code} ***");
        }
        None => {
            warn!("sandboxed subprocess was terminated by a signal");
        }
    }
}
