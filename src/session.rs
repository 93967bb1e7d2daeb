//! Session configuration and the main dispatch loop (§4.2, §10.4).

use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::dispatch::Registry;
use crate::error::SessionError;
use crate::heap::VirtualHeap;
use crate::layer::{HandlerCtx, Layer};
use crate::vfs::VfsState;

/// The scalar knobs of §6's "VFS construction surface" and §10.4's
/// `SessionOptions` (the `vfs_root` node tree itself is built separately
/// via [`crate::config`], since it is not TOML-representable).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub virtual_cwd: String,
    pub virtual_time: i64,
    pub use_virtual_time: bool,
    pub virtual_uid: u32,
    pub virtual_gid: u32,
    pub virtual_pid: i32,
    pub virtual_ppid: i32,
    pub virtual_fd_range: (i32, i32),
    pub max_open_dirs: usize,
    pub output_buffer_cap: usize,
    pub debug: bool,
    pub permitted_missing_funcs: Vec<String>,
    /// How long [`Session::close`]'s caller should give the child to exit
    /// on its own, after its stdin has been closed, before forcibly
    /// killing it (§4.6 `close()`, §5 "a supervising layer may enforce a
    /// wall-clock timeout on `close()`").
    pub close_grace_period_ms: u64,
}

impl SessionConfig {
    pub fn virtual_fd_range(&self) -> Range<i32> {
        self.virtual_fd_range.0..self.virtual_fd_range.1
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            virtual_cwd: "/".to_string(),
            virtual_time: 0,
            use_virtual_time: false,
            virtual_uid: 1000,
            virtual_gid: 1000,
            virtual_pid: 1,
            virtual_ppid: 0,
            virtual_fd_range: (3, 49),
            max_open_dirs: 32,
            output_buffer_cap: 1024 * 1024,
            debug: false,
            permitted_missing_funcs: Vec::new(),
            close_grace_period_ms: 2000,
        }
    }
}

/// Ties the wire codec, virtual heap, VFS state, and handler registry
/// together into one request/reply loop (§4.2 "Main loop").
pub struct Session<R, W> {
    codec: crate::wire::Codec<R, W>,
    heap: VirtualHeap,
    errno: Option<crate::errno::Errno>,
    vfs: VfsState,
    config: SessionConfig,
    registry: Registry<R, W>,
    captured_output: Vec<u8>,
    session_start: Instant,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        reader: R,
        writer: W,
        vfs: VfsState,
        config: SessionConfig,
        layers: Vec<Arc<dyn Layer<R, W>>>,
    ) -> Result<Self, crate::error::ConfigError> {
        let registry = Registry::build(layers)?;
        Ok(Session {
            codec: crate::wire::Codec::new(reader, writer),
            heap: VirtualHeap::new(),
            errno: None,
            vfs,
            config,
            registry,
            captured_output: Vec::new(),
            session_start: Instant::now(),
        })
    }

    /// The accumulated stdout/stderr capture buffer, available once the
    /// session has ended (the stdout-capture layer writes into it; the
    /// stdout-dump layer leaves it empty and writes straight through).
    pub fn captured_output(&self) -> &[u8] {
        &self.captured_output
    }

    /// Ends the session from the host side (§4.6 `close()`): flushes and
    /// shuts down the writer half, which the child observes as EOF on its
    /// own read side. Does not itself wait for the child to exit or kill
    /// it — this `Session` has no handle to the child process, only to its
    /// pipes — so the caller (the binary that spawned the child) is
    /// responsible for racing `child.wait()` against
    /// [`SessionConfig::close_grace_period_ms`] and forcibly terminating
    /// the child if it doesn't exit in time. Safe to call after `run()`
    /// returns either `Ok` or `Err`, and idempotent-ish in that a second
    /// shutdown of an already-shut-down writer just surfaces as an I/O
    /// error the caller may ignore.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.codec.shutdown_writer().await.map_err(SessionError::Wire)
    }

    /// Reads and services requests until the child closes its end of the
    /// pipe. Exactly one request is in flight at a time (§10.3): the next
    /// read never starts before the current reply has been fully written.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            let (sig, args) = match self.codec.read_request().await {
                Ok(pair) => pair,
                Err(crate::wire::WireError::Eof) => {
                    debug!("child closed its end of the pipe, ending session");
                    return Ok(());
                }
                Err(err) => return Err(SessionError::Wire(err)),
            };

            self.errno = None;
            let mut ctx = HandlerCtx {
                heap: &mut self.heap,
                errno: &mut self.errno,
                vfs: &mut self.vfs,
                config: &self.config,
                codec: &mut self.codec,
                captured_output: &mut self.captured_output,
                session_start: self.session_start,
            };

            let value = match self.registry.dispatch(&sig, args, &mut ctx).await {
                Some(Ok(value)) => value,
                Some(Err(err)) => return Err(err),
                None => {
                    warn!(signature = %sig.text(), "no handler registered for this signature");
                    return Err(SessionError::UnknownSignature(sig.text()));
                }
            };

            let errno = match self.errno.take() {
                Some(e) => {
                    if self.config.debug {
                        debug!(signature = %sig.text(), errno = %e, "emulated errno");
                    }
                    e.as_raw()
                }
                None => 0,
            };
            self.codec
                .write_reply(value, errno)
                .await
                .map_err(SessionError::Wire)?;
        }
    }
}
