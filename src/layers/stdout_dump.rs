//! The stdout-dump layer (§4.3 "Stdout dump layer").
//!
//! Same `write(fd,buf,count)i` override as [`crate::layers::stdout_capture`],
//! but instead of buffering the bytes it writes sanitized copies straight
//! through to the host's own stdout/stderr, optionally wrapped in ANSI
//! color escapes (§10.6: green for stdout, red for stderr, matching the
//! original `interact.py` defaults; `--nocolor` disables this).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::SessionError;
use crate::layer::{Delegate, HandlerCtx, Layer};
use crate::wire::{Signature, Value};

const STDOUT_COLOR: &str = "32";
const STDERR_COLOR: &str = "31";

/// Replaces any byte outside `[0x20..0x7e] ∪ {0x0a}` with `?` (§4.3:
/// "decoding input as Latin-1 so the transform is total"). Every byte
/// value has a Latin-1 reading, so this never fails or loses alignment
/// the way a strict UTF-8 decode would on binary child output.
fn sanitize(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .map(|&b| if (0x20..=0x7e).contains(&b) || b == 0x0a { b } else { b'?' })
        .collect()
}

/// Writes sanitized (or, in `raw` mode, unmodified) child output straight
/// to the host's own stdout/stderr.
pub struct StdoutDumpLayer {
    color: bool,
    raw: bool,
    stdout: Mutex<tokio::io::Stdout>,
    stderr: Mutex<tokio::io::Stderr>,
}

impl StdoutDumpLayer {
    pub fn new(color: bool, raw: bool) -> Self {
        StdoutDumpLayer {
            color,
            raw,
            stdout: Mutex::new(tokio::io::stdout()),
            stderr: Mutex::new(tokio::io::stderr()),
        }
    }

    async fn emit(&self, fd: i64, bytes: &[u8]) -> std::io::Result<()> {
        let payload = if self.raw { bytes.to_vec() } else { sanitize(bytes) };
        let color = if fd == 1 { STDOUT_COLOR } else { STDERR_COLOR };
        if fd == 1 {
            let mut out = self.stdout.lock().await;
            if self.color {
                out.write_all(format!("\x1b[{color}m").as_bytes()).await?;
            }
            out.write_all(&payload).await?;
            if self.color {
                out.write_all(b"\x1b[0m").await?;
            }
            out.flush().await
        } else {
            let mut err = self.stderr.lock().await;
            if self.color {
                err.write_all(format!("\x1b[{color}m").as_bytes()).await?;
            }
            err.write_all(&payload).await?;
            if self.color {
                err.write_all(b"\x1b[0m").await?;
            }
            err.flush().await
        }
    }
}

#[async_trait]
impl<R, W> Layer<R, W> for StdoutDumpLayer
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn provides(&self) -> Vec<Signature> {
        vec![Signature::parse("write(ipi)i").unwrap()]
    }

    async fn call(
        &self,
        sig: &Signature,
        args: Vec<Value>,
        ctx: &mut HandlerCtx<'_, R, W>,
        next: Delegate<'_, R, W>,
    ) -> Result<Value, SessionError> {
        let fd = args[0].as_int().expect("write fd is an int");
        if fd != 1 && fd != 2 {
            return next.call(sig, args, ctx).await;
        }
        let buf = args[1].as_ptr().expect("write buf is a pointer");
        let count = args[2].as_int().expect("write count is an int") as usize;
        let bytes = ctx.codec.fetch(buf, count).await?;
        self.emit(fd, &bytes).await.map_err(SessionError::Io)?;
        Ok(Value::Int(bytes.len() as i64))
    }
}
