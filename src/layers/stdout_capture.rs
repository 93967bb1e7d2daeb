//! The stdout-capture layer (§4.3 "Stdout capture layer").
//!
//! Overrides `write(fd,buf,count)i` for `fd ∈ {1,2}`, appending the
//! written bytes into an internal capped buffer instead of touching the
//! host's own stdout/stderr. Used by embedders (and the integration tests
//! in `tests/`) that want to assert on exactly what the child printed
//! rather than watch it scroll by.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SessionError;
use crate::layer::{Delegate, HandlerCtx, Layer};
use crate::wire::{Signature, Value};

/// Captures `write(1|2, buf, count)` into `ctx.captured_output`, capped at
/// `config.output_buffer_cap` bytes (§4.3: "exceeding the cap fails the
/// session" — a protocol violation, §7 bullet 2).
pub struct StdoutCaptureLayer;

#[async_trait]
impl<R, W> Layer<R, W> for StdoutCaptureLayer
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

        if ctx.captured_output.len() + bytes.len() > ctx.config.output_buffer_cap {
            return Err(SessionError::OutputCapExceeded { limit: ctx.config.output_buffer_cap });
        }
        ctx.captured_output.extend_from_slice(&bytes);
        Ok(Value::Int(bytes.len() as i64))
    }
}
