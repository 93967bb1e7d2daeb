//! The stdin-forward layer (§4.3 "Stdin forward layer").
//!
//! Overrides `read(fd,buf,count)i` for `fd == 0`: performs a real read from
//! the host's own stdin and writes the bytes into the child's buffer via
//! the codec's memory side-channel. Reads on any other fd delegate further
//! down the stack (to the VFS layer, if present).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Mutex;

use crate::error::SessionError;
use crate::layer::{Delegate, HandlerCtx, Layer};
use crate::vfs::fd::MAX_READ_CHUNK;
use crate::wire::{Signature, Value};

/// Forwards `read(0, buf, count)` to a real source of host stdin bytes.
/// Generic over the source so tests can substitute an in-memory reader
/// instead of the process's real stdin.
pub struct StdinForwardLayer<S> {
    stdin: Mutex<S>,
}

impl StdinForwardLayer<tokio::io::Stdin> {
    pub fn new() -> Self {
        StdinForwardLayer { stdin: Mutex::new(tokio::io::stdin()) }
    }
}

impl<S> StdinForwardLayer<S> {
    pub fn from_reader(reader: S) -> Self {
        StdinForwardLayer { stdin: Mutex::new(reader) }
    }
}

#[async_trait]
impl<R, W, S> Layer<R, W> for StdinForwardLayer<S>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    S: AsyncRead + Unpin + Send,
{
    fn provides(&self) -> Vec<Signature> {
        vec![Signature::parse("read(ipi)i").unwrap()]
    }

    async fn call(
        &self,
        sig: &Signature,
        args: Vec<Value>,
        ctx: &mut HandlerCtx<'_, R, W>,
        next: Delegate<'_, R, W>,
    ) -> Result<Value, SessionError> {
        let fd = args[0].as_int().expect("read fd is an int");
        if fd != 0 {
            return next.call(sig, args, ctx).await;
        }
        let buf = args[1].as_ptr().expect("read buf is a pointer");
        // A negative count reads as 0 bytes rather than wrapping to a huge
        // `usize` that `.min(MAX_READ_CHUNK)` would otherwise silently
        // clamp down to 256 KiB of real stdin (§4.5, mirroring the VFS
        // layer's own `read` handler).
        let raw_count = args[2].as_int().expect("read count is an int");
        let count = if raw_count < 0 { 0 } else { (raw_count as usize).min(MAX_READ_CHUNK) };

        let mut chunk = vec![0u8; count];
        let mut stdin = self.stdin.lock().await;
        let n = stdin.read(&mut chunk).await.map_err(SessionError::Io)?;
        drop(stdin);
        chunk.truncate(n);
        ctx.codec.deliver(buf, &chunk).await?;
        Ok(Value::Int(n as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{VAddr, VirtualHeap};
    use crate::layers::defaults::DefaultsLayer;
    use crate::session::SessionConfig;
    use crate::vfs::{Node, VfsState};
    use crate::wire::Codec;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    type HostStream = tokio::io::DuplexStream;

    #[tokio::test]
    async fn forwards_stdin_bytes_to_child_buffer() {
        let mut heap = VirtualHeap::new();
        let mut errno = None;
        let mut vfs = VfsState::new(Node::dir(BTreeMap::new()), 3..49, 32);
        let config = SessionConfig::default();
        let mut output = Vec::new();

        let (mut child_side, host_side) = tokio::io::duplex(256);
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut marker = [0u8; 1];
            child_side.read_exact(&mut marker).await.unwrap();
            let mut addr = [0u8; 8];
            child_side.read_exact(&mut addr).await.unwrap();
            let mut len = [0u8; 4];
            child_side.read_exact(&mut len).await.unwrap();
            let declared = u32::from_ne_bytes(len) as usize;
            let mut payload = vec![0u8; declared];
            child_side.read_exact(&mut payload).await.unwrap();
            child_side.write_u8(0).await.unwrap();
        });

        let mut codec = Codec::new(host_side, tokio::io::sink());
        let mut ctx = HandlerCtx {
            heap: &mut heap,
            errno: &mut errno,
            vfs: &mut vfs,
            config: &config,
            codec: &mut codec,
            captured_output: &mut output,
            session_start: std::time::Instant::now(),
        };

        let layer = StdinForwardLayer::from_reader(std::io::Cursor::new(b"abc".to_vec()));
        let sig = Signature::parse("read(ipi)i").unwrap();
        let args = vec![Value::Int(0), Value::Ptr(VAddr(8)), Value::Int(16)];
        let chain: Vec<Arc<dyn Layer<HostStream, tokio::io::Sink>>> = vec![
            Arc::new(StdinForwardLayer::from_reader(std::io::Cursor::new(Vec::<u8>::new()))),
            Arc::new(DefaultsLayer::default()),
        ];
        let delegate = Delegate::new(&chain, 1);
        let result = layer.call(&sig, args, &mut ctx, delegate).await.unwrap();
        assert_eq!(result, Value::Int(3));
    }
}
