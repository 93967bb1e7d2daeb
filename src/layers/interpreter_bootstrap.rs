//! The interpreter-bootstrap layer (§4.3 "Interpreter bootstrap layer").
//!
//! Provides host-specific symbols an interpreter's runtime needs to find
//! its standard library before it can do anything else. The concrete
//! example named in §3/§4.3 is PyPy's `_pypy_init_home()`, which must
//! return a pointer to a fixed virtual path (conventionally `/pypy`) that
//! the VFS layer also recognizes as the interpreter's home (§10.6:
//! `--lib-path` binds a real directory at this same mount point).
//! `_pypy_init_free(p)v` is the matching teardown call the compiled
//! runtime makes once it's done with that pointer (§10.6); it is a no-op
//! here since the host never frees virtual heap allocations anyway
//! (§3 "Virtual heap": free is advisory-only).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SessionError;
use crate::layer::{Delegate, HandlerCtx, Layer};
use crate::wire::{Signature, Value};

/// Answers `_pypy_init_home()p` with a pointer to `home_path` (NUL
/// terminated), minted fresh on every call since the source the child
/// holds never needs to compare addresses across calls — only dereference
/// the one it was just given.
pub struct InterpreterBootstrapLayer {
    home_path: String,
}

impl InterpreterBootstrapLayer {
    pub fn new(home_path: impl Into<String>) -> Self {
        InterpreterBootstrapLayer { home_path: home_path.into() }
    }
}

impl Default for InterpreterBootstrapLayer {
    fn default() -> Self {
        InterpreterBootstrapLayer::new("/pypy")
    }
}

#[async_trait]
impl<R, W> Layer<R, W> for InterpreterBootstrapLayer
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn provides(&self) -> Vec<Signature> {
        vec![
            Signature::parse("_pypy_init_home()p").unwrap(),
            Signature::parse("_pypy_init_free(p)v").unwrap(),
        ]
    }

    async fn call(
        &self,
        sig: &Signature,
        _args: Vec<Value>,
        ctx: &mut HandlerCtx<'_, R, W>,
        _next: Delegate<'_, R, W>,
    ) -> Result<Value, SessionError> {
        match sig.name.as_str() {
            "_pypy_init_home" => {
                let mut bytes = self.home_path.clone().into_bytes();
                bytes.push(0);
                let addr = ctx.mint_pointer(bytes).await?;
                Ok(Value::Ptr(addr))
            }
            // The original's own body is a no-op; the pointer was minted
            // fresh on the heap and is simply never touched again.
            "_pypy_init_free" => Ok(Value::Void),
            _ => unreachable!("provides() and call() must stay in sync for {sig}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::VirtualHeap;
    use crate::session::SessionConfig;
    use crate::vfs::{Node, VfsState};
    use crate::wire::Codec;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    type Stream = tokio::io::DuplexStream;

    #[tokio::test]
    async fn returns_pointer_to_home_path() {
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
            assert_eq!(payload, b"/pypy\0");
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

        let layer = InterpreterBootstrapLayer::default();
        let sig = Signature::parse("_pypy_init_home()p").unwrap();
        let chain: Vec<Arc<dyn Layer<Stream, tokio::io::Sink>>> =
            vec![Arc::new(InterpreterBootstrapLayer::default())];
        let delegate = Delegate::new(&chain, 1);
        let result = layer.call(&sig, vec![], &mut ctx, delegate).await.unwrap();
        assert!(matches!(result, Value::Ptr(p) if !p.is_null()));
    }

    #[tokio::test]
    async fn init_free_is_a_void_noop() {
        let mut heap = VirtualHeap::new();
        let mut errno = None;
        let mut vfs = VfsState::new(Node::dir(BTreeMap::new()), 3..49, 32);
        let config = SessionConfig::default();
        let mut output = Vec::new();

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

        let layer = InterpreterBootstrapLayer::default();
        let sig = Signature::parse("_pypy_init_free(p)v").unwrap();
        let chain: Vec<Arc<dyn Layer<Stream, Stream>>> =
            vec![Arc::new(InterpreterBootstrapLayer::default())];
        let delegate = Delegate::new(&chain, 1);
        let args = vec![Value::Ptr(crate::heap::VAddr(8))];
        let result = layer.call(&sig, args, &mut ctx, delegate).await.unwrap();
        assert_eq!(result, Value::Void);
    }
}
