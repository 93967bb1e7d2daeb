//! The handler-layer abstraction (§4.3, §9 "Layered handler stack vs.
//! inheritance").
//!
//! The source composes behavior by multiply inheriting "mixin" classes
//! that override each other's methods. Here that becomes an explicit
//! ordered list of [`Layer`] objects, each exposing the signatures it
//! handles; resolution is a table built once at session start
//! ([`crate::dispatch::Registry`]), not language-level method lookup. A
//! layer that decides a request is not its responsibility calls
//! [`Delegate::call`] to hand it to the next layer down the stack.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errno::Errno;
use crate::error::SessionError;
use crate::heap::VirtualHeap;
use crate::session::SessionConfig;
use crate::vfs::VfsState;
use crate::wire::{Codec, Signature, Value, WireResult};

/// Everything a handler needs to service one request: the mutable session
/// state plus the wire codec for memory side-channels (§4.1).
pub struct HandlerCtx<'a, R, W> {
    pub heap: &'a mut VirtualHeap,
    pub errno: &'a mut Option<Errno>,
    pub vfs: &'a mut VfsState,
    pub config: &'a SessionConfig,
    pub codec: &'a mut Codec<R, W>,
    pub captured_output: &'a mut Vec<u8>,
    pub session_start: std::time::Instant,
}

impl<'a, R, W> HandlerCtx<'a, R, W> {
    /// Sets the session's emulated errno (§3 "Errno channel").
    pub fn fail(&mut self, errno: Errno) {
        *self.errno = Some(errno);
    }

    pub fn clear_errno(&mut self) {
        *self.errno = None;
    }
}

impl<'a, R, W> HandlerCtx<'a, R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Mints a fresh virtual address for `data` and immediately pushes the
    /// bytes across the wire so the child can dereference it (§3 "virtual
    /// addresses are integer handles minted by the host allocator"): every
    /// pointer the host hands back must already be backed by delivered
    /// bytes, since the child has no other way to read through it.
    pub async fn mint_pointer(&mut self, data: Vec<u8>) -> WireResult<crate::heap::VAddr> {
        let addr = self.heap.malloc(data.clone());
        self.codec.deliver(addr, &data).await?;
        Ok(addr)
    }
}

/// The remaining portion of a signature's handler chain, from the
/// perspective of the layer that just received control (§4.3 "A layer may
/// freely delegate").
pub struct Delegate<'a, R, W> {
    chain: &'a [Arc<dyn Layer<R, W>>],
    index: usize,
}

impl<'a, R, W> Delegate<'a, R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(chain: &'a [Arc<dyn Layer<R, W>>], index: usize) -> Self {
        Delegate { chain, index }
    }

    /// Invokes the next layer down the stack for this signature. The
    /// bottommost entry is always a layer that terminates the chain (the
    /// defaults layer's `ENOSYS` stub), so `index` never runs past the end
    /// in a correctly built [`crate::dispatch::Registry`].
    pub async fn call(
        self,
        sig: &Signature,
        args: Vec<Value>,
        ctx: &mut HandlerCtx<'_, R, W>,
    ) -> Result<Value, SessionError> {
        match self.chain.get(self.index) {
            Some(layer) => {
                let layer = layer.clone();
                let next = Delegate { chain: self.chain, index: self.index + 1 };
                layer.call(sig, args, ctx, next).await
            }
            None => {
                // No layer claimed this signature to the bottom of the
                // stack. This is a configuration bug (every registered
                // signature must end in a terminating handler), not a
                // guest-visible condition, so we fail loud rather than
                // emulate an errno.
                ctx.fail(Errno::NoSys);
                Ok(crate::wire::failure_sentinel(sig.ret))
            }
        }
    }
}

/// One composable bundle of syscall handlers (§4.3).
#[async_trait]
pub trait Layer<R, W>: Send + Sync
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// The signatures this layer provides (§3 "Syscall registry": "A
    /// mapping from signature string to handler").
    fn provides(&self) -> Vec<Signature>;

    /// Services (or delegates) one request for one of [`Self::provides`]'s
    /// signatures. Returns an error only for session-fatal conditions
    /// (§7 bullet 2: a pipe failure, or a protocol violation such as an
    /// oversize output capture or a real write-path attempt); anything
    /// guest-visible is reported through [`HandlerCtx::fail`] instead.
    async fn call(
        &self,
        sig: &Signature,
        args: Vec<Value>,
        ctx: &mut HandlerCtx<'_, R, W>,
        next: Delegate<'_, R, W>,
    ) -> Result<Value, SessionError>;
}

/// Declaratively describes a "missing" stub (§4.4 "Signature DSL and error
/// stubs"): given a signature, the errno it should set, and the sentinel
/// it should return, validates that `returns` has the declared type before
/// the stub is ever called (§7 bullet 3: configuration errors are
/// "detected eagerly at startup").
pub struct ErrorStub {
    pub signature: Signature,
    pub errno: Errno,
    pub returns: Value,
}

impl ErrorStub {
    pub fn new(
        signature_text: &str,
        errno: Errno,
        returns: Value,
    ) -> Result<Self, crate::error::ConfigError> {
        let signature = Signature::parse(signature_text)
            .ok_or_else(|| crate::error::ConfigError::MalformedSignature(signature_text.to_string()))?;
        if returns.tag() != signature.ret {
            return Err(crate::error::ConfigError::StubReturnTypeMismatch {
                signature: signature_text.to_string(),
                declared: signature.ret.name(),
                given: returns.tag().name(),
            });
        }
        Ok(ErrorStub { signature, errno, returns })
    }

    pub fn respond(&self, ctx: &mut impl ErrnoSink) -> Value {
        ctx.fail(self.errno);
        self.returns
    }
}

/// Narrow trait so [`ErrorStub::respond`] doesn't need the full
/// [`HandlerCtx`] generic parameters.
pub trait ErrnoSink {
    fn fail(&mut self, errno: Errno);
}

impl<'a, R, W> ErrnoSink for HandlerCtx<'a, R, W> {
    fn fail(&mut self, errno: Errno) {
        HandlerCtx::fail(self, errno)
    }
}
