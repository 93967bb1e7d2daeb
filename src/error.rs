//! The two host-native error tiers from §7: session-fatal protocol
//! violations, and eager configuration mistakes. Emulated errno (§7 bullet
//! 1) is not an error type here at all — it is ordinary data carried on a
//! reply (see [`crate::errno::Errno`]), never propagated as a Rust `Err`.

use crate::heap::HeapError;
use crate::wire::WireError;

/// A session-fatal condition (§7 bullet 2). The kernel surfaces only these;
/// handlers are expected to turn anything else into an emulated errno
/// before returning.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("child called unknown signature {0:?}")]
    UnknownSignature(String),

    #[error("heap access error: {0}")]
    Heap(#[from] HeapError),

    #[error("captured stdout/stderr exceeded the {limit}-byte cap")]
    OutputCapExceeded { limit: usize },

    #[error("path {path:?} exceeds the maximum length of {max} bytes")]
    PathTooLong { path: String, max: usize },

    #[error("child attempted to open {path:?} for writing, which this core does not support")]
    WriteNotSupported { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An error in the embedder's construction, detected eagerly at startup
/// (§7 bullet 3), before a session is ever opened.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed handler signature {0:?}")]
    MalformedSignature(String),

    #[error(
        "error stub for {signature:?} declares a {declared} result but was given a {given} value"
    )]
    StubReturnTypeMismatch { signature: String, declared: &'static str, given: &'static str },

    #[error("duplicate registration for signature {0:?} within the same layer")]
    DuplicateSignature(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
