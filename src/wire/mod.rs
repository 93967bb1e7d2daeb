//! Binary framing and typed marshalling between host and child.
//!
//! A message on the wire is type-driven: the codec does not know which
//! signatures exist, only how to read/write the four value tags (`i`, `p`,
//! `d`, `v`) once told which ones to expect. This mirrors the way the
//! original sandboxed-process protocol is purely structural — the
//! authoritative signature list lives in the dispatch registry
//! ([`crate::dispatch`]), not in the codec.

mod codec;
mod signature;
mod value;

pub use codec::{Codec, WireError, WireResult};
pub use signature::{Signature, Tag};
pub use value::{failure_sentinel, Value};
