//! Host side of a two-process sandbox.
//!
//! A child program compiled in "sandboxed" mode replaces every external OS
//! call with a serialized request over its own stdin/stdout pipes. This
//! crate reads those requests, emulates them against a virtual world
//! (filesystem, environment, time, identity), and writes back an emulated
//! result — the child never performs a real system call.
//!
//! The pieces, leaves first:
//! - [`wire`]: framing and typed argument marshalling between host and child.
//! - [`heap`]: the virtual address space backing pointers returned to the
//!   child.
//! - [`errno`]: the emulated errno alphabet.
//! - [`vfs`]: the virtual filesystem tree, path resolution, and descriptor
//!   tables.
//! - [`layer`] and [`layers`]: composable handler stacks.
//! - [`dispatch`]: the signature registry and the read/decode/execute/encode
//!   loop.
//! - [`session`]: ties everything together into a runnable sandboxed
//!   session.
//! - [`config`]: the embedder-facing construction surface.

pub mod config;
pub mod dispatch;
pub mod dump;
pub mod errno;
pub mod error;
pub mod heap;
pub mod layer;
pub mod layers;
pub mod session;
pub mod vfs;
pub mod wire;

pub use error::{ConfigError, SessionError};
pub use errno::Errno;
pub use session::Session;
