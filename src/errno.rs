//! The emulated errno alphabet carried back to the child on every reply
//! (§3 "Errno channel", §7 bullet 1).
//!
//! Unlike [`crate::vfs`]'s NFS-shaped status codes in the teacher codebase
//! this mirrors, the sandboxed child expects ordinary POSIX `errno` integers
//! — the numbers it will hand to its own libc's `strerror`/`perror`. We keep
//! a small closed enum of the codes this core actually emits (§7 bullet 1)
//! and convert to/from the real `libc` constants, rather than threading
//! bare `i32`s through every handler.
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum Errno {
    Perm = libc::EPERM,
    NoEnt = libc::ENOENT,
    Io = libc::EIO,
    Access = libc::EACCES,
    NotDir = libc::ENOTDIR,
    Inval = libc::EINVAL,
    BadF = libc::EBADF,
    MFile = libc::EMFILE,
    NoSys = libc::ENOSYS,
    Range = libc::ERANGE,
    Overflow = libc::EOVERFLOW,
    NotTy = libc::ENOTTY,
}

impl Errno {
    /// The raw libc-compatible integer value, as the child would see it in
    /// a real `errno`.
    pub fn as_raw(self) -> i32 {
        self.to_i32().expect("Errno always converts to i32")
    }

    /// Narrows a raw host `errno` value back into the closed alphabet this
    /// core emits, if it happens to be one of them. Used when a real
    /// filesystem call fails and the host wants to pass the specific
    /// reason through rather than collapsing it to `EIO`.
    pub fn from_raw(n: i32) -> Option<Self> {
        Self::from_i32(n)
    }

    /// The host's message for this code (`strerror`-equivalent); layered
    /// callers typically go through the defaults layer's cached
    /// `strerror(n)` handler instead of calling this directly.
    pub fn message(self) -> String {
        host_strerror(self.as_raw())
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.as_raw())
    }
}

/// Calls the real host libc `strerror` for an arbitrary errno number. Used
/// both by [`Errno::message`] and directly by the defaults layer's
/// `strerror(n)i` handler (§4.3), which is not restricted to the closed
/// [`Errno`] alphabet — the child may ask about any number.
pub fn host_strerror(n: i32) -> String {
    // Safety: strerror returns a pointer to a statically allocated string
    // (or one owned by the C library's per-thread state); we copy it out
    // immediately and never retain the pointer.
    unsafe {
        let ptr = libc::strerror(n);
        if ptr.is_null() {
            return format!("Unknown error {n}");
        }
        std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}
