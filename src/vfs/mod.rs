//! The virtual filesystem (§3 "VFS node", §4.5).
//!
//! A polymorphic tree of directory/file nodes ([`node`]), path resolution
//! ([`path`]), and the virtual file-descriptor and directory-iterator
//! tables ([`fd`]). This module knows nothing about the wire: it is driven
//! by [`crate::layers::vfs_layer`], which decodes pathname pointers and
//! marshals `stat`/`dirent` bytes back to the child.

pub mod fd;
pub mod node;
pub mod path;

pub use fd::{DirIterator, DirTable, FdTable};
pub use node::{
    AccessMode, Dirent, DirentType, Identity, Node, RealDirOptions, Stat, VfsResult, MAX_DIRENT_NAME,
};
pub use path::{resolve, MAX_PATH_LEN};

use std::ops::Range;
use std::sync::Arc;

/// Everything the VFS layer needs for one session: the static tree plus
/// the two open-handle tables (§3 "Virtual file-descriptor table").
pub struct VfsState {
    pub root: Arc<Node>,
    pub fds: FdTable,
    pub dirs: DirTable,
}

impl VfsState {
    pub fn new(root: Arc<Node>, fd_range: Range<i32>, max_open_dirs: usize) -> Self {
        VfsState { root, fds: FdTable::new(fd_range), dirs: DirTable::new(max_open_dirs) }
    }
}
