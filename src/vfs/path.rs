//! Path resolution (§4.5 "Path resolution").

use std::sync::Arc;

use crate::errno::Errno;
use crate::vfs::node::{Node, VfsResult};

/// Maximum length, in bytes, of a path the VFS layer will decode off the
/// wire before giving up (§4.5: "read via the codec up to a maximum path
/// length (e.g., 256)").
pub const MAX_PATH_LEN: usize = 256;

/// Resolves `path` against `root`, splitting on `/` and applying `.`/`..`
/// the way a real path resolver does (§4.5, §8 "idempotent under
/// collapsing of `/./` and `/foo/../`; `..` at the root is a no-op").
///
/// Nonexistent names raise `ENOENT`; a non-directory intermediate
/// component raises `ENOTDIR`.
pub fn resolve(root: &Arc<Node>, path: &str) -> VfsResult<Arc<Node>> {
    let mut stack: Vec<Arc<Node>> = vec![root.clone()];
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            name => {
                let current = stack.last().expect("stack always has the root");
                if !current.is_dir() {
                    return Err(Errno::NotDir);
                }
                let next = current.join(name)?;
                stack.push(next);
            }
        }
    }
    Ok(stack.pop().expect("stack always has the root"))
}
