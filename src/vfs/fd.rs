//! The virtual file-descriptor table and directory-iterator table (§3
//! "Virtual file-descriptor table", §4.5 "State machine for an open fd",
//! "Directory iteration").

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use crate::errno::Errno;
use crate::heap::VAddr;
use crate::vfs::node::{Node, VfsResult};

/// Bytes read in a single `read(fd, buf, count)` call, regardless of the
/// caller-requested `count` (§4.5 "File open": "cap per call e.g. 256
/// KiB").
pub const MAX_READ_CHUNK: usize = 256 * 1024;

/// An open regular-file descriptor: the node it was opened from, plus a
/// cursor tracking how much of the (eagerly read) contents has been
/// delivered so far. Reading a `RealFile` mid-session may or may not
/// observe concurrent real-filesystem mutation — left unspecified, as in
/// the source this is grounded on (§9 "Open questions").
struct OpenFile {
    node: Arc<Node>,
    data: Vec<u8>,
    position: usize,
}

/// Table of virtual file descriptors opened against VFS nodes. Reserved
/// fds 0/1/2 are never stored here — they belong to the stdin-forward and
/// stdout layers instead (§3).
pub struct FdTable {
    range: Range<i32>,
    open: HashMap<i32, OpenFile>,
}

impl FdTable {
    pub fn new(range: Range<i32>) -> Self {
        FdTable { range, open: HashMap::new() }
    }

    /// Opens `node`'s contents under a fresh fd drawn from the configured
    /// range (§4.5 "File open").
    pub fn open(&mut self, node: Arc<Node>) -> VfsResult<i32> {
        let data = node.read_all()?;
        for fd in self.range.clone() {
            if !self.open.contains_key(&fd) {
                self.open.insert(fd, OpenFile { node, data, position: 0 });
                return Ok(fd);
            }
        }
        Err(Errno::MFile)
    }

    /// Reads up to `count` bytes (capped at [`MAX_READ_CHUNK`]) from `fd`'s
    /// current position, advancing it. Unknown or closed fds are `EBADF`.
    pub fn read(&mut self, fd: i32, count: usize) -> VfsResult<Vec<u8>> {
        let file = self.open.get_mut(&fd).ok_or(Errno::BadF)?;
        let want = count.min(MAX_READ_CHUNK);
        let end = (file.position + want).min(file.data.len());
        let chunk = file.data[file.position..end].to_vec();
        file.position = end;
        Ok(chunk)
    }

    /// Returns the node `fd` was opened from, for `fstat64` (§4.5).
    pub fn node_of(&self, fd: i32) -> VfsResult<Arc<Node>> {
        self.open.get(&fd).map(|f| f.node.clone()).ok_or(Errno::BadF)
    }

    /// Closes `fd`. Further operations on it are `EBADF` (§4.5 "state
    /// machine for an open fd").
    pub fn close(&mut self, fd: i32) -> VfsResult<()> {
        self.open.remove(&fd).map(|_| ()).ok_or(Errno::BadF)
    }
}

/// A single open `opendir` iterator: the directory node plus its already
/// sorted children and a cursor (§4.5 "Directory iteration").
pub struct DirIterator {
    node: Arc<Node>,
    names: Vec<String>,
    position: usize,
}

impl DirIterator {
    fn new(node: Arc<Node>) -> VfsResult<Self> {
        let names = node.children()?;
        Ok(DirIterator { node, names, position: 0 })
    }

    /// Advances the iterator, returning the next child's name and node, or
    /// `None` at end of stream.
    pub fn next_entry(&mut self) -> VfsResult<Option<(String, Arc<Node>)>> {
        if self.position >= self.names.len() {
            return Ok(None);
        }
        let name = self.names[self.position].clone();
        self.position += 1;
        let child = self.node.join(&name)?;
        Ok(Some((name, child)))
    }
}

/// Table of open directory iterators, keyed by the virtual address the
/// host minted for the child's `DIR *`/`struct dirent *` handle (§4.5).
pub struct DirTable {
    max_open: usize,
    open: HashMap<VAddr, DirIterator>,
}

impl DirTable {
    pub fn new(max_open: usize) -> Self {
        DirTable { max_open, open: HashMap::new() }
    }

    pub fn open(&mut self, handle: VAddr, node: Arc<Node>) -> VfsResult<()> {
        if self.open.len() >= self.max_open {
            return Err(Errno::MFile);
        }
        self.open.insert(handle, DirIterator::new(node)?);
        Ok(())
    }

    pub fn get_mut(&mut self, handle: VAddr) -> VfsResult<&mut DirIterator> {
        self.open.get_mut(&handle).ok_or(Errno::BadF)
    }

    pub fn close(&mut self, handle: VAddr) -> VfsResult<()> {
        self.open.remove(&handle).map(|_| ()).ok_or(Errno::BadF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn open_read_close_round_trips_in_memory_file() {
        let node = Node::file(b"hello world".to_vec(), 0);
        let mut table = FdTable::new(3..50);
        let fd = table.open(node).unwrap();
        assert!((3..50).contains(&fd));
        let mut out = Vec::new();
        loop {
            let chunk = table.read(fd, 4).unwrap();
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, b"hello world");
        table.close(fd).unwrap();
        assert_eq!(table.read(fd, 1).unwrap_err(), Errno::BadF);
        assert_eq!(table.close(fd).unwrap_err(), Errno::BadF);
    }

    #[test]
    fn unknown_fd_is_ebadf() {
        let mut table = FdTable::new(3..50);
        assert_eq!(table.read(3, 1).unwrap_err(), Errno::BadF);
    }

    #[test]
    fn dir_table_enforces_max_open() {
        let node = Node::dir(BTreeMap::new());
        let mut table = DirTable::new(1);
        table.open(VAddr(8), node.clone()).unwrap();
        assert_eq!(table.open(VAddr(16), node).unwrap_err(), Errno::MFile);
    }

    #[test]
    fn dir_iterator_lists_then_ends() {
        let mut entries = BTreeMap::new();
        entries.insert("bin".to_string(), Node::dir(BTreeMap::new()));
        entries.insert("tmp".to_string(), Node::dir(BTreeMap::new()));
        let root = Node::dir(entries);
        let mut table = DirTable::new(32);
        table.open(VAddr(8), root).unwrap();
        let iter = table.get_mut(VAddr(8)).unwrap();
        let (n1, _) = iter.next_entry().unwrap().unwrap();
        let (n2, _) = iter.next_entry().unwrap().unwrap();
        assert_eq!(n1, "bin");
        assert_eq!(n2, "tmp");
        assert!(iter.next_entry().unwrap().is_none());
    }
}
