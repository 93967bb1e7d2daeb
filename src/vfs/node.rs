//! The polymorphic VFS node and the byte layouts the host marshals back to
//! the child: `struct stat` (§4.5 "stat marshalling") and `struct dirent`
//! (§4.5 "Directory iteration").
//!
//! Every node is read-only from the child's perspective (§3 "VFS node"):
//! there is no variant and no method that mutates file contents. The tree
//! itself is assembled once by the embedder and never changes shape after
//! that (§4.6) — the only interior mutability is the lazily assigned inode
//! number (§3 "Identity").

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::errno::Errno;

/// Fixed virtual device id for every node (§3 "Identity").
pub const VIRTUAL_DEV: u64 = 1;

/// Maximum `d_name` length before `readdir` fails with `EOVERFLOW` (§4.5).
pub const MAX_DIRENT_NAME: usize = 255;

pub type VfsResult<T> = Result<T, Errno>;

/// Request mode bits for [`Node::access`], matching `R_OK`/`W_OK`/`X_OK`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccessMode(pub i32);

impl AccessMode {
    pub const READ: AccessMode = AccessMode(libc::R_OK);
    pub const WRITE: AccessMode = AccessMode(libc::W_OK);
    pub const EXEC: AccessMode = AccessMode(libc::X_OK);
}

/// The virtual identity compared against a node's (always-zero, §3) owner
/// when computing `access()` permission triads.
#[derive(Debug, Copy, Clone)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

/// The host's declared layout for the child's `struct stat` (§9
/// "Platform-specific struct layouts"). Field order and widths are chosen
/// to match a common 64-bit Linux ABI; an embedder targeting a different
/// child ABI would swap this declaration rather than reuse the host's own
/// `libc::stat`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Stat {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_nlink: u64,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u64,
    pub st_size: i64,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
}

impl Stat {
    /// The byte count of [`Self::to_bytes`]; callers size host allocations
    /// against this rather than hard-coding a number. Eight 8-byte fields
    /// (`st_dev`/`st_ino`/`st_nlink`/`st_rdev`/`st_size`/`st_atime`/
    /// `st_mtime`/`st_ctime`) plus three 4-byte fields (`st_mode`/`st_uid`/
    /// `st_gid`).
    pub const WIRE_SIZE: usize = 8 * 8 + 4 * 3;

    /// Serializes in native byte order, matching the same-machine pipe
    /// between host and child (§9: widths/order are an explicit
    /// declaration, not inherited from the host's own ABI by accident).
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_SIZE);
        buf.extend_from_slice(&self.st_dev.to_ne_bytes());
        buf.extend_from_slice(&self.st_ino.to_ne_bytes());
        buf.extend_from_slice(&self.st_mode.to_ne_bytes());
        buf.extend_from_slice(&self.st_nlink.to_ne_bytes());
        buf.extend_from_slice(&self.st_uid.to_ne_bytes());
        buf.extend_from_slice(&self.st_gid.to_ne_bytes());
        buf.extend_from_slice(&self.st_rdev.to_ne_bytes());
        buf.extend_from_slice(&self.st_size.to_ne_bytes());
        buf.extend_from_slice(&self.st_atime.to_ne_bytes());
        buf.extend_from_slice(&self.st_mtime.to_ne_bytes());
        buf.extend_from_slice(&self.st_ctime.to_ne_bytes());
        buf
    }
}

/// The host's declared layout for the child's `struct dirent` (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub d_ino: u64,
    pub d_type: DirentType,
    pub name: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DirentType {
    Dir,
    Reg,
}

impl Dirent {
    pub const WIRE_SIZE: usize = 8 + 2 + 1 + MAX_DIRENT_NAME + 1;

    pub fn to_bytes(&self) -> VfsResult<Vec<u8>> {
        let name_bytes = self.name.as_bytes();
        if name_bytes.len() > MAX_DIRENT_NAME {
            return Err(Errno::Overflow);
        }
        let mut buf = Vec::with_capacity(Self::WIRE_SIZE);
        buf.extend_from_slice(&self.d_ino.to_ne_bytes());
        buf.extend_from_slice(&(Self::WIRE_SIZE as u16).to_ne_bytes());
        buf.push(match self.d_type {
            DirentType::Dir => libc::DT_DIR,
            DirentType::Reg => libc::DT_REG,
        });
        buf.extend_from_slice(name_bytes);
        buf.resize(Self::WIRE_SIZE, 0);
        Ok(buf)
    }
}

/// Filters applied by a [`NodeKind::RealDir`] bridge (§4.5 "Real directory
/// bridging").
#[derive(Debug, Clone)]
pub struct RealDirOptions {
    pub show_dotfiles: bool,
    pub follow_links: bool,
    pub exclude: Vec<String>,
}

impl Default for RealDirOptions {
    fn default() -> Self {
        RealDirOptions { show_dotfiles: false, follow_links: false, exclude: Vec::new() }
    }
}

impl RealDirOptions {
    fn excluded(&self, name: &str) -> bool {
        if !self.show_dotfiles && name.starts_with('.') {
            return true;
        }
        let lower = name.to_lowercase();
        self.exclude.iter().any(|suffix| lower.ends_with(suffix.as_str()))
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Dir(BTreeMap<String, Arc<Node>>),
    RealDir { path: PathBuf, options: RealDirOptions },
    File { data: Vec<u8>, mode: u32 },
    RealFile { path: PathBuf, mode: u32 },
}

/// A single entry of the VFS tree: a tagged union over the four kinds
/// described in §3, with a lazily assigned inode shared by every clone of
/// the node (§9 "Polymorphic nodes": dispatch on the tag, not virtual
/// methods).
#[derive(Debug)]
pub struct Node {
    ino: AtomicU64,
    kind: NodeKind,
}

static NEXT_INO: AtomicU64 = AtomicU64::new(1);

impl Node {
    pub fn dir(entries: BTreeMap<String, Arc<Node>>) -> Arc<Node> {
        Arc::new(Node { ino: AtomicU64::new(0), kind: NodeKind::Dir(entries) })
    }

    pub fn real_dir(path: impl Into<PathBuf>, options: RealDirOptions) -> Arc<Node> {
        Arc::new(Node {
            ino: AtomicU64::new(0),
            kind: NodeKind::RealDir { path: path.into(), options },
        })
    }

    pub fn file(data: impl Into<Vec<u8>>, mode: u32) -> Arc<Node> {
        Arc::new(Node {
            ino: AtomicU64::new(0),
            kind: NodeKind::File { data: data.into(), mode },
        })
    }

    pub fn real_file(path: impl Into<PathBuf>, mode: u32) -> Arc<Node> {
        Arc::new(Node {
            ino: AtomicU64::new(0),
            kind: NodeKind::RealFile { path: path.into(), mode },
        })
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir(_) | NodeKind::RealDir { .. })
    }

    /// Assigns (once) and returns this node's stable virtual inode (§3
    /// "Identity": "every node is assigned a stable virtual inode number
    /// the first time it is stat-ed").
    fn ino(&self) -> u64 {
        let current = self.ino.load(Ordering::Relaxed);
        if current != 0 {
            return current;
        }
        let fresh = NEXT_INO.fetch_add(1, Ordering::Relaxed);
        match self.ino.compare_exchange(0, fresh, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => fresh,
            Err(winner) => winner,
        }
    }

    pub fn size(&self) -> VfsResult<u64> {
        match &self.kind {
            NodeKind::Dir(_) | NodeKind::RealDir { .. } => Ok(0),
            NodeKind::File { data, .. } => Ok(data.len() as u64),
            NodeKind::RealFile { path, .. } => {
                let meta = std::fs::metadata(path).map_err(io_errno)?;
                Ok(meta.len())
            }
        }
    }

    fn mode_bits(&self) -> VfsResult<u32> {
        Ok(match &self.kind {
            NodeKind::Dir(_) | NodeKind::RealDir { .. } => {
                (libc::S_IFDIR as u32)
                    | libc::S_IRUSR as u32
                    | libc::S_IRGRP as u32
                    | libc::S_IROTH as u32
                    | libc::S_IXUSR as u32
                    | libc::S_IXGRP as u32
                    | libc::S_IXOTH as u32
            }
            NodeKind::File { mode, .. } => {
                (libc::S_IFREG as u32) | libc::S_IRUSR as u32 | libc::S_IRGRP as u32
                    | libc::S_IROTH as u32
                    | mode
            }
            NodeKind::RealFile { mode, .. } => {
                (libc::S_IFREG as u32) | libc::S_IRUSR as u32 | libc::S_IRGRP as u32
                    | libc::S_IROTH as u32
                    | mode
            }
        })
    }

    /// Computes the child-visible `struct stat` for this node (§4.5). Every
    /// node in this core is read-only, so `st_uid`/`st_gid` are always 0
    /// ("virtually owned by root", mirroring the source this is grounded
    /// on) and `st_nlink` is always 1.
    pub fn stat(&self, virtual_time: i64) -> VfsResult<Stat> {
        Ok(Stat {
            st_dev: VIRTUAL_DEV,
            st_ino: self.ino(),
            st_mode: self.mode_bits()?,
            st_nlink: 1,
            st_uid: 0,
            st_gid: 0,
            st_rdev: 0,
            st_size: self.size()? as i64,
            st_atime: virtual_time,
            st_mtime: virtual_time,
            st_ctime: virtual_time,
        })
    }

    /// Whether `identity` is permitted the bits in `mode` (§4.5 "Access").
    pub fn access(&self, mode: AccessMode, identity: Identity) -> VfsResult<bool> {
        let st = self.stat(0)?;
        let mut effective = (st.st_mode as i32) & 0o7;
        if identity.uid == st.st_uid {
            effective |= ((st.st_mode as i32) & 0o700) >> 6;
        }
        if identity.gid == st.st_gid {
            effective |= ((st.st_mode as i32) & 0o070) >> 3;
        }
        Ok((effective & mode.0) == mode.0)
    }

    /// Sorted child names of a directory node (§4.5 "Real directory
    /// bridging": `children()` "returns a sorted sequence").
    pub fn children(&self) -> VfsResult<Vec<String>> {
        match &self.kind {
            NodeKind::Dir(entries) => Ok(entries.keys().cloned().collect()),
            NodeKind::RealDir { path, options } => {
                let mut names = Vec::new();
                let read_dir = std::fs::read_dir(path).map_err(io_errno)?;
                for entry in read_dir {
                    let entry = entry.map_err(io_errno)?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !options.excluded(&name) {
                        names.push(name);
                    }
                }
                names.sort();
                Ok(names)
            }
            NodeKind::File { .. } | NodeKind::RealFile { .. } => Err(Errno::NotDir),
        }
    }

    /// Resolves one path component below this (directory) node (§4.5).
    pub fn join(&self, name: &str) -> VfsResult<Arc<Node>> {
        match &self.kind {
            NodeKind::Dir(entries) => entries.get(name).cloned().ok_or(Errno::NoEnt),
            NodeKind::RealDir { path, options } => {
                if options.excluded(name) {
                    return Err(Errno::NoEnt);
                }
                let child_path = path.join(name);
                let meta = if options.follow_links {
                    std::fs::metadata(&child_path)
                } else {
                    std::fs::symlink_metadata(&child_path)
                }
                .map_err(io_errno)?;
                if meta.is_dir() {
                    Ok(Node::real_dir(child_path, options.clone()))
                } else if meta.is_file() {
                    Ok(Node::real_file(child_path, 0))
                } else {
                    // Symlinks and other special files are never exposed
                    // (§4.5: "refuses to expose symlinks").
                    Err(Errno::Access)
                }
            }
            NodeKind::File { .. } | NodeKind::RealFile { .. } => Err(Errno::NotDir),
        }
    }

    /// Reads the full byte contents of a regular-file node, used both by
    /// file `open`/`read` and by tests that want a whole-file comparison.
    pub fn read_all(&self) -> VfsResult<Vec<u8>> {
        match &self.kind {
            NodeKind::File { data, .. } => Ok(data.clone()),
            NodeKind::RealFile { path, .. } => std::fs::read(path).map_err(io_errno),
            // Not in the declared errno alphabet (§7 bullet 1); callers are
            // expected to check `is_dir()` before opening a node for reading,
            // the same way the original's `FSObject.open()` never reaches
            // this far for a directory.
            NodeKind::Dir(_) | NodeKind::RealDir { .. } => Err(Errno::Access),
        }
    }
}

fn io_errno(err: std::io::Error) -> Errno {
    match err.kind() {
        std::io::ErrorKind::NotFound => Errno::NoEnt,
        std::io::ErrorKind::PermissionDenied => Errno::Access,
        _ => match err.raw_os_error().and_then(Errno::from_raw) {
            Some(e) => e,
            None => Errno::Io,
        },
    }
}
