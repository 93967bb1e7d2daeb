//! The VFS layer (§4.3 "VFS layer", §4.5).
//!
//! Bridges the wire's `stat64`/`open`/`read`/`close`/`opendir`/`readdir`/
//! `closedir` family onto [`crate::vfs`]: decoding pathname pointers,
//! resolving them against the session's `vfs_root`, marshalling `struct
//! stat`/`struct dirent` bytes back across the codec, and maintaining the
//! virtual fd and directory-iterator tables.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SessionError;
use crate::errno::Errno;
use crate::heap::VAddr;
use crate::layer::{Delegate, HandlerCtx, Layer};
use crate::vfs::node::{AccessMode, Dirent, DirentType, Identity};
use crate::vfs::path::{resolve, MAX_PATH_LEN};
use crate::wire::{Signature, Value};

pub struct VfsLayer;

impl VfsLayer {
    /// Reads a NUL-terminated pathname at `addr` (§4.5 "Path resolution":
    /// "read via the codec up to a maximum path length ... decode as
    /// UTF-8"). A path with no NUL within [`MAX_PATH_LEN`] bytes is a
    /// protocol violation (§7 bullet 2, §9 `PathTooLong`); invalid UTF-8 is
    /// guest-visible (`EINVAL`), not session-fatal.
    async fn read_path<R, W>(
        ctx: &mut HandlerCtx<'_, R, W>,
        addr: VAddr,
    ) -> Result<Result<String, Errno>, SessionError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let bytes = ctx.codec.fetch(addr, MAX_PATH_LEN).await?;
        let Some(nul) = bytes.iter().position(|&b| b == 0) else {
            return Err(SessionError::PathTooLong {
                path: String::from_utf8_lossy(&bytes).into_owned(),
                max: MAX_PATH_LEN,
            });
        };
        Ok(String::from_utf8(bytes[..nul].to_vec()).map_err(|_| Errno::Inval))
    }
}

#[async_trait]
impl<R, W> Layer<R, W> for VfsLayer
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn provides(&self) -> Vec<Signature> {
        vec![
            Signature::parse("stat64(pp)i").unwrap(),
            Signature::parse("lstat64(pp)i").unwrap(),
            Signature::parse("fstat64(ip)i").unwrap(),
            Signature::parse("open(pii)i").unwrap(),
            Signature::parse("read(ipi)i").unwrap(),
            Signature::parse("close(i)i").unwrap(),
            Signature::parse("opendir(p)p").unwrap(),
            Signature::parse("readdir(p)p").unwrap(),
            Signature::parse("closedir(p)i").unwrap(),
        ]
    }

    async fn call(
        &self,
        sig: &Signature,
        args: Vec<Value>,
        ctx: &mut HandlerCtx<'_, R, W>,
        _next: Delegate<'_, R, W>,
    ) -> Result<Value, SessionError> {
        match sig.name.as_str() {
            "stat64" | "lstat64" => {
                let path_addr = args[0].as_ptr().expect("path arg is a pointer");
                let buf_addr = args[1].as_ptr().expect("stat buf arg is a pointer");
                let path = match Self::read_path(ctx, path_addr).await? {
                    Ok(p) => p,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Int(-1));
                    }
                };
                let node = match resolve(&ctx.vfs.root, &path) {
                    Ok(n) => n,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Int(-1));
                    }
                };
                let st = match node.stat(ctx.config.virtual_time) {
                    Ok(st) => st,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Int(-1));
                    }
                };
                ctx.codec.deliver(buf_addr, &st.to_bytes()).await?;
                Ok(Value::Int(0))
            }
            "fstat64" => {
                let fd = args[0].as_int().expect("fd arg is an int") as i32;
                let buf_addr = args[1].as_ptr().expect("stat buf arg is a pointer");
                let node = match ctx.vfs.fds.node_of(fd) {
                    Ok(n) => n,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Int(-1));
                    }
                };
                let st = match node.stat(ctx.config.virtual_time) {
                    Ok(st) => st,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Int(-1));
                    }
                };
                ctx.codec.deliver(buf_addr, &st.to_bytes()).await?;
                Ok(Value::Int(0))
            }
            "open" => {
                let path_addr = args[0].as_ptr().expect("path arg is a pointer");
                let flags = args[1].as_int().expect("flags arg is an int") as i32;
                let path = match Self::read_path(ctx, path_addr).await? {
                    Ok(p) => p,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Int(-1));
                    }
                };
                let wants_write = (flags & libc::O_ACCMODE) != libc::O_RDONLY
                    || (flags & libc::O_CREAT) != 0;
                if wants_write {
                    return Err(SessionError::WriteNotSupported { path });
                }
                let node = match resolve(&ctx.vfs.root, &path) {
                    Ok(n) => n,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Int(-1));
                    }
                };
                let identity =
                    Identity { uid: ctx.config.virtual_uid, gid: ctx.config.virtual_gid };
                match node.access(AccessMode::READ, identity) {
                    Ok(true) => {}
                    Ok(false) => {
                        ctx.fail(Errno::Access);
                        return Ok(Value::Int(-1));
                    }
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Int(-1));
                    }
                }
                if node.is_dir() {
                    // Mirrors the original's `FSObject.open()`, which a
                    // directory node never overrides: opening a directory
                    // always raises EACCES, not EISDIR (the latter isn't in
                    // the emulated errno alphabet, §7 bullet 1).
                    ctx.fail(Errno::Access);
                    return Ok(Value::Int(-1));
                }
                match ctx.vfs.fds.open(node) {
                    Ok(fd) => Ok(Value::Int(fd as i64)),
                    Err(e) => {
                        ctx.fail(e);
                        Ok(Value::Int(-1))
                    }
                }
            }
            "read" => {
                // No special-casing of fd 0 here: this layer sits beneath
                // the stdin-forward layer in the stack (§4.3), which
                // already claims fd 0 and delegates everything else down
                // to us. An fd we never opened is simply `EBADF` (§4.5
                // "Unknown fds also yield EBADF"), the same as any other
                // fd this table doesn't recognize.
                let fd = args[0].as_int().expect("fd arg is an int") as i32;
                let buf_addr = args[1].as_ptr().expect("buf arg is a pointer");
                // A negative count reads as 0 bytes, matching
                // `original_source/sandboxlib/mix_vfs.py`'s `read()` rather
                // than wrapping to a huge `usize` that `FdTable::read`
                // would otherwise silently clamp down to `MAX_READ_CHUNK`.
                let raw_count = args[2].as_int().expect("count arg is an int");
                let count = if raw_count < 0 { 0 } else { raw_count as usize };
                match ctx.vfs.fds.read(fd, count) {
                    Ok(chunk) => {
                        let n = chunk.len();
                        ctx.codec.deliver(buf_addr, &chunk).await?;
                        Ok(Value::Int(n as i64))
                    }
                    Err(e) => {
                        ctx.fail(e);
                        Ok(Value::Int(-1))
                    }
                }
            }
            "close" => {
                let fd = args[0].as_int().expect("fd arg is an int") as i32;
                match ctx.vfs.fds.close(fd) {
                    Ok(()) => Ok(Value::Int(0)),
                    Err(e) => {
                        ctx.fail(e);
                        Ok(Value::Int(-1))
                    }
                }
            }
            "opendir" => {
                let path_addr = args[0].as_ptr().expect("path arg is a pointer");
                let path = match Self::read_path(ctx, path_addr).await? {
                    Ok(p) => p,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Ptr(VAddr::NULL));
                    }
                };
                let node = match resolve(&ctx.vfs.root, &path) {
                    Ok(n) => n,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Ptr(VAddr::NULL));
                    }
                };
                if !node.is_dir() {
                    ctx.fail(Errno::NotDir);
                    return Ok(Value::Ptr(VAddr::NULL));
                }
                let handle = ctx.heap.malloc(vec![0u8; Dirent::WIRE_SIZE]);
                match ctx.vfs.dirs.open(handle, node) {
                    Ok(()) => Ok(Value::Ptr(handle)),
                    Err(e) => {
                        ctx.fail(e);
                        Ok(Value::Ptr(VAddr::NULL))
                    }
                }
            }
            "readdir" => {
                let handle = args[0].as_ptr().expect("dir handle arg is a pointer");
                let iter = match ctx.vfs.dirs.get_mut(handle) {
                    Ok(iter) => iter,
                    Err(e) => {
                        ctx.fail(e);
                        return Ok(Value::Ptr(VAddr::NULL));
                    }
                };
                match iter.next_entry() {
                    Ok(None) => Ok(Value::Ptr(VAddr::NULL)),
                    Ok(Some((name, child))) => {
                        let ino = match child.stat(ctx.config.virtual_time) {
                            Ok(st) => st.st_ino,
                            Err(e) => {
                                ctx.fail(e);
                                return Ok(Value::Ptr(VAddr::NULL));
                            }
                        };
                        let dirent = Dirent {
                            d_ino: ino,
                            d_type: if child.is_dir() { DirentType::Dir } else { DirentType::Reg },
                            name,
                        };
                        match dirent.to_bytes() {
                            Ok(bytes) => {
                                ctx.codec.deliver(handle, &bytes).await?;
                                Ok(Value::Ptr(handle))
                            }
                            Err(e) => {
                                ctx.fail(e);
                                Ok(Value::Ptr(VAddr::NULL))
                            }
                        }
                    }
                    Err(e) => {
                        ctx.fail(e);
                        Ok(Value::Ptr(VAddr::NULL))
                    }
                }
            }
            "closedir" => {
                let handle = args[0].as_ptr().expect("dir handle arg is a pointer");
                match ctx.vfs.dirs.close(handle) {
                    Ok(()) => Ok(Value::Int(0)),
                    Err(e) => {
                        ctx.fail(e);
                        Ok(Value::Int(-1))
                    }
                }
            }
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

    fn sample_root() -> Arc<crate::vfs::Node> {
        let mut bin = BTreeMap::new();
        bin.insert("pypy".to_string(), Node::file(b"ELF...".to_vec(), 0o111));
        let mut entries = BTreeMap::new();
        entries.insert("bin".to_string(), Node::dir(bin));
        entries.insert("tmp".to_string(), Node::dir(BTreeMap::new()));
        Node::dir(entries)
    }

    /// Spawns a fake child that answers exactly one `fetch` (MEM_READ)
    /// request with `path` followed by a NUL, then holds the pipe open so
    /// the subsequent `deliver` (MEM_WRITE) for the stat buffer can also be
    /// acknowledged.
    fn spawn_path_then_ack(mut child_side: tokio::io::DuplexStream, path: &'static [u8]) {
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut marker = [0u8; 1];
            child_side.read_exact(&mut marker).await.unwrap();
            let mut addr = [0u8; 8];
            child_side.read_exact(&mut addr).await.unwrap();
            let mut len = [0u8; 4];
            child_side.read_exact(&mut len).await.unwrap();
            let mut padded = path.to_vec();
            padded.push(0);
            padded.resize(padded.len().max(1), 0);
            child_side.write_all(&(padded.len() as u32).to_ne_bytes()).await.unwrap();
            child_side.write_all(&padded).await.unwrap();
            child_side.flush().await.unwrap();

            loop {
                let mut marker = [0u8; 1];
                if child_side.read_exact(&mut marker).await.is_err() {
                    break;
                }
                let mut addr = [0u8; 8];
                child_side.read_exact(&mut addr).await.unwrap();
                let mut len = [0u8; 4];
                child_side.read_exact(&mut len).await.unwrap();
                let declared = u32::from_ne_bytes(len) as usize;
                let mut payload = vec![0u8; declared];
                child_side.read_exact(&mut payload).await.unwrap();
                child_side.write_u8(0).await.unwrap();
                child_side.flush().await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn stat64_on_existing_file_succeeds() {
        let mut heap = VirtualHeap::new();
        let mut errno = None;
        let mut vfs = VfsState::new(sample_root(), 3..49, 32);
        let config = SessionConfig::default();
        let mut output = Vec::new();

        let (child_side, host_side) = tokio::io::duplex(1024);
        spawn_path_then_ack(child_side, b"/bin/pypy");
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

        let layer = VfsLayer;
        let sig = Signature::parse("stat64(pp)i").unwrap();
        let args = vec![Value::Ptr(VAddr(8)), Value::Ptr(VAddr(16))];
        let chain: Vec<Arc<dyn Layer<Stream, tokio::io::Sink>>> = vec![Arc::new(VfsLayer)];
        let delegate = Delegate::new(&chain, 1);
        let result = layer.call(&sig, args, &mut ctx, delegate).await.unwrap();
        drop(ctx);
        assert_eq!(result, Value::Int(0));
        assert!(errno.is_none());
    }

    #[tokio::test]
    async fn stat64_on_missing_file_is_enoent() {
        let mut heap = VirtualHeap::new();
        let mut errno = None;
        let mut vfs = VfsState::new(sample_root(), 3..49, 32);
        let config = SessionConfig::default();
        let mut output = Vec::new();

        let (child_side, host_side) = tokio::io::duplex(1024);
        spawn_path_then_ack(child_side, b"/etc/passwd");
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

        let layer = VfsLayer;
        let sig = Signature::parse("stat64(pp)i").unwrap();
        let args = vec![Value::Ptr(VAddr(8)), Value::Ptr(VAddr(16))];
        let chain: Vec<Arc<dyn Layer<Stream, tokio::io::Sink>>> = vec![Arc::new(VfsLayer)];
        let delegate = Delegate::new(&chain, 1);
        let result = layer.call(&sig, args, &mut ctx, delegate).await.unwrap();
        drop(ctx);
        assert_eq!(result, Value::Int(-1));
        assert_eq!(errno, Some(Errno::NoEnt));
    }

    #[tokio::test]
    async fn open_rejects_write_flags_as_session_fatal() {
        let mut heap = VirtualHeap::new();
        let mut errno = None;
        let mut vfs = VfsState::new(sample_root(), 3..49, 32);
        let config = SessionConfig::default();
        let mut output = Vec::new();

        let (child_side, host_side) = tokio::io::duplex(1024);
        spawn_path_then_ack(child_side, b"/bin/pypy");
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

        let layer = VfsLayer;
        let sig = Signature::parse("open(pii)i").unwrap();
        let args = vec![Value::Ptr(VAddr(8)), Value::Int(libc::O_WRONLY as i64), Value::Int(0)];
        let chain: Vec<Arc<dyn Layer<Stream, tokio::io::Sink>>> = vec![Arc::new(VfsLayer)];
        let delegate = Delegate::new(&chain, 1);
        let result = layer.call(&sig, args, &mut ctx, delegate).await;
        assert!(matches!(result, Err(SessionError::WriteNotSupported { .. })));
    }

    #[tokio::test]
    async fn open_on_a_directory_is_eacces() {
        let mut heap = VirtualHeap::new();
        let mut errno = None;
        let mut vfs = VfsState::new(sample_root(), 3..49, 32);
        let config = SessionConfig::default();
        let mut output = Vec::new();

        let (child_side, host_side) = tokio::io::duplex(1024);
        spawn_path_then_ack(child_side, b"/bin");
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

        let layer = VfsLayer;
        let sig = Signature::parse("open(pii)i").unwrap();
        let args = vec![Value::Ptr(VAddr(8)), Value::Int(libc::O_RDONLY as i64), Value::Int(0)];
        let chain: Vec<Arc<dyn Layer<Stream, tokio::io::Sink>>> = vec![Arc::new(VfsLayer)];
        let delegate = Delegate::new(&chain, 1);
        let result = layer.call(&sig, args, &mut ctx, delegate).await.unwrap();
        drop(ctx);
        assert_eq!(result, Value::Int(-1));
        assert_eq!(errno, Some(Errno::Access));
    }
}
