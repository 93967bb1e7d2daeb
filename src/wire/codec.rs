//! Binary framing (§4.1).
//!
//! A request is `u32 signature-length, signature bytes, then one 8-byte
//! value per argument tag`; a reply is `one 8-byte value of the declared
//! result tag, then an i32 errno`. Both sides already agree on the
//! signature's tag sequence (the child compiled it in, the host parsed it
//! from the string), so nothing on the wire repeats a tag byte — the codec
//! is "purely type-driven by the signature letters it is told to expect"
//! (§4.1). Multi-byte fields are encoded native-endian, matching "integer
//! width and endianness match the child's platform ABI" (§6): host and
//! child run on the same machine, so this is simply the machine's own byte
//! order, via `byteorder::NativeEndian` the same way the teacher's
//! `serializer`/`parser` modules hand-declare their own wire byte order
//! rather than inherit whatever a generic I/O helper happens to default to.
//!
//! Memory side-channels (§3 "Virtual heap", §4.1 "inline memory ops") are
//! modeled as a tiny request/reply exchange nested inside the handling of
//! one top-level request: the host asks the child to hand over bytes at a
//! virtual address (`fetch`) or to store bytes there (`deliver`), and the
//! child answers before the host finishes replying to the original call.
//! This is the "multiplexed within the same pipe" side channel from §3.

use byteorder::{ByteOrder, NativeEndian};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::heap::VAddr;
use crate::wire::{Signature, Tag, Value};

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("child closed its output pipe")]
    Eof,
    #[error("malformed signature on the wire: {0:?}")]
    MalformedSignature(String),
    #[error("signature {0:?} is not valid as a request (void is not an argument tag)")]
    VoidArgument(String),
    #[error("child's memory reply was malformed")]
    MalformedMemReply,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Memory-side-channel marker bytes (§4.1).
const MEM_READ: u8 = b'R';
const MEM_WRITE: u8 = b'W';

/// Reads requests from and writes replies to a child's pipes.
pub struct Codec<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Codec<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Codec { reader, writer }
    }

    /// Flushes and shuts down the write half (§4.6 `close()`, §5 "the host
    /// may unilaterally terminate the child by closing its stdin"). The
    /// child sees this as EOF on its own read side the next time it reads.
    pub async fn shutdown_writer(&mut self) -> WireResult<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Reads a fixed-size native-endian integer field, mapping a clean EOF
    /// on the very first byte to [`WireError::Eof`] (§4.2: "the loop
    /// terminates on EOF from the child") and anything else (a partial
    /// frame) to an ordinary I/O error.
    async fn read_u32_field(&mut self) -> WireResult<u32> {
        let mut buf = [0u8; 4];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => Ok(NativeEndian::read_u32(&buf)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WireError::Eof),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_i64_field(&mut self) -> WireResult<i64> {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf).await?;
        Ok(NativeEndian::read_i64(&buf))
    }

    async fn read_u64_field(&mut self) -> WireResult<u64> {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf).await?;
        Ok(NativeEndian::read_u64(&buf))
    }

    async fn read_f64_field(&mut self) -> WireResult<f64> {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf).await?;
        Ok(NativeEndian::read_f64(&buf))
    }

    async fn write_u32_field(&mut self, v: u32) -> WireResult<()> {
        let mut buf = [0u8; 4];
        NativeEndian::write_u32(&mut buf, v);
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    async fn write_i64_field(&mut self, v: i64) -> WireResult<()> {
        let mut buf = [0u8; 8];
        NativeEndian::write_i64(&mut buf, v);
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    async fn write_u64_field(&mut self, v: u64) -> WireResult<()> {
        let mut buf = [0u8; 8];
        NativeEndian::write_u64(&mut buf, v);
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    async fn write_f64_field(&mut self, v: f64) -> WireResult<()> {
        let mut buf = [0u8; 8];
        NativeEndian::write_f64(&mut buf, v);
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    async fn write_i32_field(&mut self, v: i32) -> WireResult<()> {
        let mut buf = [0u8; 4];
        NativeEndian::write_i32(&mut buf, v);
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    /// Reads one request frame. Returns [`WireError::Eof`] specifically
    /// when the child closed its pipe cleanly before sending a single byte
    /// of the next frame (§4.2 "the loop terminates on EOF from the
    /// child").
    pub async fn read_request(&mut self) -> WireResult<(Signature, Vec<Value>)> {
        let sig_len = self.read_u32_field().await?;
        let mut sig_bytes = vec![0u8; sig_len as usize];
        self.reader.read_exact(&mut sig_bytes).await?;
        let sig_text = String::from_utf8(sig_bytes)
            .map_err(|_| WireError::MalformedSignature("<invalid utf8>".to_string()))?;
        let signature = Signature::parse(&sig_text)
            .ok_or_else(|| WireError::MalformedSignature(sig_text.clone()))?;

        let mut args = Vec::with_capacity(signature.args.len());
        for tag in &signature.args {
            args.push(self.read_value(*tag).await?);
        }
        Ok((signature, args))
    }

    async fn read_value(&mut self, tag: Tag) -> WireResult<Value> {
        Ok(match tag {
            Tag::Int => Value::Int(self.read_i64_field().await?),
            Tag::Ptr => Value::Ptr(VAddr(self.read_u64_field().await?)),
            Tag::Double => Value::Double(self.read_f64_field().await?),
            Tag::Void => return Err(WireError::VoidArgument(String::new())),
        })
    }

    /// Writes one reply frame: the result value followed by the current
    /// virtual errno (§3 "Message").
    pub async fn write_reply(&mut self, result: Value, errno: i32) -> WireResult<()> {
        match result {
            Value::Int(n) => self.write_i64_field(n).await?,
            Value::Ptr(addr) => self.write_u64_field(addr.0).await?,
            Value::Double(d) => self.write_f64_field(d).await?,
            Value::Void => {}
        }
        self.write_i32_field(errno).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Asks the child for `len` bytes at `addr` (§4.1 "read-N-bytes").
    pub async fn fetch(&mut self, addr: VAddr, len: usize) -> WireResult<Vec<u8>> {
        self.writer.write_u8(MEM_READ).await?;
        self.write_u64_field(addr.0).await?;
        self.write_u32_field(len as u32).await?;
        self.writer.flush().await?;

        let got_len = self.read_u32_field().await?;
        let mut buf = vec![0u8; got_len as usize];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Pushes `data` into the child's memory at `addr` (§4.1
    /// "write-N-bytes"), used whenever the host hands the child a pointer
    /// it must be able to dereference (allocate-on-host, `stat`/`dirent`
    /// output buffers, …).
    pub async fn deliver(&mut self, addr: VAddr, data: &[u8]) -> WireResult<()> {
        self.writer.write_u8(MEM_WRITE).await?;
        self.write_u64_field(addr.0).await?;
        self.write_u32_field(data.len() as u32).await?;
        self.writer.write_all(data).await?;
        self.writer.flush().await?;

        let ack = self.reader.read_u8().await?;
        if ack != 0 {
            return Err(WireError::MalformedMemReply);
        }
        Ok(())
    }
}
