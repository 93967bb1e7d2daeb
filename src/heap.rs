//! The virtual heap: an append-only mapping from integer virtual addresses
//! (as the child sees them) to host-side byte buffers.
//!
//! Nothing is ever truly freed for the life of a session — `free` is
//! advisory only (§3, §9). This sidesteps pointer-aliasing hazards on the
//! host: once a virtual address is handed to the child, the bytes behind it
//! never move and are never reused for something else.

use std::collections::HashMap;
use std::fmt;

/// An opaque integer handle naming a region of bytes owned by the host on
/// the child's behalf. `NULL` is the reserved address 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VAddr(pub u64);

impl VAddr {
    pub const NULL: VAddr = VAddr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for VAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Reasons a heap access can fail. These are session-fatal (§7 bullet 2):
/// a well-behaved child never references an address it wasn't given.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("read of unallocated address {0}")]
    Unallocated(VAddr),
    #[error("read of {len} bytes at {addr} overruns the {size}-byte allocation")]
    OutOfBounds { addr: VAddr, len: usize, size: usize },
}

/// Monotonically increasing virtual address allocator.
///
/// Addresses start at 8 (not 1) purely so that small integers accidentally
/// read back as pointers are visibly wrong during debugging; nothing in the
/// protocol depends on the starting value beyond it being non-zero.
pub struct VirtualHeap {
    next: u64,
    regions: HashMap<VAddr, Vec<u8>>,
}

impl Default for VirtualHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualHeap {
    pub fn new() -> Self {
        VirtualHeap { next: 8, regions: HashMap::new() }
    }

    /// Allocates a fresh, distinct virtual address backed by `bytes`.
    pub fn malloc(&mut self, bytes: impl Into<Vec<u8>>) -> VAddr {
        let bytes = bytes.into();
        let addr = VAddr(self.next);
        // Keep addresses distinguishable even for zero-length allocations.
        self.next += (bytes.len() as u64).max(1);
        self.regions.insert(addr, bytes);
        addr
    }

    /// Advisory free. A no-op placeholder by design (§9): the region stays
    /// resolvable for the remainder of the session.
    pub fn free(&mut self, _addr: VAddr) {}

    /// Reads `len` bytes starting at `addr`.
    pub fn read(&self, addr: VAddr, len: usize) -> Result<&[u8], HeapError> {
        if addr.is_null() {
            return Err(HeapError::Unallocated(addr));
        }
        let region = self.region_containing(addr).ok_or(HeapError::Unallocated(addr))?;
        let (base, bytes) = region;
        let offset = (addr.0 - base.0) as usize;
        let end = offset.checked_add(len).ok_or(HeapError::OutOfBounds {
            addr,
            len,
            size: bytes.len(),
        })?;
        bytes.get(offset..end).ok_or(HeapError::OutOfBounds { addr, len, size: bytes.len() })
    }

    /// Overwrites bytes at `addr` with `data`. `addr` must lie within a
    /// single existing allocation; this never extends or reshapes regions.
    pub fn write(&mut self, addr: VAddr, data: &[u8]) -> Result<(), HeapError> {
        if addr.is_null() {
            return Err(HeapError::Unallocated(addr));
        }
        let base = self
            .regions
            .keys()
            .copied()
            .filter(|k| *k <= addr)
            .max()
            .ok_or(HeapError::Unallocated(addr))?;
        let size = self.regions.get(&base).map(|b| b.len()).unwrap_or(0);
        let offset = (addr.0 - base.0) as usize;
        let end = offset
            .checked_add(data.len())
            .ok_or(HeapError::OutOfBounds { addr, len: data.len(), size })?;
        let region = self.regions.get_mut(&base).ok_or(HeapError::Unallocated(addr))?;
        let slot = region
            .get_mut(offset..end)
            .ok_or(HeapError::OutOfBounds { addr, len: data.len(), size })?;
        slot.copy_from_slice(data);
        Ok(())
    }

    fn region_containing(&self, addr: VAddr) -> Option<(VAddr, &[u8])> {
        let base = self.regions.keys().copied().filter(|k| *k <= addr).max()?;
        self.regions.get(&base).map(|bytes| (base, bytes.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_returns_distinct_addresses() {
        let mut heap = VirtualHeap::new();
        let a = heap.malloc(b"hello".to_vec());
        let b = heap.malloc(b"world".to_vec());
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_every_sub_slice() {
        let mut heap = VirtualHeap::new();
        let data = b"0123456789".to_vec();
        let addr = heap.malloc(data.clone());
        for start in 0..data.len() {
            for len in 0..(data.len() - start) {
                let a = VAddr(addr.0 + start as u64);
                let got = heap.read(a, len).unwrap();
                assert_eq!(got, &data[start..start + len]);
            }
        }
    }

    #[test]
    fn rejects_null_reads() {
        let heap = VirtualHeap::new();
        assert!(heap.read(VAddr::NULL, 1).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_reads() {
        let mut heap = VirtualHeap::new();
        let addr = heap.malloc(b"hi".to_vec());
        assert!(heap.read(addr, 100).is_err());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut heap = VirtualHeap::new();
        let addr = heap.malloc(vec![0u8; 4]);
        heap.write(addr, b"abcd").unwrap();
        assert_eq!(heap.read(addr, 4).unwrap(), b"abcd");
    }
}
