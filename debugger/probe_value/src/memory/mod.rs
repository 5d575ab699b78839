//! Target memory access.
//!
//! Values never own target bytes. They hold a [`SharedMemory`] handle and
//! read through it on load, so one accessor (often a frame-window cache)
//! serves every value produced from a scope.

mod cache;
mod fake;

use std::sync::Arc;

pub use cache::{cache_memory, CachedMemory, MAX_FRAME_PREFETCH};
pub use fake::FakeMemory;

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests use unwrap to panic on unexpected state")]
mod tests;

/// Failure of a raw memory access.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("could not read {len} bytes at {addr:#x}")]
    Read { addr: u64, len: usize },

    #[error("could not write {len} bytes at {addr:#x}")]
    Write { addr: u64, len: usize },

    #[error("short read at {addr:#x}: wanted {want} bytes, got {got}")]
    Short { addr: u64, want: usize, got: usize },

    #[error("unsupported integer size {0}")]
    BadSize(i64),
}

/// Read/write access to the address space of the target.
pub trait MemoryReadWriter: Send + Sync {
    /// Fill `buf` from `addr`. Returns the number of bytes read.
    fn read_memory(&self, buf: &mut [u8], addr: u64) -> Result<usize, MemoryError>;

    /// Write `data` at `addr`. Returns the number of bytes written.
    fn write_memory(&self, addr: u64, data: &[u8]) -> Result<usize, MemoryError>;

    /// Drop any cached contents. Called after the target ran.
    fn invalidate(&self) {}
}

pub type SharedMemory = Arc<dyn MemoryReadWriter>;

/// Fill `buf` completely or fail.
pub fn read_exact(mem: &dyn MemoryReadWriter, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
    let got = mem.read_memory(buf, addr)?;
    if got < buf.len() {
        return Err(MemoryError::Short {
            addr,
            want: buf.len(),
            got,
        });
    }
    Ok(())
}

/// Little-endian unsigned integer of `size` bytes (1, 2, 4 or 8).
pub fn read_uint_raw(mem: &dyn MemoryReadWriter, addr: u64, size: i64) -> Result<u64, MemoryError> {
    if !matches!(size, 1 | 2 | 4 | 8) {
        return Err(MemoryError::BadSize(size));
    }
    let mut buf = [0u8; 8];
    read_exact(mem, addr, &mut buf[..size as usize])?;
    Ok(u64::from_le_bytes(buf))
}

/// Little-endian signed integer of `size` bytes, sign-extended to 64 bits.
pub fn read_int_raw(mem: &dyn MemoryReadWriter, addr: u64, size: i64) -> Result<i64, MemoryError> {
    let n = read_uint_raw(mem, addr, size)?;
    let shift = (64 - size * 8) as u32;
    Ok(((n << shift) as i64) >> shift)
}

/// Write the low `size` bytes of `value`, little-endian.
pub fn write_uint_raw(
    mem: &dyn MemoryReadWriter,
    addr: u64,
    value: u64,
    size: i64,
) -> Result<(), MemoryError> {
    if !matches!(size, 1 | 2 | 4 | 8) {
        return Err(MemoryError::BadSize(size));
    }
    let bytes = value.to_le_bytes();
    let data = &bytes[..size as usize];
    let n = mem.write_memory(addr, data)?;
    if n < data.len() {
        return Err(MemoryError::Write {
            addr,
            len: data.len(),
        });
    }
    Ok(())
}
