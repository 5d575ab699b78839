//! Frame-window cache.
//!
//! Locals of one frame sit in a small contiguous stack range, and a
//! typical evaluation touches many of them. The cache fetches the whole
//! window on first use and serves later reads from the copy. Writes go to
//! the target and patch the copy.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{MemoryError, MemoryReadWriter, SharedMemory};

/// Largest window worth caching.
pub const MAX_FRAME_PREFETCH: u64 = 1024 * 1024;

pub struct CachedMemory {
    inner: SharedMemory,
    base: u64,
    size: u64,
    window: Mutex<Option<Vec<u8>>>,
}

/// Wrap `mem` with a cache over `[base, base + size)`.
///
/// Windows that are empty or larger than [`MAX_FRAME_PREFETCH`] are not
/// worth it and return `mem` unchanged.
pub fn cache_memory(mem: SharedMemory, base: u64, size: u64) -> SharedMemory {
    if size == 0 || size > MAX_FRAME_PREFETCH {
        return mem;
    }
    Arc::new(CachedMemory {
        inner: mem,
        base,
        size,
        window: Mutex::new(None),
    })
}

impl CachedMemory {
    fn contains(&self, addr: u64, len: usize) -> bool {
        addr >= self.base
            && addr
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.base + self.size)
    }
}

impl MemoryReadWriter for CachedMemory {
    fn read_memory(&self, buf: &mut [u8], addr: u64) -> Result<usize, MemoryError> {
        if !self.contains(addr, buf.len()) {
            return self.inner.read_memory(buf, addr);
        }
        let mut window = self.window.lock();
        if window.is_none() {
            let mut data = vec![0u8; self.size as usize];
            let got = self.inner.read_memory(&mut data, self.base)?;
            if got < data.len() {
                // Partially mapped window; fall back to direct reads.
                drop(window);
                return self.inner.read_memory(buf, addr);
            }
            tracing::trace!(base = self.base, size = self.size, "frame window cached");
            *window = Some(data);
        }
        let off = (addr - self.base) as usize;
        match window.as_ref() {
            Some(data) => {
                buf.copy_from_slice(&data[off..off + buf.len()]);
                Ok(buf.len())
            }
            None => self.inner.read_memory(buf, addr),
        }
    }

    fn write_memory(&self, addr: u64, data: &[u8]) -> Result<usize, MemoryError> {
        let n = self.inner.write_memory(addr, data)?;
        if let Some(window) = self.window.lock().as_mut() {
            let lo = addr.max(self.base);
            let hi = (addr + n as u64).min(self.base + self.size);
            if lo < hi {
                let src = &data[(lo - addr) as usize..(hi - addr) as usize];
                window[(lo - self.base) as usize..(hi - self.base) as usize].copy_from_slice(src);
            }
        }
        Ok(n)
    }

    fn invalidate(&self) {
        *self.window.lock() = None;
        self.inner.invalidate();
    }
}
