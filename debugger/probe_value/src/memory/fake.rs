//! In-process address space.
//!
//! Backs synthetic regions the debugger fabricates (values with a fake
//! address) and serves as the target memory in tests. A region built for
//! a register-resident composite can fall back to real target memory, so
//! pointers inside it still dereference.

use parking_lot::RwLock;

use super::{MemoryError, MemoryReadWriter, SharedMemory};

#[derive(Default)]
pub struct FakeMemory {
    regions: RwLock<Vec<Region>>,
    fallback: Option<SharedMemory>,
}

struct Region {
    base: u64,
    data: Vec<u8>,
}

impl Region {
    fn range(&self, addr: u64, len: usize) -> Option<std::ops::Range<usize>> {
        let off = addr.checked_sub(self.base)? as usize;
        let end = off.checked_add(len)?;
        (end <= self.data.len()).then_some(off..end)
    }
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unmapped accesses go to `fallback` instead of failing.
    pub fn with_fallback(fallback: SharedMemory) -> Self {
        Self {
            regions: RwLock::default(),
            fallback: Some(fallback),
        }
    }

    /// Map `data` at `base`. Later mappings shadow earlier ones.
    pub fn map(&self, base: u64, data: Vec<u8>) {
        self.regions.write().push(Region { base, data });
    }

    /// Map `size` zero bytes at `base`.
    pub fn map_zeroed(&self, base: u64, size: usize) {
        self.map(base, vec![0; size]);
    }

    /// Whether `[addr, addr + len)` is mapped.
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        self.regions
            .read()
            .iter()
            .any(|r| r.range(addr, len).is_some())
    }

    pub fn write_u64(&self, addr: u64, v: u64) -> Result<(), MemoryError> {
        self.write_memory(addr, &v.to_le_bytes()).map(|_| ())
    }
}

impl MemoryReadWriter for FakeMemory {
    fn read_memory(&self, buf: &mut [u8], addr: u64) -> Result<usize, MemoryError> {
        let regions = self.regions.read();
        for region in regions.iter().rev() {
            if let Some(range) = region.range(addr, buf.len()) {
                buf.copy_from_slice(&region.data[range]);
                return Ok(buf.len());
            }
        }
        if let Some(fallback) = &self.fallback {
            return fallback.read_memory(buf, addr);
        }
        Err(MemoryError::Read {
            addr,
            len: buf.len(),
        })
    }

    fn write_memory(&self, addr: u64, data: &[u8]) -> Result<usize, MemoryError> {
        let mut regions = self.regions.write();
        for region in regions.iter_mut().rev() {
            if let Some(range) = region.range(addr, data.len()) {
                region.data[range].copy_from_slice(data);
                return Ok(data.len());
            }
        }
        if let Some(fallback) = &self.fallback {
            return fallback.write_memory(addr, data);
        }
        Err(MemoryError::Write {
            addr,
            len: data.len(),
        })
    }
}

impl std::fmt::Debug for FakeMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let regions = self.regions.read();
        let mut list = f.debug_list();
        for r in regions.iter() {
            list.entry(&format_args!("{:#x}+{}", r.base, r.data.len()));
        }
        list.finish()
    }
}
