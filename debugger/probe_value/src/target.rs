//! Per-target shared state.
//!
//! A [`Target`] bundles what every value produced from one debugged
//! program needs to share: the type table, the architecture, the map
//! layout of the runtime, a registry of function entry points (to name
//! function values) and synthetic memory regions.

use std::sync::Arc;

use parking_lot::RwLock;
use probe_types::TypeTable;
use rustc_hash::FxHashMap;

use crate::arch::Arch;
use crate::map::{LinearMapLayout, MapLayout};
use crate::memory::SharedMemory;

struct FakeRegion {
    base: u64,
    size: u64,
    mem: SharedMemory,
}

pub struct Target {
    pub types: TypeTable,
    pub arch: Arch,
    map_layout: Box<dyn MapLayout>,
    fake_regions: RwLock<Vec<FakeRegion>>,
    functions: RwLock<FxHashMap<u64, String>>,
}

impl Target {
    pub fn new(arch: Arch) -> Arc<Self> {
        Self::with_map_layout(arch, Box::new(LinearMapLayout))
    }

    pub fn with_map_layout(arch: Arch, map_layout: Box<dyn MapLayout>) -> Arc<Self> {
        Arc::new(Self {
            types: TypeTable::new(arch.ptr_size()),
            arch,
            map_layout,
            fake_regions: RwLock::new(Vec::new()),
            functions: RwLock::new(FxHashMap::default()),
        })
    }

    #[inline]
    pub fn ptr_size(&self) -> i64 {
        self.arch.ptr_size()
    }

    pub fn map_layout(&self) -> &dyn MapLayout {
        self.map_layout.as_ref()
    }

    /// Register a synthetic memory region. Pointers cast from integers
    /// inside `[base, base + size)` read through `mem`.
    pub fn register_fake_memory(&self, base: u64, size: u64, mem: SharedMemory) {
        self.fake_regions.write().push(FakeRegion { base, size, mem });
    }

    pub fn fake_memory(&self, addr: u64) -> Option<SharedMemory> {
        self.fake_regions
            .read()
            .iter()
            .find(|r| addr >= r.base && addr - r.base < r.size)
            .map(|r| Arc::clone(&r.mem))
    }

    pub fn register_function(&self, entry: u64, name: impl Into<String>) {
        self.functions.write().insert(entry, name.into());
    }

    /// Name of the function whose entry point is `entry`.
    pub fn function_at(&self, entry: u64) -> Option<String> {
        self.functions.read().get(&entry).cloned()
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("arch", &self.arch.name())
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}
