//! Map iteration.
//!
//! The in-memory layout of maps belongs to the debuggee's runtime and
//! changes between releases, so the evaluator only sees a cursor over
//! (key address, value address) pairs. [`LinearMapLayout`] is the layout
//! used by the bundled runtime shim and by tests: the map word points to a
//! header of two words, `count` and `entries`, and `entries` points to
//! `count` packed slots of key followed by value.

use probe_types::align_addr;

use crate::errors::EvalResult;
use crate::memory::{read_int_raw, read_uint_raw, MemoryReadWriter};

/// Sizes needed to walk the entries of one map type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MapShape {
    pub key_size: i64,
    pub key_align: i64,
    pub value_size: i64,
    pub value_align: i64,
    pub ptr_size: i64,
}

pub trait MapLayout: Send + Sync {
    /// Start iterating the map whose header is at `header` (non-zero).
    fn open(
        &self,
        mem: &dyn MemoryReadWriter,
        header: u64,
        shape: MapShape,
    ) -> EvalResult<Box<dyn MapCursor>>;
}

pub trait MapCursor {
    /// Number of entries in the map.
    fn count(&self) -> i64;

    /// Addresses of the next key and value.
    fn next_entry(&mut self) -> Option<(u64, u64)>;
}

pub struct LinearMapLayout;

struct LinearCursor {
    count: i64,
    next: i64,
    entries: u64,
    slot: u64,
    value_offset: u64,
}

impl MapLayout for LinearMapLayout {
    fn open(
        &self,
        mem: &dyn MemoryReadWriter,
        header: u64,
        shape: MapShape,
    ) -> EvalResult<Box<dyn MapCursor>> {
        let count = read_int_raw(mem, header, shape.ptr_size)?;
        let entries = read_uint_raw(mem, header + shape.ptr_size as u64, shape.ptr_size)?;
        let value_offset = align_addr(shape.key_size, shape.value_align);
        let slot = align_addr(
            value_offset + shape.value_size,
            shape.key_align.max(shape.value_align),
        );
        Ok(Box::new(LinearCursor {
            count: count.max(0),
            next: 0,
            entries,
            slot: slot as u64,
            value_offset: value_offset as u64,
        }))
    }
}

impl MapCursor for LinearCursor {
    fn count(&self) -> i64 {
        self.count
    }

    fn next_entry(&mut self) -> Option<(u64, u64)> {
        if self.next >= self.count {
            return None;
        }
        let key = self.entries + self.next as u64 * self.slot;
        self.next += 1;
        Some((key, key + self.value_offset))
    }
}
