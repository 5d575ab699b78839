use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use super::*;

/// Counts reads that reach the wrapped memory.
struct Counting {
    inner: FakeMemory,
    reads: AtomicUsize,
}

impl MemoryReadWriter for Counting {
    fn read_memory(&self, buf: &mut [u8], addr: u64) -> Result<usize, MemoryError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read_memory(buf, addr)
    }

    fn write_memory(&self, addr: u64, data: &[u8]) -> Result<usize, MemoryError> {
        self.inner.write_memory(addr, data)
    }
}

fn counting() -> Arc<Counting> {
    let inner = FakeMemory::new();
    inner.map(0x1000, (0..64).collect());
    Arc::new(Counting {
        inner,
        reads: AtomicUsize::new(0),
    })
}

#[test]
fn test_read_int_raw_sign_extends() {
    let mem = FakeMemory::new();
    mem.map(0x10, vec![0xff, 0x7f, 0, 0x80]);
    assert_eq!(read_int_raw(&mem, 0x10, 1).unwrap(), -1);
    assert_eq!(read_uint_raw(&mem, 0x10, 1).unwrap(), 0xff);
    assert_eq!(read_int_raw(&mem, 0x10, 2).unwrap(), 0x7fff);
    assert_eq!(read_int_raw(&mem, 0x10, 4).unwrap(), 0x8000_7fff_u32 as i32 as i64);
    assert_eq!(read_uint_raw(&mem, 0x10, 3), Err(MemoryError::BadSize(3)));
}

#[test]
fn test_unmapped_read_fails() {
    let mem = FakeMemory::new();
    mem.map_zeroed(0x100, 8);
    assert!(read_uint_raw(&mem, 0x104, 8).is_err());
    assert!(mem.contains(0x100, 8));
    assert!(!mem.contains(0x100, 9));
}

#[test]
fn test_cache_reads_window_once() {
    let raw = counting();
    let mem = cache_memory(raw.clone(), 0x1000, 32);
    assert_eq!(read_uint_raw(mem.as_ref(), 0x1000, 1).unwrap(), 0);
    assert_eq!(read_uint_raw(mem.as_ref(), 0x1008, 1).unwrap(), 8);
    assert_eq!(read_uint_raw(mem.as_ref(), 0x101f, 1).unwrap(), 31);
    assert_eq!(raw.reads.load(Ordering::Relaxed), 1);

    // outside the window
    assert_eq!(read_uint_raw(mem.as_ref(), 0x1020, 1).unwrap(), 32);
    assert_eq!(raw.reads.load(Ordering::Relaxed), 2);
}

#[test]
fn test_cache_write_through_and_invalidate() {
    let raw = counting();
    let mem = cache_memory(raw.clone(), 0x1000, 32);
    assert_eq!(read_uint_raw(mem.as_ref(), 0x1004, 1).unwrap(), 4);
    write_uint_raw(mem.as_ref(), 0x1004, 0xaa, 1).unwrap();
    assert_eq!(read_uint_raw(mem.as_ref(), 0x1004, 1).unwrap(), 0xaa);
    assert_eq!(read_uint_raw(&raw.inner, 0x1004, 1).unwrap(), 0xaa);
    assert_eq!(raw.reads.load(Ordering::Relaxed), 1);

    mem.invalidate();
    assert_eq!(read_uint_raw(mem.as_ref(), 0x1004, 1).unwrap(), 0xaa);
    assert_eq!(raw.reads.load(Ordering::Relaxed), 2);
}

#[test]
fn test_oversized_window_is_not_cached() {
    let raw = counting();
    let mem = cache_memory(raw.clone(), 0x1000, MAX_FRAME_PREFETCH + 1);
    read_uint_raw(mem.as_ref(), 0x1000, 1).unwrap();
    read_uint_raw(mem.as_ref(), 0x1000, 1).unwrap();
    assert_eq!(raw.reads.load(Ordering::Relaxed), 2);
}
