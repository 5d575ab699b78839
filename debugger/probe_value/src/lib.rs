//! Target values for the probe expression evaluator.
//!
//! This crate is the leaf of the evaluator: it knows how to read typed
//! values out of a stopped program and how to compare, index and write
//! them, but nothing about expressions, scopes or the debuggee's threads.
//!
//! # Architecture
//!
//! - [`Value`]: one runtime object, lazily loaded under a [`LoadConfig`].
//! - [`Constant`]: arbitrary-precision payload of loaded scalars and of
//!   evaluator-produced untyped constants.
//! - [`Target`]: state shared by every value of one program (type table,
//!   architecture, map layout, function names, synthetic regions).
//! - [`MemoryReadWriter`]: the address space. [`cache_memory`] wraps it
//!   with a window cache; [`FakeMemory`] backs synthetic regions.
//! - [`EvalError`]: the error type of every fallible operation, shared
//!   with the interpreter.

mod arch;
mod config;
pub mod constant;
pub mod errors;
mod flags;
mod map;
pub mod memory;
mod registers;
mod target;
mod value;

pub use arch::{valid_register_name, Arch, ArchFamily, ReturnConvention};
pub use config::{LoadConfig, MAX_MAP_BUCKETS_FACTOR};
pub use constant::{convert_int, BinaryOp, ConstKind, Constant, UnaryOp};
pub use errors::{ErrorCategory, EvalError, EvalErrorKind, EvalResult};
pub use flags::{LocalsFlags, ValueFlags};
pub use map::{LinearMapLayout, MapCursor, MapLayout, MapShape};
pub use memory::{
    cache_memory, FakeMemory, MemoryError, MemoryReadWriter, SharedMemory, MAX_FRAME_PREFETCH,
};
pub use registers::{DwarfRegisters, Register};
pub use target::Target;
pub use value::{compare_op, FloatSpecial, MapIterator, Value, FAKE_ADDRESS_UNRESOLV};
