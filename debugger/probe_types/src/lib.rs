//! Type descriptors for the probe expression evaluator.
//!
//! The debug-info loader (outside this workspace) translates the target's
//! type information into [`TypeData`] entries of a [`TypeTable`]; the
//! evaluator adds the types it synthesizes while evaluating (pointer types
//! for `&x`, slice types for resliced arrays, fixed-size numeric types for
//! built-in results).
//!
//! # Architecture
//!
//! - [`Idx`]: 32-bit handle; the only way types refer to each other.
//! - [`TypeData`] / [`TypeKind`]: one descriptor and its structural shape.
//! - [`Kind`]: the reflection kind the evaluator dispatches on.
//! - [`same_type`] / [`cast_compatible`]: identity rules.

mod data;
mod identity;
mod idx;
mod kind;
mod table;

pub use data::{align_addr, Field, TypeData, TypeKind};
pub use identity::{cast_compatible, same_type};
pub use idx::Idx;
pub use kind::Kind;
pub use table::TypeTable;
