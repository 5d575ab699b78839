//! Type handle.
//!
//! Debug info describes recursive types (a list node pointing at its own
//! struct), so types are never linked by ownership. Every descriptor lives
//! in the [`TypeTable`](crate::TypeTable) and is referenced by a 32-bit
//! index; equality of two `Idx` values is identity of the descriptor, not
//! structural equality.

use std::fmt;

/// A 32-bit index into the type table.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Idx(u32);

impl Idx {
    /// Create an index from a raw value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Idx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Idx({})", self.0)
    }
}
