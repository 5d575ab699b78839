//! Type descriptors.

use crate::Idx;

/// A struct member as recorded in debug info.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: Idx,
    /// Byte offset from the start of the struct.
    pub offset: i64,
    /// Set for anonymous members whose fields and methods are promoted.
    pub embedded: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Idx, offset: i64) -> Self {
        Self {
            name: name.into(),
            ty,
            offset,
            embedded: false,
        }
    }

    #[must_use]
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }
}

/// Structural shape of a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Bool,
    /// Signed integer; width comes from the descriptor size.
    Int,
    /// Unsigned integer; width comes from the descriptor size.
    Uint,
    Float,
    Complex,
    String,
    UnsafePointer,
    Pointer {
        pointee: Idx,
        /// Pointer from a C compilation unit: indexable without bounds.
        c_style: bool,
    },
    Array {
        elem: Idx,
        count: i64,
        stride: i64,
    },
    Slice {
        elem: Idx,
    },
    Struct {
        fields: Vec<Field>,
    },
    Map {
        key: Idx,
        value: Idx,
    },
    Chan {
        elem: Idx,
    },
    Interface {
        /// `interface {}`: the first word is a type descriptor, not an itab.
        empty: bool,
    },
    Func,
    Typedef {
        target: Idx,
    },
}

/// One entry of the type table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeData {
    /// Printed name; empty for anonymous types, which are named structurally.
    pub name: String,
    pub size: i64,
    pub align: i64,
    pub kind: TypeKind,
}

impl TypeData {
    pub fn new(name: impl Into<String>, size: i64, align: i64, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            size,
            align,
            kind,
        }
    }

    /// A scalar whose alignment equals its size.
    pub fn basic(name: impl Into<String>, kind: TypeKind, size: i64) -> Self {
        Self::new(name, size, size.max(1), kind)
    }
}

/// Round `addr` up to the next multiple of `align`.
#[inline]
pub fn align_addr(addr: i64, align: i64) -> i64 {
    if align <= 1 {
        return addr;
    }
    (addr + align - 1) & !(align - 1)
}
