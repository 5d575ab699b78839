//! Type identity.
//!
//! Two relations are needed by the evaluator:
//!
//! - [`same_type`]: assignment identity. Typedefs are stripped, pointer and
//!   slice types compare their element types recursively, and everything
//!   else compares by printed name. Debug info sometimes refers to a type
//!   through its typedef and sometimes directly, and synthesized pointer
//!   and slice types always go through the typedef, so identity on names of
//!   resolved types is the only reliable rule.
//! - [`cast_compatible`]: a conversion that only changes the type tag. Both
//!   types need the same size and alignment and then either the same name
//!   or the same structural shape.

use probe_stack::ensure_sufficient_stack;

use crate::{Idx, TypeKind, TypeTable};

/// Whether a value of type `b` may be stored where `a` is expected.
pub fn same_type(table: &TypeTable, a: Idx, b: Idx) -> bool {
    ensure_sufficient_stack(|| {
        let a = table.resolve_typedef(a);
        let b = table.resolve_typedef(b);
        let (ta, tb) = (table.get(a), table.get(b));
        match (&ta.kind, &tb.kind) {
            (TypeKind::Pointer { pointee: pa, .. }, TypeKind::Pointer { pointee: pb, .. }) => {
                same_type(table, *pa, *pb)
            }
            (TypeKind::Pointer { .. }, _) => false,
            (TypeKind::Slice { elem: ea }, TypeKind::Slice { elem: eb }) => {
                same_type(table, *ea, *eb)
            }
            (TypeKind::Slice { .. }, _) => false,
            _ => table.name(a) == table.name(b),
        }
    })
}

/// Whether a value of type `from` can be reinterpreted as `to` without
/// converting its bits. Both arguments are expected typedef-resolved.
pub fn cast_compatible(table: &TypeTable, from: Idx, to: Idx) -> bool {
    ensure_sufficient_stack(|| {
        let (t1, t2) = (table.get(from), table.get(to));
        if t1.size != t2.size || t1.align != t2.align {
            return false;
        }
        if table.name(from) == table.name(to) {
            return true;
        }
        match (&t1.kind, &t2.kind) {
            (TypeKind::Pointer { pointee: p1, .. }, TypeKind::Pointer { pointee: p2, .. }) => {
                let is_void =
                    |p: Idx| matches!(table.get(p).kind, TypeKind::Void);
                if is_void(*p1) || is_void(*p2) {
                    return true;
                }
                cast_compatible(table, table.resolve_typedef(*p1), table.resolve_typedef(*p2))
            }
            (TypeKind::Struct { fields: f1 }, TypeKind::Struct { fields: f2 }) => f1 == f2,
            (TypeKind::String, TypeKind::String)
            | (TypeKind::Complex, TypeKind::Complex)
            | (TypeKind::Float, TypeKind::Float)
            | (TypeKind::Int, TypeKind::Int)
            | (TypeKind::Uint, TypeKind::Uint)
            | (TypeKind::Bool, TypeKind::Bool) => true,
            _ => false,
        }
    })
}
