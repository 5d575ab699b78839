//! Selectors, indexing, slicing, type assertions and pointer operations.

use std::collections::VecDeque;

use probe_stack::ensure_sufficient_stack;
use probe_types::{Idx, Kind, TypeKind};
use probe_value::errors::{
    cannot_dereference, cannot_index, cannot_slice, cannot_take_address,
    does_not_support_indexing, map_high_bound, map_index_out_of_bounds, nil_cannot_be_dereferenced,
    nil_pointer_dereference, not_a_struct, not_an_interface,
};
use probe_value::{EvalError, EvalResult, LoadConfig, Value, ValueFlags};
use rustc_hash::FxHashSet;

use crate::scope::EvalScope;

/// `x.name`: a register view, a method value or a struct member.
pub(crate) fn eval_select(scope: &EvalScope, name: &str, mut x: Value) -> EvalResult<Value> {
    if x.addr == 0 && x.name == "nil" {
        return Err(not_a_struct(&x.name, &x.type_string()));
    }
    if x.is_fake_placeholder() && x.real_type.is_none() {
        let shown = x
            .value
            .as_ref()
            .map_or_else(|| "<nil>".to_string(), ToString::to_string);
        return Err(not_a_struct(&shown, &x.type_string()));
    }
    if x.flags.contains(ValueFlags::CPU_REGISTER) && !x.loaded {
        return x.register_type_conv(name);
    }
    if let Some(method) = find_method(scope, &mut x, name)? {
        return Ok(method);
    }
    x.struct_member(name)
}

/// The method `name` of `v`, bound to `v` as its only child.
///
/// Methods declared on embedded fields are found breadth first. Value
/// receivers (`pkg.T.m`) receive the pointee of a pointer, pointer
/// receivers (`pkg.(*T).m`) the address of a non-pointer.
fn find_method(scope: &EvalScope, v: &mut Value, name: &str) -> EvalResult<Option<Value>> {
    if v.kind == Kind::Interface {
        v.load_interface(0, false, &LoadConfig::FULL_VALUE);
        v.check_readable()?;
        return match v.children.first() {
            Some(data) if data.real_type.is_some() => {
                let mut data = data.clone();
                ensure_sufficient_stack(|| find_method(scope, &mut data, name))
            }
            _ => Ok(None),
        };
    }

    let types = scope.types();
    let di = scope.debug_info();
    let mut queue = VecDeque::from([v.clone()]);
    let mut seen: FxHashSet<String> = FxHashSet::default();
    while let Some(cur) = queue.pop_front() {
        let (Some(real), Some(declared)) = (cur.real_type, cur.declared_type) else {
            continue;
        };
        if !seen.insert(types.name(real)) {
            continue;
        }
        let (recv_ty, is_ptr): (Idx, bool) = match types.get(declared).kind {
            TypeKind::Pointer { pointee, .. } => (pointee, true),
            _ => (declared, false),
        };
        let type_path = types.name(recv_ty);
        if let Some(dot) = type_path.rfind('.') {
            let (pkg, recv) = (&type_path[..dot], &type_path[dot + 1..]);
            if let Some(f) = di.lookup_function(&format!("{pkg}.{recv}.{name}")) {
                let mut r = scope.method_value(f)?;
                r.children.push(if is_ptr { cur.maybe_dereference() } else { cur.clone() });
                return Ok(Some(r));
            }
            if let Some(f) = di.lookup_function(&format!("{pkg}.(*{recv}).{name}")) {
                let mut r = scope.method_value(f)?;
                r.children.push(if is_ptr { cur.clone() } else { cur.clone().pointer_to() });
                return Ok(Some(r));
            }
        } else {
            // no package qualifier: a C type, which has no methods
            continue;
        }

        let mut sv = cur.maybe_dereference();
        sv.name.clone_from(&cur.name);
        if sv.unreadable.is_some() {
            return Ok(Some(sv));
        }
        let Some(sv_real) = sv.real_type else {
            continue;
        };
        if let TypeKind::Struct { fields } = &types.get(sv_real).kind {
            for field in fields.iter().filter(|f| f.embedded) {
                queue.push_back(sv.to_field(field)?);
            }
        }
    }
    Ok(None)
}

/// `x.(T)`; `ty` is `None` for a type the debug info does not know, in
/// which case any non-nil dynamic type is accepted.
pub(crate) fn eval_type_assert(
    ty: Option<Idx>,
    expr: &str,
    type_expr: &str,
    mut x: Value,
) -> EvalResult<Value> {
    if x.kind != Kind::Interface {
        return Err(not_an_interface(expr));
    }
    x.load_interface(0, false, &LoadConfig::FULL_VALUE);
    x.check_readable()?;
    let iface = x.type_string();
    let Some(mut data) = x.children.into_iter().next() else {
        return Err(EvalError::new(format!("interface conversion: {iface} is nil, not {type_expr}")));
    };
    data.check_readable()?;
    if data.addr == 0 {
        return Err(EvalError::new(format!("interface conversion: {iface} is nil, not {type_expr}")));
    }
    if let Some(ty) = ty {
        let want = data.types().name(ty);
        if data.declared_type.map(|t| data.types().name(t)).as_deref() != Some(want.as_str()) {
            return Err(EvalError::new(format!(
                "interface conversion: {iface} is {}, not {want}",
                data.type_string()
            )));
        }
    }
    // the caller loads the result, so it must not stay address-only
    data.only_addr = false;
    Ok(data)
}

/// `x[idx]` on arrays, slices, strings, pointers to arrays, C pointers
/// and maps.
pub(crate) fn eval_index(expr: &str, x: Value, mut idx: Value) -> EvalResult<Value> {
    x.check_readable()?;
    let c_ptr = x.flags.contains(ValueFlags::C_PTR);
    let mut x = if c_ptr { x } else { x.maybe_dereference() };

    match x.kind {
        Kind::Ptr => {
            if x.is_nil_literal() {
                return Err(does_not_support_indexing(expr, &x.type_string()));
            }
            if !c_ptr {
                let array_ptr = x.real_type.is_some_and(|t| {
                    let types = x.types();
                    match types.get(t).kind {
                        TypeKind::Pointer { pointee, .. } => matches!(
                            types.get(types.resolve_typedef(pointee)).kind,
                            TypeKind::Array { .. }
                        ),
                        _ => false,
                    }
                });
                if !array_ptr {
                    return Err(does_not_support_indexing(expr, &x.type_string()));
                }
                x = x.maybe_dereference();
            }
            sequence_index(expr, &x, &mut idx)
        }
        Kind::Slice | Kind::Array | Kind::String => sequence_index(expr, &x, &mut idx),
        Kind::Map => {
            idx.load(&LoadConfig::FULL_VALUE);
            idx.check_readable()?;
            x.map_access(&mut idx)
        }
        _ => Err(does_not_support_indexing(expr, &x.type_string())),
    }
}

fn sequence_index(expr: &str, x: &Value, idx: &mut Value) -> EvalResult<Value> {
    if x.base == 0 {
        return Err(cannot_index(expr));
    }
    let n = idx.as_int()?;
    x.slice_access(n)
}

/// `x[low:high]`. Without `high` the slice extends to the end. On maps
/// `low` skips that many entries and `high` must be absent, so `m[0:]`
/// is the whole map.
pub(crate) fn eval_reslice(
    expr: &str,
    mut x: Value,
    mut low: Value,
    high: Option<Value>,
) -> EvalResult<Value> {
    let low = low.as_int()?;
    let has_high = high.is_some();
    let high = match high {
        Some(mut h) => Some(h.as_int()?),
        None => None,
    };
    x.check_readable()?;
    let high = high.unwrap_or(x.len);

    match x.kind {
        Kind::Slice | Kind::Array | Kind::String => {
            if x.base == 0 {
                return Err(cannot_slice(expr, None));
            }
            x.reslice(low, high)
        }
        Kind::Map => {
            if has_high {
                return Err(map_high_bound());
            }
            x.map_skip += low;
            // reads the map length
            let _ = x.map_iterator(0);
            if x.map_skip >= x.len {
                return Err(map_index_out_of_bounds());
            }
            Ok(x)
        }
        Kind::Ptr if x.flags.contains(ValueFlags::C_PTR) => x.reslice(low, high),
        _ => Err(cannot_slice(expr, Some(&x.type_string()))),
    }
}

/// `*x`.
pub(crate) fn eval_pointer_deref(expr: &str, mut x: Value) -> EvalResult<Value> {
    if x.kind != Kind::Ptr {
        return Err(cannot_dereference(expr, &x.type_string()));
    }
    if x.is_nil_literal() {
        return Err(nil_cannot_be_dereferenced());
    }
    if x.children.len() == 1 {
        // pointers built by a cast from an integer already carry the pointee
        let mut child = x.children.remove(0);
        child.only_addr = false;
        return Ok(child);
    }
    x.load(&LoadConfig::SINGLE_VALUE);
    if let Some(err) = &x.unreadable {
        return Err(EvalError::new(format!("couldn't read pointer: {err}")));
    }
    let Some(mut pointee) = x.children.into_iter().next() else {
        return Err(nil_pointer_dereference());
    };
    if pointee.addr == 0 {
        return Err(nil_pointer_dereference());
    }
    pointee.only_addr = false;
    Ok(pointee)
}

/// `&x`.
pub(crate) fn eval_addr_of(expr: &str, x: Value) -> EvalResult<Value> {
    if x.addr == 0 || x.declared_type.is_none() {
        return Err(cannot_take_address(expr));
    }
    Ok(x.pointer_to())
}
