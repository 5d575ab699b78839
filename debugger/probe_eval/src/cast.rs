//! Type conversions `T(x)`.
//!
//! A conversion between types with the same layout only retags the
//! value. Everything else builds a fresh loaded value: numeric
//! conversions wrap or truncate, integers become pointers (looked up in
//! synthetic regions first), and strings convert to and from byte and
//! rune slices.

use std::sync::Arc;

use probe_types::{cast_compatible, Idx, Kind, TypeKind};
use probe_value::constant::{
    float64_val, int64_val, make_int64, make_string, make_uint64, string_val, uint64_val,
};
use probe_value::errors::cannot_convert;
use probe_value::{convert_int, EvalResult, LoadConfig, Value};

use crate::scope::EvalScope;

/// Convert `arg` to `ty`. `expr` is the argument's source text.
pub(crate) fn eval_type_cast(
    scope: &EvalScope,
    ty: Idx,
    expr: &str,
    mut arg: Value,
) -> EvalResult<Value> {
    let types = scope.types();
    let real = types.resolve_typedef(ty);
    let conv_err = || cannot_convert(expr, &types.name(real));

    if arg
        .real_type
        .is_some_and(|from| cast_compatible(types, types.resolve_typedef(from), real))
    {
        if let TypeKind::Pointer { pointee, .. } = types.get(real).kind {
            if arg.kind == Kind::Ptr && arg.loaded && !arg.children.is_empty() {
                let child = &arg.children[0];
                let mut retyped = child.spawn(child.name.clone(), child.addr, pointee);
                retyped.only_addr = true;
                arg.children[0] = retyped;
            }
        }
        arg.real_type = Some(real);
        arg.declared_type = Some(ty);
        return Ok(arg);
    }

    let mut v = scope.value("", 0, ty);
    v.loaded = true;

    match types.get(real).kind {
        TypeKind::Pointer { pointee, .. } => {
            if !arg.kind.is_integer() {
                return Err(conv_err());
            }
            arg.load(&LoadConfig::SINGLE_VALUE);
            arg.check_readable()?;
            let n = arg.value.as_ref().map_or(0, |c| int64_val(c).0) as u64;
            let mem = scope
                .target()
                .fake_memory(n)
                .unwrap_or_else(|| Arc::clone(&scope.mem));
            let mut child = Value::new("", n, pointee, mem, scope.target());
            child.only_addr = true;
            v.children = vec![child];
            v.len = 1;
            return Ok(v);
        }
        TypeKind::Uint => {
            arg.load(&LoadConfig::SINGLE_VALUE);
            arg.check_readable()?;
            let size = types.size(real);
            let c = arg.value.as_ref();
            let n = match arg.kind {
                k if k.is_signed() => {
                    Some(convert_int(c.map_or(0, |c| int64_val(c).0) as u64, false, size))
                }
                k if k.is_unsigned() => {
                    Some(convert_int(c.map_or(0, |c| uint64_val(c).0), false, size))
                }
                k if k.is_float() => Some(c.map_or(0.0, |c| float64_val(c).0) as u64),
                Kind::Ptr => Some(arg.children.first().map_or(0, |c| c.addr)),
                _ => None,
            };
            if let Some(n) = n {
                v.value = Some(make_uint64(n));
                return Ok(v);
            }
        }
        TypeKind::Int => {
            arg.load(&LoadConfig::SINGLE_VALUE);
            arg.check_readable()?;
            let size = types.size(real);
            let c = arg.value.as_ref();
            let n = match arg.kind {
                k if k.is_signed() => {
                    Some(convert_int(c.map_or(0, |c| int64_val(c).0) as u64, true, size) as i64)
                }
                k if k.is_unsigned() => {
                    Some(convert_int(c.map_or(0, |c| uint64_val(c).0), true, size) as i64)
                }
                k if k.is_float() => Some(c.map_or(0.0, |c| float64_val(c).0) as i64),
                _ => None,
            };
            if let Some(n) = n {
                v.value = Some(make_int64(n));
                return Ok(v);
            }
        }
        TypeKind::Float | TypeKind::Complex => {
            arg.load(&LoadConfig::SINGLE_VALUE);
            arg.check_readable()?;
            if arg.kind.is_integer() || arg.kind.is_float() {
                v.value = arg.value.take();
                return Ok(v);
            }
        }
        _ => {}
    }

    let mut cfg = scope.load_cfg.unwrap_or(LoadConfig::FULL_VALUE);

    match types.get(real).kind {
        TypeKind::Slice { elem } => {
            let elem_kind = types.kind(elem);
            if arg.kind != Kind::String || !matches!(elem_kind, Kind::Uint8 | Kind::Int32) {
                return Err(conv_err());
            }
            if elem_kind == Kind::Uint8 {
                // string to []byte
                cfg.max_string_len = cfg.max_array_values;
                arg.load(&cfg);
                arg.check_readable()?;
                let bytes = arg.value.as_ref().map(string_val).unwrap_or_default();
                v.children = bytes
                    .iter()
                    .enumerate()
                    .map(|(i, &b)| loaded_elem(&arg, i, elem, i64::from(b)))
                    .collect();
                v.len = arg.len;
            } else {
                // string to []rune
                arg.load(&cfg);
                arg.check_readable()?;
                let bytes = arg.value.as_ref().map(string_val).unwrap_or_default();
                let text = String::from_utf8_lossy(bytes);
                v.children = text
                    .char_indices()
                    .map(|(i, ch)| loaded_elem(&arg, i, elem, i64::from(u32::from(ch))))
                    .collect();
                v.len = v.children.len() as i64;
            }
            v.cap = v.len;
            Ok(v)
        }
        TypeKind::String => match arg.kind {
            Kind::String => {
                arg.declared_type = v.declared_type;
                arg.real_type = v.real_type;
                Ok(arg)
            }
            k if k.is_integer() => {
                arg.load(&cfg);
                arg.check_readable()?;
                let n = arg.value.as_ref().map_or(0, |c| int64_val(c).0);
                let s = u32::try_from(n)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
                    .to_string();
                v.len = s.len() as i64;
                v.value = Some(make_string(s));
                Ok(v)
            }
            Kind::Slice | Kind::Array => {
                let Some(elem) = arg.elem_type else {
                    return Err(conv_err());
                };
                let elem_name = types.name(elem);
                let (bytes, runes) = match types.get(types.resolve_typedef(elem)).kind {
                    TypeKind::Uint if elem_name == "uint8" || elem_name == "byte" => (true, false),
                    TypeKind::Int if elem_name == "int32" || elem_name == "rune" => (false, true),
                    _ => (false, false),
                };
                if !bytes && !runes {
                    return Err(conv_err());
                }
                cfg.max_array_values = cfg.max_string_len;
                arg.load(&cfg);
                arg.check_readable()?;
                let codes = arg
                    .children
                    .iter()
                    .map(|c| c.value.as_ref().map_or(0, |c| int64_val(c).0));
                if bytes {
                    let buf: Vec<u8> = codes.map(|n| n as u8).collect();
                    v.value = Some(make_string(buf));
                    v.len = arg.len;
                } else {
                    let s: String = codes
                        .map(|n| {
                            u32::try_from(n)
                                .ok()
                                .and_then(char::from_u32)
                                .unwrap_or(char::REPLACEMENT_CHARACTER)
                        })
                        .collect();
                    // byte length of what was loaded, not of the whole slice
                    v.len = s.len() as i64;
                    v.value = Some(make_string(s));
                }
                Ok(v)
            }
            _ => Err(conv_err()),
        },
        _ => Err(conv_err()),
    }
}

fn loaded_elem(src: &Value, offset: usize, elem: Idx, code: i64) -> Value {
    let mut e = src.spawn("", src.addr + offset as u64, elem);
    e.loaded = true;
    e.value = Some(make_int64(code));
    e
}
