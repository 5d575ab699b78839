//! Value comparison.
//!
//! Scalars compare through their constants. Aggregates compare
//! element-wise, but only `==` and `!=` are defined on them, and only
//! when enough of both sides has been loaded to decide.

use probe_stack::ensure_sufficient_stack;
use probe_types::Kind;

use super::Value;
use crate::config::LoadConfig;
use crate::constant::{compare, string_val, BinaryOp, Constant};
use crate::errors::{not_comparable, operator_not_defined, EvalError, EvalResult};

/// Evaluate `x op y` for a comparison operator. Both operands are
/// expected to have been type-negotiated.
pub fn compare_op(op: BinaryOp, x: &mut Value, y: &mut Value) -> EvalResult<bool> {
    ensure_sufficient_stack(|| compare_values(op, x, y))
}

fn compare_values(op: BinaryOp, x: &mut Value, y: &mut Value) -> EvalResult<bool> {
    match x.kind {
        k if k == Kind::Bool || k.is_numeric() => {
            return compare(payload(x), op, payload(y));
        }
        Kind::String => {
            if x.len != y.len {
                match op {
                    BinaryOp::Eq => return Ok(false),
                    BinaryOp::Ne => return Ok(true),
                    _ => {}
                }
            }
            x.load(&LoadConfig::FULL_VALUE_LONGER_STRINGS);
            y.load(&LoadConfig::FULL_VALUE_LONGER_STRINGS);
            let loaded = |v: &Value| v.value.as_ref().map_or(0, |c| string_val(c).len()) as i64;
            if loaded(x) != x.len || loaded(y) != y.len {
                return Err(EvalError::new("string too long for comparison"));
            }
            return compare(payload(x), op, payload(y));
        }
        _ => {}
    }

    if op != BinaryOp::Eq && op != BinaryOp::Ne {
        return Err(operator_not_defined(op.as_str(), x.kind.as_str()));
    }

    let eql = if x.is_nil_literal() {
        y.is_nil()
    } else if y.is_nil_literal() {
        x.is_nil()
    } else {
        match x.kind {
            Kind::Ptr | Kind::UnsafePointer => {
                x.load(&LoadConfig::SINGLE_VALUE);
                y.load(&LoadConfig::SINGLE_VALUE);
                let pointee = |v: &Value| v.children.first().map_or(0, |c| c.addr);
                pointee(x) == pointee(y)
            }
            Kind::Array => {
                if x.children.len() as i64 != x.len || y.children.len() as i64 != y.len {
                    return Err(EvalError::new("array too long for comparison"));
                }
                equal_children(x, y, true)?
            }
            Kind::Struct => {
                if x.children.len() != y.children.len() {
                    return Ok(op == BinaryOp::Ne);
                }
                if x.children.len() as i64 != x.len || y.children.len() as i64 != y.len {
                    return Err(EvalError::new("structure too deep for comparison"));
                }
                equal_children(x, y, false)?
            }
            Kind::Slice | Kind::Map | Kind::Func | Kind::Chan => {
                return Err(not_comparable(x.kind.as_str()));
            }
            Kind::Interface => {
                let (Some(xd), Some(yd)) = (x.children.first_mut(), y.children.first_mut()) else {
                    return Err(EvalError::new("interface not loaded for comparison"));
                };
                if xd.real_type_name() != yd.real_type_name() {
                    false
                } else if xd.kind == Kind::Invalid {
                    // both nil
                    true
                } else {
                    compare_op(BinaryOp::Eq, xd, yd)?
                }
            }
            k => {
                return Err(EvalError::new(format!(
                    "unimplemented comparison of {} variables",
                    k.as_str()
                )));
            }
        }
    };
    Ok(if op == BinaryOp::Eq { eql } else { !eql })
}

/// Pairwise equality of loaded children. With `short_circuit` the first
/// mismatch decides; otherwise every pair is still compared so an error in
/// a later pair is reported.
fn equal_children(x: &mut Value, y: &mut Value, short_circuit: bool) -> EvalResult<bool> {
    let mut r = true;
    for (xc, yc) in x.children.iter_mut().zip(y.children.iter_mut()) {
        let eq = compare_op(BinaryOp::Eq, xc, yc)?;
        r = r && eq;
        if !r && short_circuit {
            return Ok(false);
        }
    }
    Ok(r)
}

fn payload(v: &Value) -> &Constant {
    static UNKNOWN: Constant = Constant::Unknown;
    v.value.as_ref().unwrap_or(&UNKNOWN)
}
