//! Unary and binary operators on values.
//!
//! Operands are loaded, their types negotiated, and the operation carried
//! out on their constants with unbounded precision. A result with a
//! concrete integer type is then wrapped to that type's width, which
//! reproduces the target's overflow behavior.

use probe_types::{Idx, Kind, TypeKind};
use probe_value::constant::{
    binary_op, int64_val, make_uint64, quo_int, sign, uint64_val, unary_op,
};
use probe_value::errors::{mismatched_types, non_finite_float, operator_not_applicable};
use probe_value::{
    compare_op, convert_int, BinaryOp, ConstKind, Constant, EvalError, EvalResult, FloatSpecial,
    LoadConfig, UnaryOp, Value,
};

use crate::scope::EvalScope;

/// `op x`.
pub(crate) fn eval_unary(
    scope: &EvalScope,
    op: UnaryOp,
    expr: &str,
    mut x: Value,
) -> EvalResult<Value> {
    x.load(&LoadConfig::SINGLE_VALUE);
    x.check_readable()?;
    if x.float_special != FloatSpecial::None {
        return Err(non_finite_float());
    }
    let Some(c) = &x.value else {
        return Err(operator_not_applicable(op.as_str(), expr));
    };
    let rc = unary_op(op, c, 0)?;
    match x.declared_type {
        Some(ty) => {
            let mut r = scope.value("", 0, ty);
            r.value = Some(rc);
            Ok(r)
        }
        None => Ok(scope.constant(rc)),
    }
}

/// The type of `x op y`: `None` for untyped constant arithmetic and for
/// comparisons against `nil`.
pub(crate) fn negotiate_type(op: BinaryOp, x: &Value, y: &Value) -> EvalResult<Option<Idx>> {
    if x.is_nil_literal() {
        negotiate_type_nil(op, y)?;
        return Ok(None);
    }
    if y.is_nil_literal() {
        negotiate_type_nil(op, x)?;
        return Ok(None);
    }

    if op.is_shift() {
        if x.value.as_ref().map(Constant::kind) != Some(ConstKind::Int) {
            return Err(EvalError::new(format!("shift of type {}", x.kind)));
        }
        match y.kind {
            k if k.is_unsigned() => {}
            k if k.is_signed() => {
                if y.value.as_ref().is_some_and(|c| sign(c) < 0) {
                    return Err(EvalError::new("shift count must not be negative"));
                }
            }
            k => {
                return Err(EvalError::new(format!(
                    "shift count type {k}, must be unsigned integer"
                )))
            }
        }
        return Ok(x.declared_type);
    }

    match (x.declared_type, y.declared_type) {
        (None, None) => Ok(None),
        (Some(xt), Some(yt)) => {
            let (xn, yn) = (x.types().name(xt), x.types().name(yt));
            if xn != yn {
                return Err(mismatched_types(&xn, &yn));
            }
            Ok(Some(xt))
        }
        (Some(xt), None) => {
            y.is_type(Some(xt), x.kind)?;
            Ok(Some(xt))
        }
        (None, Some(yt)) => {
            x.is_type(Some(yt), y.kind)?;
            Ok(Some(yt))
        }
    }
}

fn negotiate_type_nil(op: BinaryOp, v: &Value) -> EvalResult<()> {
    if op != BinaryOp::Eq && op != BinaryOp::Ne {
        return Err(EvalError::new(format!(
            "operator {op} can not be applied to \"nil\""
        )));
    }
    if v.kind.is_nilable() {
        Ok(())
    } else {
        Err(EvalError::new(format!("can not compare {} to nil", v.kind)))
    }
}

/// `x op y`. `x_expr` and `y_expr` are the operands' source text, for
/// error messages.
pub(crate) fn eval_binary(
    scope: &EvalScope,
    op: BinaryOp,
    mut x: Value,
    mut y: Value,
    x_expr: &str,
    y_expr: &str,
) -> EvalResult<Value> {
    // strings are loaded only once it is known how much of them is needed
    if x.kind != Kind::String {
        x.load(&LoadConfig::FULL_VALUE);
    }
    x.check_readable()?;
    if y.kind != Kind::String {
        y.load(&LoadConfig::FULL_VALUE);
    }
    y.check_readable()?;

    if x.float_special != FloatSpecial::None || y.float_special != FloatSpecial::None {
        return Err(non_finite_float());
    }

    let ty = negotiate_type(op, &x, &y)?;

    if op.is_comparison() {
        let r = compare_op(op, &mut x, &mut y)?;
        return Ok(scope.constant(Constant::Bool(r)));
    }

    if x.kind == Kind::String {
        x.load(&LoadConfig::FULL_VALUE_LONGER_STRINGS);
    }
    if y.kind == Kind::String {
        y.load(&LoadConfig::FULL_VALUE_LONGER_STRINGS);
    }
    let Some(xc) = &x.value else {
        return Err(operator_not_applicable(op.as_str(), x_expr));
    };
    let Some(yc) = &y.value else {
        return Err(operator_not_applicable(op.as_str(), y_expr));
    };

    let integer_result = ty.is_some_and(|t| {
        let types = scope.types();
        matches!(
            types.get(types.resolve_typedef(t)).kind,
            TypeKind::Int | TypeKind::Uint
        )
    });
    let rc = if op == BinaryOp::Div && integer_result {
        quo_int(xc, yc)?
    } else {
        binary_op(xc, op, yc)?
    };

    let Some(ty) = ty else {
        return Ok(scope.constant(rc));
    };

    let size = scope.types().size(ty);
    let mut r = scope.value("", 0, ty);
    r.value = Some(rc);
    match r.kind {
        Kind::String => r.len = x.len + y.len,
        k if k.is_signed() => {
            let n = r.value.as_ref().map_or(0, |c| int64_val(c).0);
            r.value = Some(Constant::Int64(convert_int(n as u64, true, size) as i64));
        }
        k if k.is_unsigned() && k != Kind::Uintptr => {
            let n = r.value.as_ref().map_or(0, |c| uint64_val(c).0);
            r.value = Some(make_uint64(convert_int(n, false, size)));
        }
        _ => {}
    }
    Ok(r)
}
