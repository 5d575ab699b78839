//! Built-in functions callable from expressions.
//!
//! The set is fixed: `len`, `cap`, `complex`, `real`, `imag`, `min` and
//! `max`. The registry is built on first use and never changes.

use std::sync::OnceLock;

use probe_types::{Kind, TypeKind};
use probe_value::constant::{binary_op, imag, make_imag, make_int64, real};
use probe_value::errors::{non_finite_float, wrong_arg_count};
use probe_value::{
    compare_op, BinaryOp, ConstKind, EvalError, EvalResult, FloatSpecial, LoadConfig, Value,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::operators::negotiate_type;
use crate::scope::EvalScope;

/// Arguments of one builtin call, in source order.
pub(crate) type BuiltinArgs = SmallVec<[Value; 4]>;

/// A builtin: the scope, the evaluated arguments and their source text.
pub(crate) type BuiltinFn = fn(&EvalScope, BuiltinArgs, &[String]) -> EvalResult<Value>;

static REGISTRY: OnceLock<FxHashMap<&'static str, BuiltinFn>> = OnceLock::new();

fn registry() -> &'static FxHashMap<&'static str, BuiltinFn> {
    REGISTRY.get_or_init(|| {
        let mut map: FxHashMap<&'static str, BuiltinFn> = FxHashMap::default();
        map.insert("cap", cap_builtin);
        map.insert("len", len_builtin);
        map.insert("complex", complex_builtin);
        map.insert("imag", imag_builtin);
        map.insert("real", real_builtin);
        map.insert("min", min_builtin);
        map.insert("max", max_builtin);
        map
    })
}

pub(crate) fn is_builtin(name: &str) -> bool {
    registry().contains_key(name)
}

pub(crate) fn lookup(name: &str) -> Option<BuiltinFn> {
    registry().get(name).copied()
}

fn expr_of<'a>(exprs: &'a [String], i: usize) -> &'a str {
    exprs.get(i).map_or("", String::as_str)
}

fn single(name: &str, args: BuiltinArgs) -> EvalResult<Value> {
    let n = args.len();
    match args.into_iter().next() {
        Some(arg) if n == 1 => Ok(arg),
        _ => Err(wrong_arg_count(name, n)),
    }
}

fn cap_builtin(scope: &EvalScope, args: BuiltinArgs, exprs: &[String]) -> EvalResult<Value> {
    let mut arg = single("cap", args)?;
    let invalid = |arg: &Value| {
        EvalError::new(format!(
            "invalid argument {} (type {}) for cap",
            expr_of(exprs, 0),
            arg.type_string()
        ))
    };
    if arg.kind == Kind::Ptr {
        let pointee = arg.maybe_dereference();
        if pointee.kind != Kind::Array {
            return Err(invalid(&arg));
        }
        return Ok(scope.constant(make_int64(pointee.len)));
    }
    match arg.kind {
        Kind::Array => Ok(scope.constant(make_int64(arg.len))),
        Kind::Slice => Ok(scope.constant(make_int64(arg.cap))),
        Kind::Chan => chan_counter(scope, &mut arg, "dataqsiz"),
        _ => Err(invalid(&arg)),
    }
}

fn len_builtin(scope: &EvalScope, args: BuiltinArgs, exprs: &[String]) -> EvalResult<Value> {
    let mut arg = single("len", args)?;
    let invalid = |arg: &Value| {
        EvalError::new(format!(
            "invalid argument {} (type {}) for len",
            expr_of(exprs, 0),
            arg.type_string()
        ))
    };
    if arg.kind == Kind::Ptr {
        let pointee = arg.maybe_dereference();
        if pointee.kind != Kind::Array {
            return Err(invalid(&arg));
        }
        arg = pointee;
    }
    match arg.kind {
        Kind::Array | Kind::Slice | Kind::String => {
            arg.check_readable()?;
            Ok(scope.constant(make_int64(arg.len)))
        }
        Kind::Chan => chan_counter(scope, &mut arg, "qcount"),
        Kind::Map => {
            let it = arg.map_iterator(0);
            arg.check_readable()?;
            let len = if it.is_some() { arg.len } else { 0 };
            Ok(scope.constant(make_int64(len)))
        }
        _ => Err(invalid(&arg)),
    }
}

/// A counter field of a channel header; 0 for a nil channel.
fn chan_counter(scope: &EvalScope, ch: &mut Value, field: &str) -> EvalResult<Value> {
    ch.load(&LoadConfig::FULL_VALUE);
    ch.check_readable()?;
    if ch.base == 0 {
        return Ok(scope.constant(make_int64(0)));
    }
    let counter = ch
        .children
        .iter()
        .find(|c| c.name == field)
        .and_then(|c| c.value.clone())
        .unwrap_or_else(|| make_int64(0));
    Ok(scope.constant(counter))
}

fn complex_builtin(scope: &EvalScope, args: BuiltinArgs, exprs: &[String]) -> EvalResult<Value> {
    if args.len() != 2 {
        return Err(wrong_arg_count("complex", args.len()));
    }
    let mut args = args.into_iter();
    let (Some(mut re), Some(mut im)) = (args.next(), args.next()) else {
        return Err(wrong_arg_count("complex", 0));
    };
    re.load(&LoadConfig::SINGLE_VALUE);
    im.load(&LoadConfig::SINGLE_VALUE);
    re.check_readable()?;
    im.check_readable()?;

    let types = scope.types();
    let mut size = 0;
    for (i, v) in [&re, &im].into_iter().enumerate() {
        let numeric = v
            .value
            .as_ref()
            .is_some_and(|c| matches!(c.kind(), ConstKind::Int | ConstKind::Float));
        let float_size = match v.real_type {
            None => Some(0),
            Some(t) => match types.get(t).kind {
                TypeKind::Float => Some(types.size(t)),
                _ => None,
            },
        };
        let (true, Some(sz)) = (numeric, float_size) else {
            return Err(EvalError::new(format!(
                "invalid argument {} {} (type {}) to complex",
                i + 1,
                expr_of(exprs, i),
                v.type_string()
            )));
        };
        size = size.max(sz);
    }
    let bits = if size == 0 { 128 } else { size * 16 };
    let ty = types.fixed_basic("complex", bits);

    let (Some(rc), Some(ic)) = (&re.value, &im.value) else {
        return Err(wrong_arg_count("complex", 0));
    };
    let mut r = scope.value("", 0, ty);
    r.value = Some(binary_op(rc, BinaryOp::Add, &make_imag(ic))?);
    Ok(r)
}

fn imag_builtin(scope: &EvalScope, args: BuiltinArgs, exprs: &[String]) -> EvalResult<Value> {
    let mut arg = single("imag", args)?;
    arg.load(&LoadConfig::SINGLE_VALUE);
    arg.check_readable()?;
    match (&arg.value, arg.kind.is_complex()) {
        (Some(c), true) => Ok(scope.constant(imag(c))),
        _ => Err(EvalError::new(format!(
            "invalid argument {} (type {}) to imag",
            expr_of(exprs, 0),
            arg.type_string()
        ))),
    }
}

fn real_builtin(scope: &EvalScope, args: BuiltinArgs, exprs: &[String]) -> EvalResult<Value> {
    let mut arg = single("real", args)?;
    arg.load(&LoadConfig::SINGLE_VALUE);
    arg.check_readable()?;
    let numeric = |c: &probe_value::Constant| {
        matches!(c.kind(), ConstKind::Int | ConstKind::Float | ConstKind::Complex)
    };
    match &arg.value {
        Some(c) if numeric(c) => Ok(scope.constant(real(c))),
        _ => Err(EvalError::new(format!(
            "invalid argument {} (type {}) to real",
            expr_of(exprs, 0),
            arg.type_string()
        ))),
    }
}

fn min_builtin(_scope: &EvalScope, args: BuiltinArgs, exprs: &[String]) -> EvalResult<Value> {
    min_max("min", BinaryOp::Lt, args, exprs)
}

fn max_builtin(_scope: &EvalScope, args: BuiltinArgs, exprs: &[String]) -> EvalResult<Value> {
    min_max("max", BinaryOp::Gt, args, exprs)
}

/// Fold left to right, replacing the best so far only on a strict `op`,
/// so ties keep the earlier argument.
fn min_max(name: &str, op: BinaryOp, args: BuiltinArgs, exprs: &[String]) -> EvalResult<Value> {
    let mut best: Option<Value> = None;
    for (i, mut arg) in args.into_iter().enumerate() {
        let cfg = if arg.kind == Kind::String {
            LoadConfig::FULL_VALUE_LONGER_STRINGS
        } else {
            LoadConfig::FULL_VALUE
        };
        arg.load(&cfg);
        if let Some(err) = &arg.unreadable {
            return Err(EvalError::new(format!(
                "could not load {:?}: {err}",
                expr_of(exprs, i)
            )));
        }
        if arg.float_special != FloatSpecial::None {
            return Err(non_finite_float());
        }
        best = Some(match best {
            None => arg,
            Some(mut cur) => {
                negotiate_type(op, &arg, &cur)?;
                if compare_op(op, &mut arg, &mut cur)? {
                    arg
                } else {
                    cur
                }
            }
        });
    }
    best.ok_or_else(|| EvalError::new(format!("not enough arguments to {name}")))
}
