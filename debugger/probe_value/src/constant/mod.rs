//! Arbitrary-precision constants.
//!
//! Every loaded scalar value carries a [`Constant`]. Arithmetic happens on
//! constants with unbounded precision; the operator engine wraps results to
//! the width of the negotiated type afterwards, which reproduces the
//! debuggee's two's-complement overflow without per-width code paths.
//!
//! Integers use `i64` while they fit and `BigInt` beyond. Division of two
//! integers is exact and yields a `Rat`; truncating integer division is a
//! separate entry point ([`quo_int`]). Floats are `f64`. Complex numbers are
//! pairs of `f64`. Non-finite floats never become constants: loading a NaN
//! or an infinity records a float-special marker on the value instead.

use std::cmp::Ordering;
use std::fmt;

use num_bigint::{BigInt, Sign};
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::errors::{division_by_zero, EvalError, EvalResult};

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests use unwrap to panic on unexpected state")]
mod tests;

/// Upper bound for left shifts of constants.
const MAX_SHIFT: u64 = 1 << 13;

/// Literal kind of a constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstKind {
    Unknown,
    Bool,
    String,
    Int,
    Float,
    Complex,
}

#[derive(Clone, Debug, Default)]
pub enum Constant {
    #[default]
    Unknown,
    Bool(bool),
    /// Raw bytes; target strings are not guaranteed to be UTF-8.
    Str(Vec<u8>),
    Int64(i64),
    IntBig(BigInt),
    Rat(BigRational),
    Float(f64),
    Complex(f64, f64),
}

impl Constant {
    pub fn kind(&self) -> ConstKind {
        match self {
            Constant::Unknown => ConstKind::Unknown,
            Constant::Bool(_) => ConstKind::Bool,
            Constant::Str(_) => ConstKind::String,
            Constant::Int64(_) | Constant::IntBig(_) => ConstKind::Int,
            Constant::Rat(_) | Constant::Float(_) => ConstKind::Float,
            Constant::Complex(..) => ConstKind::Complex,
        }
    }

    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Constant::Unknown)
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        compare(self, BinaryOp::Eq, other).unwrap_or(false)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Unknown => write!(f, "unknown"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Str(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            Constant::Int64(i) => write!(f, "{i}"),
            Constant::IntBig(i) => write!(f, "{i}"),
            Constant::Rat(r) => {
                if r.is_integer() {
                    write!(f, "{}", r.numer())
                } else {
                    write!(f, "{}", rat_to_f64(r))
                }
            }
            Constant::Float(x) => write!(f, "{x}"),
            Constant::Complex(re, im) => write!(f, "({re} + {im}i)"),
        }
    }
}

/// Binary operator tokens, spelled as in the debuggee's source language.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    LogAnd,
    LogOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    #[inline]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    #[inline]
    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::AndNot => "&^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::LogAnd => "&&",
            BinaryOp::LogOr => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    /// `^x`
    BitNot,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "^",
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Construction

pub fn make_bool(b: bool) -> Constant {
    Constant::Bool(b)
}

pub fn make_string(s: impl Into<Vec<u8>>) -> Constant {
    Constant::Str(s.into())
}

pub fn make_int64(x: i64) -> Constant {
    Constant::Int64(x)
}

pub fn make_uint64(x: u64) -> Constant {
    match i64::try_from(x) {
        Ok(i) => Constant::Int64(i),
        Err(_) => Constant::IntBig(BigInt::from(x)),
    }
}

/// Float constant; NaN and infinities become `Unknown`.
pub fn make_float64(x: f64) -> Constant {
    if !x.is_finite() {
        return Constant::Unknown;
    }
    // -0 and 0 are the same constant
    Constant::Float(if x == 0.0 { 0.0 } else { x })
}

/// `x * i`
pub fn make_imag(x: &Constant) -> Constant {
    let (im, _) = float64_val(x);
    Constant::Complex(0.0, im)
}

pub fn make_complex(re: f64, im: f64) -> Constant {
    if !re.is_finite() || !im.is_finite() {
        return Constant::Unknown;
    }
    Constant::Complex(re, im)
}

fn make_int(x: BigInt) -> Constant {
    match x.to_i64() {
        Some(i) => Constant::Int64(i),
        None => Constant::IntBig(x),
    }
}

fn make_rat(x: BigRational) -> Constant {
    if x.numer().bits() > 4096 || x.denom().bits() > 4096 {
        return make_float64(rat_to_f64(&x));
    }
    Constant::Rat(x)
}

fn rat_to_f64(x: &BigRational) -> f64 {
    x.to_f64().unwrap_or_else(|| {
        if x.is_negative() {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }
    })
}

fn big_to_f64(x: &BigInt) -> f64 {
    x.to_f64().unwrap_or(if x.sign() == Sign::Minus {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    })
}

/// Low 64 bits of a big integer in two's complement.
fn low_bits(x: &BigInt) -> u64 {
    let mask = BigInt::from(u64::MAX);
    (x & mask).to_u64().unwrap_or(0)
}

// Accessors

pub fn bool_val(x: &Constant) -> bool {
    matches!(x, Constant::Bool(true))
}

/// Bytes of a string constant; empty for any other kind.
pub fn string_val(x: &Constant) -> &[u8] {
    match x {
        Constant::Str(s) => s,
        _ => &[],
    }
}

/// The value as `i64` and whether it was exact. Out-of-range integers keep
/// their low 64 bits.
pub fn int64_val(x: &Constant) -> (i64, bool) {
    match x {
        Constant::Int64(i) => (*i, true),
        Constant::IntBig(i) => match i.to_i64() {
            Some(v) => (v, true),
            None => (low_bits(i) as i64, false),
        },
        Constant::Rat(r) if r.is_integer() => int64_val(&make_int(r.numer().clone())),
        _ => (0, false),
    }
}

/// The value as `u64` and whether it was exact. Negative and out-of-range
/// integers keep their low 64 bits.
pub fn uint64_val(x: &Constant) -> (u64, bool) {
    match x {
        Constant::Int64(i) => (*i as u64, *i >= 0),
        Constant::IntBig(i) => match i.to_u64() {
            Some(v) => (v, true),
            None => (low_bits(i), false),
        },
        Constant::Rat(r) if r.is_integer() => uint64_val(&make_int(r.numer().clone())),
        _ => (0, false),
    }
}

pub fn float64_val(x: &Constant) -> (f64, bool) {
    match x {
        Constant::Int64(i) => {
            let f = *i as f64;
            (f, f as i64 == *i)
        }
        Constant::IntBig(i) => (big_to_f64(i), false),
        Constant::Rat(r) => {
            let f = rat_to_f64(r);
            (f, BigRational::from_float(f).as_ref() == Some(r))
        }
        Constant::Float(f) => (*f, true),
        Constant::Complex(re, im) => (*re, *im == 0.0),
        _ => (0.0, false),
    }
}

/// -1, 0 or 1. Non-numeric constants report 1.
pub fn sign(x: &Constant) -> i32 {
    let ord = match x {
        Constant::Int64(i) => i.cmp(&0),
        Constant::IntBig(i) => match i.sign() {
            Sign::Minus => Ordering::Less,
            Sign::NoSign => Ordering::Equal,
            Sign::Plus => Ordering::Greater,
        },
        Constant::Rat(r) => r.cmp(&BigRational::zero()),
        Constant::Float(f) => f.partial_cmp(&0.0).unwrap_or(Ordering::Equal),
        Constant::Complex(re, im) => {
            if *re == 0.0 && *im == 0.0 {
                Ordering::Equal
            } else {
                Ordering::Greater
            }
        }
        _ => Ordering::Greater,
    };
    match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Real part; numeric non-complex constants are their own real part.
pub fn real(x: &Constant) -> Constant {
    match x {
        Constant::Complex(re, _) => make_float64(*re),
        Constant::Int64(_) | Constant::IntBig(_) | Constant::Rat(_) | Constant::Float(_) => {
            x.clone()
        }
        _ => Constant::Unknown,
    }
}

pub fn imag(x: &Constant) -> Constant {
    match x {
        Constant::Complex(_, im) => make_float64(*im),
        Constant::Int64(_) | Constant::IntBig(_) | Constant::Rat(_) | Constant::Float(_) => {
            Constant::Int64(0)
        }
        _ => Constant::Unknown,
    }
}

// Promotion

fn rank(x: &Constant) -> u8 {
    match x {
        Constant::Unknown => 0,
        Constant::Bool(_) | Constant::Str(_) => 1,
        Constant::Int64(_) => 2,
        Constant::IntBig(_) => 3,
        Constant::Rat(_) => 4,
        Constant::Float(_) => 5,
        Constant::Complex(..) => 6,
    }
}

fn promote(x: Constant, target: &Constant) -> Constant {
    match (target, x) {
        (Constant::IntBig(_), Constant::Int64(i)) => Constant::IntBig(BigInt::from(i)),
        (Constant::Rat(_), Constant::Int64(i)) => Constant::Rat(BigRational::from_integer(i.into())),
        (Constant::Rat(_), Constant::IntBig(i)) => Constant::Rat(BigRational::from_integer(i)),
        (Constant::Float(_), x @ (Constant::Int64(_) | Constant::IntBig(_) | Constant::Rat(_))) => {
            Constant::Float(float64_val(&x).0)
        }
        (
            Constant::Complex(..),
            x @ (Constant::Int64(_) | Constant::IntBig(_) | Constant::Rat(_) | Constant::Float(_)),
        ) => Constant::Complex(float64_val(&x).0, 0.0),
        (_, x) => x,
    }
}

fn match_values(x: &Constant, y: &Constant) -> (Constant, Constant) {
    let (rx, ry) = (rank(x), rank(y));
    match rx.cmp(&ry) {
        Ordering::Less => (promote(x.clone(), y), y.clone()),
        Ordering::Greater => (x.clone(), promote(y.clone(), x)),
        Ordering::Equal => (x.clone(), y.clone()),
    }
}

#[cold]
fn invalid_binary(x: &Constant, op: BinaryOp, y: &Constant) -> EvalError {
    EvalError::new(format!("invalid binary operation {x} {op} {y}"))
}

// Operations

/// `op y`.
///
/// `prec`, when non-zero, is the width in bits of an unsigned result for
/// `^y`.
pub fn unary_op(op: UnaryOp, y: &Constant, prec: u32) -> EvalResult<Constant> {
    let r = match (op, y) {
        (UnaryOp::Pos, Constant::Bool(_) | Constant::Str(_) | Constant::Unknown) => None,
        (UnaryOp::Pos, _) => Some(y.clone()),
        (UnaryOp::Neg, Constant::Int64(i)) => Some(match i.checked_neg() {
            Some(n) => Constant::Int64(n),
            None => make_int(-BigInt::from(*i)),
        }),
        (UnaryOp::Neg, Constant::IntBig(i)) => Some(make_int(-i)),
        (UnaryOp::Neg, Constant::Rat(r)) => Some(make_rat(-r)),
        (UnaryOp::Neg, Constant::Float(f)) => Some(make_float64(-f)),
        (UnaryOp::Neg, Constant::Complex(re, im)) => Some(Constant::Complex(-re, -im)),
        (UnaryOp::Not, Constant::Bool(b)) => Some(Constant::Bool(!b)),
        (UnaryOp::BitNot, Constant::Int64(_) | Constant::IntBig(_)) => {
            let v = match y {
                Constant::Int64(i) => BigInt::from(*i),
                Constant::IntBig(i) => i.clone(),
                _ => BigInt::zero(),
            };
            let mut z = !v;
            if prec > 0 {
                let mask = (BigInt::from(1) << prec) - 1;
                z &= mask;
            }
            Some(make_int(z))
        }
        _ => None,
    };
    r.ok_or_else(|| EvalError::new(format!("invalid unary operation {op}{y}")))
}

/// `x op y` for arithmetic, bitwise, logical and string operators.
///
/// Division of integers is exact; see [`quo_int`] for truncation.
pub fn binary_op(x: &Constant, op: BinaryOp, y: &Constant) -> EvalResult<Constant> {
    if op.is_shift() {
        let (n, _) = uint64_val(y);
        return shift(x, op, n);
    }
    let (a, b) = match_values(x, y);
    let r = match (&a, &b) {
        (Constant::Bool(p), Constant::Bool(q)) => match op {
            BinaryOp::LogAnd => Some(Constant::Bool(*p && *q)),
            BinaryOp::LogOr => Some(Constant::Bool(*p || *q)),
            _ => None,
        },
        (Constant::Str(p), Constant::Str(q)) => match op {
            BinaryOp::Add => {
                let mut s = p.clone();
                s.extend_from_slice(q);
                Some(Constant::Str(s))
            }
            _ => None,
        },
        (Constant::Int64(p), Constant::Int64(q)) => int64_op(*p, op, *q)?,
        (Constant::IntBig(p), Constant::IntBig(q)) => big_op(p, op, q)?,
        (Constant::Rat(p), Constant::Rat(q)) => match op {
            BinaryOp::Add => Some(make_rat(p + q)),
            BinaryOp::Sub => Some(make_rat(p - q)),
            BinaryOp::Mul => Some(make_rat(p * q)),
            BinaryOp::Div => {
                if q.is_zero() {
                    return Err(division_by_zero());
                }
                Some(make_rat(p / q))
            }
            _ => None,
        },
        (Constant::Float(p), Constant::Float(q)) => match op {
            BinaryOp::Add => Some(make_float64(p + q)),
            BinaryOp::Sub => Some(make_float64(p - q)),
            BinaryOp::Mul => Some(make_float64(p * q)),
            BinaryOp::Div => {
                if *q == 0.0 {
                    return Err(division_by_zero());
                }
                Some(make_float64(p / q))
            }
            _ => None,
        },
        (Constant::Complex(pr, pi), Constant::Complex(qr, qi)) => match op {
            BinaryOp::Add => Some(make_complex(pr + qr, pi + qi)),
            BinaryOp::Sub => Some(make_complex(pr - qr, pi - qi)),
            BinaryOp::Mul => Some(make_complex(pr * qr - pi * qi, pr * qi + pi * qr)),
            BinaryOp::Div => {
                let d = qr * qr + qi * qi;
                if d == 0.0 {
                    return Err(division_by_zero());
                }
                Some(make_complex(
                    (pr * qr + pi * qi) / d,
                    (pi * qr - pr * qi) / d,
                ))
            }
            _ => None,
        },
        _ => None,
    };
    r.ok_or_else(|| invalid_binary(x, op, y))
}

fn int64_op(p: i64, op: BinaryOp, q: i64) -> EvalResult<Option<Constant>> {
    let wide = |f: fn(BigInt, BigInt) -> BigInt| make_int(f(BigInt::from(p), BigInt::from(q)));
    Ok(Some(match op {
        BinaryOp::Add => p.checked_add(q).map_or_else(|| wide(|a, b| a + b), Constant::Int64),
        BinaryOp::Sub => p.checked_sub(q).map_or_else(|| wide(|a, b| a - b), Constant::Int64),
        BinaryOp::Mul => p.checked_mul(q).map_or_else(|| wide(|a, b| a * b), Constant::Int64),
        BinaryOp::Div => {
            if q == 0 {
                return Err(division_by_zero());
            }
            make_rat(BigRational::new(p.into(), q.into()))
        }
        BinaryOp::Rem => {
            if q == 0 {
                return Err(division_by_zero());
            }
            p.checked_rem(q).map_or(Constant::Int64(0), Constant::Int64)
        }
        BinaryOp::And => Constant::Int64(p & q),
        BinaryOp::Or => Constant::Int64(p | q),
        BinaryOp::Xor => Constant::Int64(p ^ q),
        BinaryOp::AndNot => Constant::Int64(p & !q),
        _ => return Ok(None),
    }))
}

fn big_op(p: &BigInt, op: BinaryOp, q: &BigInt) -> EvalResult<Option<Constant>> {
    Ok(Some(match op {
        BinaryOp::Add => make_int(p + q),
        BinaryOp::Sub => make_int(p - q),
        BinaryOp::Mul => make_int(p * q),
        BinaryOp::Div => {
            if q.is_zero() {
                return Err(division_by_zero());
            }
            make_rat(BigRational::new(p.clone(), q.clone()))
        }
        BinaryOp::Rem => {
            if q.is_zero() {
                return Err(division_by_zero());
            }
            make_int(p % q)
        }
        BinaryOp::And => make_int(p & q),
        BinaryOp::Or => make_int(p | q),
        BinaryOp::Xor => make_int(p ^ q),
        BinaryOp::AndNot => make_int(p & !q),
        _ => return Ok(None),
    }))
}

/// Truncating integer division. Both operands must be integers.
pub fn quo_int(x: &Constant, y: &Constant) -> EvalResult<Constant> {
    let as_big = |c: &Constant| match c {
        Constant::Int64(i) => Some(BigInt::from(*i)),
        Constant::IntBig(i) => Some(i.clone()),
        _ => None,
    };
    match (as_big(x), as_big(y)) {
        (Some(p), Some(q)) => {
            if q.is_zero() {
                return Err(division_by_zero());
            }
            Ok(make_int(p / q))
        }
        _ => Err(invalid_binary(x, BinaryOp::Div, y)),
    }
}

/// `x << n` or `x >> n`. Right shifts are arithmetic.
pub fn shift(x: &Constant, op: BinaryOp, n: u64) -> EvalResult<Constant> {
    let v = match x {
        Constant::Int64(i) => BigInt::from(*i),
        Constant::IntBig(i) => i.clone(),
        _ => return Err(invalid_binary(x, op, &make_uint64(n))),
    };
    match op {
        BinaryOp::Shl => {
            if n > MAX_SHIFT {
                return Err(EvalError::new(format!("invalid shift count {n}")));
            }
            Ok(make_int(v << n))
        }
        BinaryOp::Shr => {
            let n = n.min(MAX_SHIFT);
            Ok(make_int(v >> n))
        }
        _ => Err(invalid_binary(x, op, &make_uint64(n))),
    }
}

/// `x op y` for comparison operators.
pub fn compare(x: &Constant, op: BinaryOp, y: &Constant) -> EvalResult<bool> {
    let (a, b) = match_values(x, y);
    let ord = match (&a, &b) {
        (Constant::Bool(p), Constant::Bool(q)) => {
            return match op {
                BinaryOp::Eq => Ok(p == q),
                BinaryOp::Ne => Ok(p != q),
                _ => Err(invalid_comparison(x, op, y)),
            };
        }
        (Constant::Complex(pr, pi), Constant::Complex(qr, qi)) => {
            let eq = pr == qr && pi == qi;
            return match op {
                BinaryOp::Eq => Ok(eq),
                BinaryOp::Ne => Ok(!eq),
                _ => Err(invalid_comparison(x, op, y)),
            };
        }
        (Constant::Str(p), Constant::Str(q)) => p.cmp(q),
        (Constant::Int64(p), Constant::Int64(q)) => p.cmp(q),
        (Constant::IntBig(p), Constant::IntBig(q)) => p.cmp(q),
        (Constant::Rat(p), Constant::Rat(q)) => p.cmp(q),
        (Constant::Float(p), Constant::Float(q)) => match p.partial_cmp(q) {
            Some(o) => o,
            None => return Ok(op == BinaryOp::Ne),
        },
        _ => return Err(invalid_comparison(x, op, y)),
    };
    match op {
        BinaryOp::Eq => Ok(ord == Ordering::Equal),
        BinaryOp::Ne => Ok(ord != Ordering::Equal),
        BinaryOp::Lt => Ok(ord == Ordering::Less),
        BinaryOp::Le => Ok(ord != Ordering::Greater),
        BinaryOp::Gt => Ok(ord == Ordering::Greater),
        BinaryOp::Ge => Ok(ord != Ordering::Less),
        _ => Err(invalid_comparison(x, op, y)),
    }
}

#[cold]
fn invalid_comparison(x: &Constant, op: BinaryOp, y: &Constant) -> EvalError {
    EvalError::new(format!("invalid comparison {x} {op} {y}"))
}

/// Truncate `n` to a `size`-byte integer and, for signed targets,
/// sign-extend the result back to 64 bits.
pub fn convert_int(n: u64, signed: bool, size: i64) -> u64 {
    let bits = (size.clamp(1, 8) * 8) as u32;
    if bits == 64 {
        return n;
    }
    let r = n & ((1u64 << bits) - 1);
    if signed && r & (1u64 << (bits - 1)) != 0 {
        return r | (u64::MAX << bits);
    }
    r
}
