use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

#[test]
fn test_int_overflow_promotes_to_big() {
    let r = binary_op(&make_int64(i64::MAX), BinaryOp::Add, &make_int64(1)).unwrap();
    assert!(matches!(r, Constant::IntBig(_)));
    assert_eq!(r.kind(), ConstKind::Int);
    // low bits of 2^63 as u64
    assert_eq!(uint64_val(&r), (1u64 << 63, true));
    assert_eq!(int64_val(&r), (i64::MIN, false));
}

#[test]
fn test_uint64_max_wraps_in_low_bits() {
    let r = binary_op(&make_uint64(u64::MAX), BinaryOp::Add, &make_int64(1)).unwrap();
    assert_eq!(uint64_val(&r), (0, false));
}

#[test]
fn test_int_division_is_exact() {
    let r = binary_op(&make_int64(7), BinaryOp::Div, &make_int64(2)).unwrap();
    assert_eq!(r.kind(), ConstKind::Float);
    assert_eq!(float64_val(&r), (3.5, true));

    let q = quo_int(&make_int64(-7), &make_int64(2)).unwrap();
    assert_eq!(int64_val(&q), (-3, true));
}

#[test]
fn test_division_by_zero() {
    let err = binary_op(&make_int64(1), BinaryOp::Div, &make_int64(0)).unwrap_err();
    assert_eq!(err.message, "division by zero");
    assert!(quo_int(&make_int64(1), &make_int64(0)).is_err());
    assert!(binary_op(&make_int64(1), BinaryOp::Rem, &make_int64(0)).is_err());
}

#[test]
fn test_mixed_int_float_promotes() {
    let r = binary_op(&make_int64(1), BinaryOp::Add, &make_float64(0.5)).unwrap();
    assert_eq!(float64_val(&r), (1.5, true));
}

#[test]
fn test_string_concat_and_compare() {
    let r = binary_op(&make_string("ab"), BinaryOp::Add, &make_string("cd")).unwrap();
    assert_eq!(string_val(&r), b"abcd");
    assert!(compare(&make_string("abc"), BinaryOp::Lt, &make_string("abd")).unwrap());
    assert!(binary_op(&make_string("a"), BinaryOp::Sub, &make_string("b")).is_err());
}

#[test]
fn test_bool_ordering_is_invalid() {
    assert!(compare(&make_bool(true), BinaryOp::Eq, &make_bool(true)).unwrap());
    assert!(compare(&make_bool(true), BinaryOp::Lt, &make_bool(false)).is_err());
}

#[test]
fn test_shift() {
    let r = shift(&make_int64(1), BinaryOp::Shl, 70).unwrap();
    assert!(matches!(r, Constant::IntBig(_)));
    let r = shift(&make_int64(-8), BinaryOp::Shr, 1).unwrap();
    assert_eq!(int64_val(&r), (-4, true));
    assert!(shift(&make_float64(1.0), BinaryOp::Shl, 1).is_err());
}

#[test]
fn test_unary() {
    let r = unary_op(UnaryOp::Neg, &make_int64(i64::MIN), 0).unwrap();
    assert!(matches!(r, Constant::IntBig(_)));
    let r = unary_op(UnaryOp::BitNot, &make_int64(0), 8).unwrap();
    assert_eq!(int64_val(&r), (255, true));
    let r = unary_op(UnaryOp::BitNot, &make_int64(0), 0).unwrap();
    assert_eq!(int64_val(&r), (-1, true));
    assert!(unary_op(UnaryOp::Not, &make_int64(1), 0).is_err());
}

#[test]
fn test_complex_parts() {
    let c = binary_op(&make_int64(1), BinaryOp::Add, &make_imag(&make_int64(2))).unwrap();
    assert_eq!(c.kind(), ConstKind::Complex);
    assert_eq!(float64_val(&real(&c)).0, 1.0);
    assert_eq!(float64_val(&imag(&c)).0, 2.0);
    let sq = binary_op(&c, BinaryOp::Mul, &c).unwrap();
    assert_eq!(sq, make_complex(-3.0, 4.0));
}

#[test]
fn test_non_finite_float_is_unknown() {
    assert!(make_float64(f64::NAN).is_unknown());
    assert!(make_float64(f64::INFINITY).is_unknown());
}

#[test]
fn test_display_uses_source_tokens() {
    assert_eq!(BinaryOp::AndNot.to_string(), "&^");
    assert_eq!(UnaryOp::BitNot.to_string(), "^");
    assert_eq!(make_string("hi").to_string(), "\"hi\"");
}

#[test]
fn test_convert_int_masks_and_sign_extends() {
    assert_eq!(convert_int(0x1ff, false, 1), 0xff);
    assert_eq!(convert_int(0xff, true, 1), u64::MAX);
    assert_eq!(convert_int(0x7f, true, 1), 0x7f);
    assert_eq!(convert_int(0x1_0000_8000, true, 2) as i64, -0x8000);
    assert_eq!(convert_int(u64::MAX, true, 8), u64::MAX);
}

proptest! {
    #[test]
    fn test_int_arithmetic_matches_wide_ints(a: i64, b: i64) {
        let (x, y) = (make_int64(a), make_int64(b));
        let sum = binary_op(&x, BinaryOp::Add, &y).unwrap();
        let wide = i128::from(a) + i128::from(b);
        let (v, exact) = int64_val(&sum);
        prop_assert_eq!(exact, i64::try_from(wide).is_ok());
        prop_assert_eq!(v, wide as i64);
        prop_assert_eq!(compare(&x, BinaryOp::Lt, &y).unwrap(), a < b);
    }

    #[test]
    fn test_convert_int_agrees_with_casts(n: u64) {
        prop_assert_eq!(convert_int(n, true, 1), n as i8 as i64 as u64);
        prop_assert_eq!(convert_int(n, false, 2), u64::from(n as u16));
        prop_assert_eq!(convert_int(n, true, 4), n as i32 as i64 as u64);
    }
}
