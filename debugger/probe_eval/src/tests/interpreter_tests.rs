use pretty_assertions::assert_eq;
use probe_types::{Kind, TypeData, TypeKind};
use probe_value::constant::{
    bool_val, make_bool, make_float64, make_int64, make_string, BinaryOp, UnaryOp,
};
use probe_value::Value;
use proptest::prelude::*;

use super::*;
use crate::program::JumpCondition;
use crate::testing::FakeCompiler;

fn binary(op: BinaryOp) -> Op {
    Op::Binary {
        op,
        x_expr: "x".to_string(),
        y_expr: "y".to_string(),
    }
}

#[test]
fn test_index_array_element_address() {
    let mut h = Harness::new();
    let int32 = h.types().named_basic("int32");
    let arr = h.types().array_of(int32, 5);
    h.mem.map(DATA, (10i32..15).flat_map(i32::to_le_bytes).collect());
    h.local("a", arr, DATA, 1, 1);
    let env = h.build();

    let v = env.eval_value(vec![
        local("a"),
        int_const(2),
        Op::Index {
            expr: "a[2]".to_string(),
        },
    ]);
    assert_eq!(v.addr, DATA + 8);
    assert_eq!(int_of(&v), 12);

    let err = env.eval_err(vec![
        local("a"),
        int_const(5),
        Op::Index {
            expr: "a[5]".to_string(),
        },
    ]);
    assert_eq!(err, "index out of bounds");
}

#[test]
fn test_c_pointer_index_far_out_wraps() {
    let mut h = Harness::new();
    let int32 = h.types().named_basic("int32");
    let c_ptr = h.types().insert(TypeData::new(
        "*int32 (c)",
        8,
        8,
        TypeKind::Pointer {
            pointee: int32,
            c_style: true,
        },
    ));
    h.map_words(DATA, &[DATA + 0x10, 0, 7]);
    h.local("p", c_ptr, DATA, 1, 1);
    let env = h.build();

    let index = |n: i64| {
        vec![
            local("p"),
            int_const(n),
            Op::Index {
                expr: "p[n]".to_string(),
            },
        ]
    };
    assert_eq!(int_of(&env.eval_value(index(0))), 7);

    let far = i64::MAX / 3;
    let v = env.eval_value(index(far));
    let expected = (DATA + 0x10).wrapping_add((far as u64).wrapping_mul(4));
    assert_eq!(v.addr, expected);
    assert!(v.unreadable.is_some());

    let v = env
        .eval(vec![
            local("p"),
            int_const(far),
            int_const(far + 2),
            Op::Reslice {
                has_high: true,
                expr: "p[far:far+2]".to_string(),
            },
        ])
        .unwrap()
        .unwrap();
    assert_eq!((v.base, v.len), (expected, 2));
}

#[test]
fn test_nil_pointer_dereference() {
    let mut h = Harness::new();
    let ptr = h.types().pointer_to(h.int());
    h.map_words(DATA, &[0]);
    h.local("p", ptr, DATA, 1, 1);
    let env = h.build();

    let err = env.eval_err(vec![
        local("p"),
        Op::PointerDeref {
            expr: "*p".to_string(),
        },
    ]);
    assert_eq!(err, "nil pointer dereference");
}

#[test]
fn test_pointer_deref_and_addr_of() {
    let mut h = Harness::new();
    let int = h.int();
    let ptr = h.types().pointer_to(int);
    h.map_words(DATA, &[DATA + 8, 77]);
    h.local("p", ptr, DATA, 1, 1);
    h.local("x", int, DATA + 8, 1, 2);
    let env = h.build();

    let v = env.eval_value(vec![
        local("p"),
        Op::PointerDeref {
            expr: "*p".to_string(),
        },
    ]);
    assert_eq!((v.addr, int_of(&v)), (DATA + 8, 77));

    let p = env.eval_value(vec![
        local("x"),
        Op::AddrOf {
            expr: "&x".to_string(),
        },
    ]);
    assert_eq!(p.type_string(), "*int");
    assert_eq!(p.children[0].addr, DATA + 8);

    let err = env.eval_err(vec![
        int_const(1),
        Op::AddrOf {
            expr: "1".to_string(),
        },
    ]);
    assert_eq!(err, "can not take address of \"1\"");
}

#[test]
fn test_min_builtin_keeps_smallest() {
    let env = Harness::new().build();
    let v = env.eval_value(vec![
        int_const(3),
        int_const(7),
        int_const(5),
        Op::BuiltinCall {
            name: "min".to_string(),
            args: vec!["3".to_string(), "7".to_string(), "5".to_string()],
        },
    ]);
    assert_eq!(int_of(&v), 3);

    let v = env.eval_value(vec![
        int_const(3),
        int_const(7),
        int_const(5),
        Op::BuiltinCall {
            name: "max".to_string(),
            args: vec!["3".to_string(), "7".to_string(), "5".to_string()],
        },
    ]);
    assert_eq!(int_of(&v), 7);
}

#[test]
fn test_len_and_cap_of_slice() {
    let mut h = Harness::new();
    let sl = h.types().slice_of(h.int());
    h.map_words(DATA, &[DATA + 0x100, 2, 5]);
    h.map_words(DATA + 0x100, &[1, 2, 3, 4, 5]);
    h.local("s", sl, DATA, 1, 1);
    let env = h.build();

    let call = |name: &str| {
        env.eval_value(vec![
            local("s"),
            Op::BuiltinCall {
                name: name.to_string(),
                args: vec!["s".to_string()],
            },
        ])
    };
    assert_eq!(int_of(&call("len")), 2);
    assert_eq!(int_of(&call("cap")), 5);
}

#[test]
fn test_map_index_with_mismatched_key_type() {
    let mut h = Harness::new();
    let int = h.int();
    let m_ty = h.types().insert(TypeData::new(
        "map[int]int",
        8,
        8,
        TypeKind::Map {
            key: int,
            value: int,
        },
    ));
    h.map_words(DATA + 0x200, &[1, 100, 2, 200]);
    h.map_words(DATA + 0x100, &[2, DATA + 0x200]);
    h.map_words(DATA, &[DATA + 0x100]);
    h.local("m", m_ty, DATA, 1, 1);
    let env = h.build();

    let index = |key: Op| {
        env.eval(vec![
            local("m"),
            key,
            Op::Index {
                expr: "m[k]".to_string(),
            },
        ])
    };

    let mut v = index(int_const(2)).unwrap().unwrap();
    v.load(&LoadConfig::FULL_VALUE);
    assert_eq!(int_of(&v), 200);

    let err = index(Op::PushConst(make_string("a"))).unwrap_err();
    assert_eq!(err.to_string(), "can not convert \"a\" constant to int");

    let err = index(int_const(9)).unwrap_err();
    assert_eq!(err.to_string(), "key not found");
}

#[test]
fn test_slice_comparison_is_rejected() {
    let mut h = Harness::new();
    let sl = h.types().slice_of(h.int());
    h.map_words(DATA, &[DATA + 0x100, 2, 2]);
    h.map_words(DATA + 0x100, &[1, 2]);
    h.local("s", sl, DATA, 1, 1);
    let env = h.build();

    let err = env.eval_err(vec![local("s"), local("s"), binary(BinaryOp::Eq)]);
    assert_eq!(err, "can not compare slice variables");
}

#[test]
fn test_comparison_with_nil() {
    let mut h = Harness::new();
    let int = h.int();
    let ptr = h.types().pointer_to(int);
    h.map_words(DATA, &[0, 5]);
    h.local("p", ptr, DATA, 1, 1);
    h.local("n", int, DATA + 8, 1, 2);
    let env = h.build();

    let v = env.eval_value(vec![local("p"), Op::PushNil, binary(BinaryOp::Eq)]);
    assert!(bool_val(v.value.as_ref().unwrap()));

    let err = env.eval_err(vec![local("n"), Op::PushNil, binary(BinaryOp::Eq)]);
    assert_eq!(err, "can not compare int to nil");
}

#[test]
fn test_non_finite_float_operands_are_rejected() {
    let mut h = Harness::new();
    let float64 = h.types().named_basic("float64");
    h.map_words(DATA, &[f64::NAN.to_bits(), f64::INFINITY.to_bits()]);
    h.local("nan", float64, DATA, 1, 1);
    h.local("inf", float64, DATA + 8, 1, 2);
    let env = h.build();
    let one = || Op::PushConst(make_float64(1.0));
    let builtin = |name: &str| Op::BuiltinCall {
        name: name.to_string(),
        args: vec!["1.0".to_string(), "inf".to_string()],
    };
    let want = "operations on non-finite floats not implemented";

    assert_eq!(env.eval_err(vec![local("nan"), one(), binary(BinaryOp::Add)]), want);
    assert_eq!(env.eval_err(vec![one(), local("inf"), binary(BinaryOp::Lt)]), want);
    let neg = Op::Unary {
        op: UnaryOp::Neg,
        expr: "inf".to_string(),
    };
    assert_eq!(env.eval_err(vec![local("inf"), neg]), want);
    assert_eq!(env.eval_err(vec![one(), local("inf"), builtin("min")]), want);
    assert_eq!(env.eval_err(vec![one(), local("inf"), builtin("max")]), want);
}

#[test]
fn test_typed_arithmetic_wraps_to_type_width() {
    let mut h = Harness::new();
    let int8 = h.types().named_basic("int8");
    h.mem.map(DATA, vec![120]);
    h.local("b", int8, DATA, 1, 1);
    let env = h.build();

    let v = env.eval_value(vec![local("b"), int_const(10), binary(BinaryOp::Add)]);
    assert_eq!(v.type_string(), "int8");
    assert_eq!(int_of(&v), -126);
}

#[test]
fn test_jump_short_circuits_or() {
    let env = Harness::new().build();
    // true || undefined
    let v = env.eval_value(vec![
        Op::PushConst(make_bool(true)),
        Op::Jump {
            when: JumpCondition::IfTrue,
            pop: false,
            target: 4,
            node: Some("true".to_string()),
        },
        Op::Pop,
        local("undefined"),
    ]);
    assert!(bool_val(v.value.as_ref().unwrap()));

    let err = env.eval_err(vec![
        Op::PushConst(make_bool(false)),
        Op::Jump {
            when: JumpCondition::IfTrue,
            pop: false,
            target: 4,
            node: Some("false".to_string()),
        },
        Op::Pop,
        local("undefined"),
    ]);
    assert_eq!(err, "could not find symbol value for undefined");
}

#[test]
fn test_jump_on_non_boolean() {
    let env = Harness::new().build();
    let jump = |node: Option<&str>| Op::Jump {
        when: JumpCondition::IfFalse,
        pop: true,
        target: 3,
        node: node.map(str::to_string),
    };

    let err = env.eval_err(vec![int_const(1), jump(Some("1"))]);
    assert_eq!(err, "expression \"1\" should be boolean not int");

    let err = env.eval(vec![int_const(1), jump(None)]).unwrap_err();
    assert!(err.is_internal());
    assert_eq!(err.message, "internal debugger error: expected boolean");
}

#[test]
fn test_wrong_stack_size_at_end() {
    let env = Harness::new().build();
    let err = env.eval(vec![int_const(1), int_const(2)]).unwrap_err();
    assert!(err.is_internal());
    assert_eq!(err.to_string(), "internal debugger error: wrong stack size at end 2");

    assert!(env.eval(vec![]).unwrap().is_none());
}

#[test]
fn test_stack_underflow_names_the_op() {
    let env = Harness::new().build();
    let err = env.eval_err(vec![int_const(1), Op::Pop, Op::Pop]);
    assert_eq!(err, "internal debugger error: operand stack underflow\n  op 2: Pop");
}

#[test]
fn test_bool_to_const_drops_location() {
    let mut h = Harness::new();
    let bool_ty = h.types().named_basic("bool");
    h.mem.map(DATA, vec![1]);
    h.local("ok", bool_ty, DATA, 1, 1);
    let env = h.build();

    let v = env.eval(vec![local("ok"), Op::BoolToConst]).unwrap().unwrap();
    assert_eq!((v.addr, v.kind), (0, Kind::Bool));
    assert!(v.declared_type.is_none());
    assert!(bool_val(v.value.as_ref().unwrap()));
}

#[test]
fn test_push_register_and_missing_register() {
    let env = Harness::new().build();
    let v = env.eval_value(vec![Op::PushRegister {
        regnum: 7,
        name: "RSP".to_string(),
    }]);
    assert_eq!(v.type_string(), "uint64");
    assert_eq!(probe_value::constant::uint64_val(v.value.as_ref().unwrap()).0, SP);

    let err = env.eval_err(vec![Op::PushRegister {
        regnum: 99,
        name: "X5".to_string(),
    }]);
    assert_eq!(err, "could not find symbol value for X5");
}

#[test]
fn test_push_curg_without_goroutine() {
    let h = Harness::new();
    let int = h.int();
    h.types().insert(TypeData::new(
        "runtime.g",
        8,
        8,
        TypeKind::Struct {
            fields: vec![probe_types::Field::new("goid", int, 0)],
        },
    ));
    let env = h.build();

    let g = env.eval(vec![Op::PushCurg]).unwrap().unwrap();
    assert_eq!(g.name, "curg");
    assert_eq!(g.children[0].name, "goid");
    assert_eq!(int_of(&g.children[0]), 0);

    let err = Harness::new().build().eval_err(vec![Op::PushCurg]);
    assert_eq!(err, "could not find runtime.g");
}

#[test]
fn test_frame_offset_and_thread_id() {
    let mut env = Harness::new().build();
    env.scope.frame_offset = -0x40;
    let v = env.eval_value(vec![Op::PushFrameOffset]);
    assert_eq!(int_of(&v), -0x40);
    let v = env.eval_value(vec![Op::PushThreadId]);
    assert_eq!(int_of(&v), 1);
}

#[test]
fn test_type_cast_int_to_pointer() {
    let mut h = Harness::new();
    let int = h.int();
    let ptr = h.types().pointer_to(int);
    h.map_words(DATA, &[31]);
    h.local("x", int, DATA, 1, 1);
    let env = h.build();

    let v = env.eval_value(vec![
        int_const(DATA as i64),
        Op::TypeCast {
            ty: ptr,
            expr: "1".to_string(),
        },
        Op::PointerDeref {
            expr: "*(*int)(addr)".to_string(),
        },
    ]);
    assert_eq!((v.addr, int_of(&v)), (DATA, 31));

    let string = env.scope.types().named_basic("string");
    let err = env.eval_err(vec![
        int_const(1),
        Op::TypeCast {
            ty: ptr,
            expr: "x".to_string(),
        },
        Op::TypeCast {
            ty: string,
            expr: "p".to_string(),
        },
    ]);
    assert_eq!(err, "can not convert \"p\" to string");
}

#[test]
fn test_eval_expression_names_result() {
    let mut h = Harness::new();
    let int = h.int();
    h.map_words(DATA, &[4]);
    h.local("x", int, DATA, 1, 1);
    let env = h.build();

    let mut compiler = FakeCompiler::default();
    compiler.add("x + 1", vec![local("x"), int_const(1), binary(BinaryOp::Add)]);
    compiler.add("nothing", vec![]);

    let v = env
        .scope
        .eval_expression(&compiler, "x + 1", &LoadConfig::FULL_VALUE)
        .unwrap();
    assert_eq!(v.name, "x + 1");
    assert_eq!(int_of(&v), 5);

    let err = env
        .scope
        .eval_expression(&compiler, "nothing", &LoadConfig::FULL_VALUE)
        .unwrap_err();
    assert_eq!(err.to_string(), "expression \"nothing\" has no value");
}

#[test]
fn test_struct_select_through_pointer() {
    let mut h = Harness::new();
    let int = h.int();
    let point = h.types().insert(TypeData::new(
        "main.Point",
        16,
        8,
        TypeKind::Struct {
            fields: vec![
                probe_types::Field::new("X", int, 0),
                probe_types::Field::new("Y", int, 8),
            ],
        },
    ));
    let ptr = h.types().pointer_to(point);
    h.map_words(DATA, &[DATA + 0x10, 0, 3, 4]);
    h.local("p", ptr, DATA, 1, 1);
    let env = h.build();

    let v = env.eval_value(vec![
        local("p"),
        Op::Select {
            name: "Y".to_string(),
        },
    ]);
    assert_eq!((v.addr, int_of(&v)), (DATA + 0x18, 4));

    let err = env.eval_err(vec![
        local("p"),
        Op::Select {
            name: "Z".to_string(),
        },
    ]);
    assert!(err.ends_with("has no member Z"), "{err}");
}

#[test]
fn test_reslice_of_untyped_value_fails() {
    let env = Harness::new().build();
    let err = env.eval_err(vec![
        int_const(7),
        int_const(0),
        Op::Reslice {
            has_high: false,
            expr: "7[0:]".to_string(),
        },
    ]);
    assert_eq!(err, "can not slice \"7[0:]\" (type int)");
}

fn array_env(len: i64) -> Env {
    let mut h = Harness::new();
    let int32 = h.types().named_basic("int32");
    let arr = h.types().array_of(int32, len);
    h.mem.map_zeroed(DATA, len as usize * 4);
    h.local("a", arr, DATA, 1, 1);
    h.build()
}

proptest! {
    #[test]
    fn test_reslice_geometry(low in 0i64..=8, extra in 0i64..=8) {
        let env = array_env(8);
        let high = (low + extra).min(8);
        let v = env
            .eval(vec![
                local("a"),
                int_const(low),
                int_const(high),
                Op::Reslice { has_high: true, expr: "a[l:h]".to_string() },
            ])
            .unwrap()
            .unwrap();
        prop_assert_eq!(v.kind, Kind::Slice);
        prop_assert_eq!(v.len, high - low);
        prop_assert_eq!(v.base, DATA + 4 * low as u64);

        // reslicing the whole result again changes nothing
        let again = env
            .eval(vec![
                local("a"),
                int_const(low),
                int_const(high),
                Op::Reslice { has_high: true, expr: "a[l:h]".to_string() },
                int_const(0),
                int_const(high - low),
                Op::Reslice { has_high: true, expr: "a[l:h][0:n]".to_string() },
            ])
            .unwrap()
            .unwrap();
        prop_assert_eq!((again.base, again.len), (v.base, v.len));
    }

    #[test]
    fn test_int8_cast_truncates(n in any::<i64>()) {
        let env = Harness::new().build();
        let int8 = env.scope.types().named_basic("int8");
        let v: Value = env
            .eval(vec![
                Op::PushConst(make_int64(n)),
                Op::TypeCast { ty: int8, expr: "n".to_string() },
            ])
            .unwrap()
            .unwrap();
        prop_assert_eq!(int_of(&v), i64::from(n as i8));
    }
}
