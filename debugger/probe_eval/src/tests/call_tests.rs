use pretty_assertions::assert_eq;
use probe_value::constant::{make_bool, make_string, string_val};
use probe_value::memory::read_uint_raw;
use probe_value::ValueFlags;

use super::*;
use crate::collab::{FormalArg, StopEvent, ThreadId, ThreadStatus};
use crate::EvalStack;
use crate::set::STR_ALLOC_NOT_ALLOWED;

const ADD_ENTRY: u64 = 0x40_2000;
const MALLOC_ENTRY: u64 = 0x40_3000;
/// Block handed out by the allocator.
const BLOCK: u64 = DATA + 0x800;
const T1: ThreadId = ThreadId(1);

fn formal(name: &str, ty: Idx, off: i64, is_ret: bool) -> FormalArg {
    FormalArg {
        name: name.to_string(),
        ty,
        off,
        is_ret,
    }
}

/// `main.add(a, b int) int`, with a continue hook that runs it: the
/// arguments sit just above the return address.
fn with_add(h: &mut Harness) {
    let int = h.int();
    h.di.add_function(
        Function::new("main.add", ADD_ENTRY, ADD_ENTRY + 0x40),
        FuncArgs {
            arg_frame_size: 24,
            args: vec![
                formal("a", int, 0, false),
                formal("b", int, 8, false),
                formal("~r0", int, 16, true),
            ],
        },
    );
    h.hook = Some(Box::new(|mem: &FakeMemory, regs: &DwarfRegisters| {
        let sp = regs.sp();
        let a = read_uint_raw(mem, sp + 8, 8).unwrap();
        let b = read_uint_raw(mem, sp + 16, 8).unwrap();
        mem.write_u64(sp + 24, a.wrapping_add(b)).unwrap();
    }));
}

fn push_add() -> Op {
    Op::PushPackageVar {
        pkg: "main".to_string(),
        name: "add".to_string(),
    }
}

fn start(arg_count: usize, expr: &str) -> Op {
    Op::CallInjectionStart {
        arg_count,
        expr: expr.to_string(),
    }
}

fn copy_arg(arg_num: usize, arg_expr: &str) -> Op {
    Op::CallInjectionCopyArg {
        arg_num,
        arg_expr: arg_expr.to_string(),
    }
}

/// `add(x, y)` for integer literals.
fn add_call(x: i64, y: i64) -> Vec<Op> {
    vec![
        push_add(),
        start(2, "add"),
        int_const(x),
        copy_arg(0, &x.to_string()),
        int_const(y),
        copy_arg(1, &y.to_string()),
        Op::CallInjectionSetTarget,
        Op::CallInjectionComplete,
    ]
}

/// Writes that put SP and PC back where the caller had them.
fn restore() -> [(ThreadId, u64, u64); 2] {
    [(T1, 7, SP), (T1, 16, PC)]
}

#[test]
fn test_call_returns_result() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build_calls();

    let v = env.eval_value(add_call(2, 3));
    assert_eq!(int_of(&v), 5);
    assert!(v.flags.contains(ValueFlags::RETURN_ARGUMENT));
    assert_eq!(env.process.continue_count(), 1);

    let args_base = SP - 32;
    let mut expected = vec![
        (T1, 7, args_base),
        (T1, 7, args_base - 8),
        (T1, 16, ADD_ENTRY),
    ];
    expected.extend(restore());
    assert_eq!(env.process.register_writes(), expected);
    assert_eq!(env.read_word(args_base - 8), 0xdead_0000);
}

#[test]
fn test_result_survives_frame_reuse() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build_calls();

    let v = env.eval_value(add_call(20, 22));
    // a later call scribbles over the same argument frame
    env.eval_value(add_call(1, 1));
    assert_eq!(env.read_word(SP - 16), 2);
    assert_eq!(int_of(&v), 42);
}

#[test]
fn test_nested_call_carves_frame_below_outer() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build_calls();

    // add(add(1, 2), 3)
    let mut ops = vec![push_add(), start(2, "add")];
    ops.extend(add_call(1, 2));
    ops.extend([
        copy_arg(0, "add(1, 2)"),
        int_const(3),
        copy_arg(1, "3"),
        Op::CallInjectionSetTarget,
        Op::CallInjectionComplete,
    ]);
    let v = env.eval_value(ops);
    assert_eq!(int_of(&v), 6);
    assert_eq!(env.process.continue_count(), 2);

    let (outer, inner) = (SP - 32, SP - 64);
    assert_eq!(
        env.process.register_writes(),
        vec![
            (T1, 7, outer),
            (T1, 7, inner),
            (T1, 7, inner - 8),
            (T1, 16, ADD_ENTRY),
            (T1, 7, outer),
            (T1, 16, PC),
            (T1, 7, outer - 8),
            (T1, 16, ADD_ENTRY),
            (T1, 7, SP),
            (T1, 16, PC),
        ]
    );
}

#[test]
fn test_bad_argument_undoes_call() {
    let mut h = Harness::new();
    let int = h.int();
    h.di.add_function(
        Function::new("main.sum3", ADD_ENTRY + 0x100, ADD_ENTRY + 0x180),
        FuncArgs {
            arg_frame_size: 32,
            args: vec![
                formal("a", int, 0, false),
                formal("b", int, 8, false),
                formal("c", int, 16, false),
                formal("~r0", int, 24, true),
            ],
        },
    );
    let env = h.build_calls();

    // sum3(1, true, 3)
    let err = env.eval_err(vec![
        Op::PushPackageVar {
            pkg: "main".to_string(),
            name: "sum3".to_string(),
        },
        start(3, "sum3"),
        int_const(1),
        copy_arg(0, "1"),
        Op::PushConst(make_bool(true)),
        copy_arg(1, "true"),
        int_const(3),
        copy_arg(2, "3"),
        Op::CallInjectionSetTarget,
        Op::CallInjectionComplete,
    ]);
    assert_eq!(
        err,
        "error evaluating \"true\" as argument b in function main.sum3: \
         can not convert true constant to int"
    );
    let args_base = SP - 32;
    // the first argument was already in place
    assert_eq!(env.read_word(args_base), 1);
    // the call never ran; the only continue is the undo cycle
    assert_eq!(env.process.continue_count(), 1);
    let writes = env.process.register_writes();
    assert_eq!(writes[0], (T1, 7, args_base));
    assert_eq!(writes[1..].to_vec(), restore().to_vec());
    let regs = env.process.current_registers();
    assert_eq!((regs.sp(), regs.pc()), (SP, PC));
}

#[test]
fn test_breakpoint_inside_call() {
    let mut h = Harness::new();
    with_add(&mut h);
    h.stops.push(StopReason::Breakpoint);
    let env = h.build_calls();

    let err = env.eval_err(add_call(2, 3));
    assert_eq!(err, "call to main.add stopped at a breakpoint");
    assert_eq!(env.process.continue_count(), 2);
    let writes = env.process.register_writes();
    assert_eq!(writes[writes.len() - 2..].to_vec(), restore().to_vec());
    let regs = env.process.current_registers();
    assert_eq!((regs.sp(), regs.pc()), (SP, PC));
}

#[test]
fn test_failed_continue_restores_registers() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build_calls();
    env.process.fail_next_continue("ptrace: no such process");

    let err = env.eval_err(add_call(1, 2));
    assert_eq!(err, "ptrace: no such process");
    assert_eq!(env.process.continue_count(), 1);
    let writes = env.process.register_writes();
    assert_eq!(writes[3..].to_vec(), restore().to_vec());
    let regs = env.process.current_registers();
    assert_eq!((regs.sp(), regs.pc()), (SP, PC));
}

#[test]
fn test_failed_continue_restores_nested_calls_innermost_first() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build_calls();
    env.process.fail_next_continue("ptrace: no such process");

    let mut ops = vec![push_add(), start(2, "add")];
    ops.extend(add_call(1, 2));
    env.eval_err(ops);

    let (outer, inner) = (SP - 32, SP - 64);
    assert_eq!(
        env.process.register_writes(),
        vec![
            (T1, 7, outer),
            (T1, 7, inner),
            (T1, 7, inner - 8),
            (T1, 16, ADD_ENTRY),
            (T1, 7, outer),
            (T1, 16, PC),
            (T1, 7, SP),
            (T1, 16, PC),
        ]
    );
    assert_eq!(env.process.continue_count(), 1);
}

#[test]
fn test_restart_during_undo_is_fatal() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build_calls();

    // add(1, true)
    let ops = vec![
        push_add(),
        start(2, "add"),
        int_const(1),
        copy_arg(0, "1"),
        Op::PushConst(make_bool(true)),
        copy_arg(1, "true"),
        Op::CallInjectionSetTarget,
        Op::CallInjectionComplete,
    ];
    let mut stack = EvalStack::new(env.scope.clone(), Program::new(ops));
    stack.start();
    assert!(stack.is_suspended() && stack.is_undoing());

    // running again before the undo stop arrived retires the same call twice
    stack.start();
    assert!(!stack.is_suspended());
    let err = stack.result(None).unwrap_err();
    assert!(err.is_internal());
    assert_eq!(
        err.to_string(),
        "internal debugger error: could not undo injected call during error recovery, \
         original error: error evaluating \"true\" as argument b in function main.add: \
         can not convert true constant to int"
    );
    let writes = env.process.register_writes();
    assert_eq!(writes[1..].to_vec(), restore().to_vec());
    assert_eq!(env.process.continue_count(), 0);
}

#[test]
fn test_call_moved_to_another_goroutine() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build_calls();
    let t2 = ThreadId(2);
    let g = |id: i64, thread: ThreadId| LogicalThread {
        id,
        thread: Some(thread),
        stack_hi: SP + 0x1000,
        stack_lo: STACK_LO,
        status: ThreadStatus::Running,
        value: None,
    };
    let mut scope = env.scope.clone();
    scope.g = Some(g(1, T1));

    let mut stack = EvalStack::new(scope, Program::new(add_call(2, 3)));
    stack.start();
    assert!(stack.is_suspended());
    assert_eq!(env.process.register_writes().len(), 3);

    // the runtime ran the call on goroutine 2, on another thread
    env.mem.write_u64(SP - 32 + 16, 5).unwrap();
    stack.resume(StopEvent {
        goroutine: Some(g(2, t2)),
        thread: t2,
        reason: StopReason::CallReturned,
    });
    assert!(!stack.is_suspended());

    let parked = stack.scope().g.clone().unwrap();
    assert_eq!((parked.id, parked.thread, parked.status), (1, None, ThreadStatus::Waiting));
    let ctx = stack.scope().call_ctx.clone().unwrap();
    assert_eq!(ctx.injection_thread, Some(t2));

    let v = stack.result(Some(&LoadConfig::FULL_VALUE)).unwrap().unwrap();
    assert_eq!(int_of(&v), 5);
    // the caller's registers go back on the thread the call finished on
    assert_eq!(
        env.process.register_writes()[3..].to_vec(),
        vec![(t2, 7, SP), (t2, 16, PC)]
    );
}

#[test]
fn test_call_on_unsupported_arch_fails_fast() {
    let mut h = Harness::with_arch(Arch::I386);
    with_add(&mut h);
    let env = h.build_calls();

    let err = env.eval_err(add_call(2, 3));
    assert_eq!(err, "call injection not supported on 386");
    assert!(env.process.register_writes().is_empty());
    assert_eq!(env.process.continue_count(), 0);
}

#[test]
fn test_call_timeout() {
    let mut h = Harness::new();
    with_add(&mut h);
    h.stops.push(StopReason::DeadlineExceeded);
    let env = h.build_calls();

    let err = env.eval(add_call(2, 3)).unwrap_err();
    assert_eq!(err.to_string(), "timed out waiting for injected call to return");
    assert_eq!(env.process.continue_count(), 2);
}

#[test]
fn test_target_exit_abandons_calls() {
    let mut h = Harness::new();
    with_add(&mut h);
    h.stops.push(StopReason::Exited);
    let env = h.build_calls();

    let err = env.eval_err(add_call(2, 3));
    assert_eq!(err, "target exited during injected call");
    // nothing is restored on a dead process
    assert_eq!(env.process.continue_count(), 1);
    assert_eq!(env.process.register_writes().len(), 3);
}

#[test]
fn test_calls_need_call_context() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build();

    let err = env.eval_err(add_call(2, 3));
    assert_eq!(err, "call injection not allowed");
    assert_eq!(env.process.continue_count(), 0);
    assert!(env.process.register_writes().is_empty());
}

#[test]
fn test_argument_count_is_checked() {
    let mut h = Harness::new();
    with_add(&mut h);
    let env = h.build_calls();

    let err = env.eval_err(vec![push_add(), start(3, "add")]);
    assert_eq!(err, "too many arguments in call to add");
    let err = env.eval_err(vec![push_add(), start(1, "add")]);
    assert_eq!(err, "not enough arguments in call to add");
    assert!(env.process.register_writes().is_empty());
}

#[test]
fn test_call_of_non_function() {
    let env = Harness::new().build_calls();
    let err = env.eval_err(vec![int_const(1), start(0, "1")]);
    assert_eq!(err, "cannot call non-function 1");
}

fn alloc_string(lit: Op) -> Vec<Op> {
    vec![
        lit,
        Op::CallInjectionAllocString { phase: 0 },
        Op::CallInjectionComplete,
        Op::CallInjectionAllocString { phase: 1 },
    ]
}

fn with_malloc(h: &mut Harness) {
    let uintptr = h.types().named_basic("uintptr");
    let bool_ty = h.types().named_basic("bool");
    h.di.add_function(
        Function::new("runtime.mallocgc", MALLOC_ENTRY, MALLOC_ENTRY + 0x400),
        FuncArgs {
            arg_frame_size: 32,
            args: vec![
                formal("size", uintptr, 0, false),
                formal("typ", uintptr, 8, false),
                formal("needzero", bool_ty, 16, false),
                formal("~r0", uintptr, 24, true),
            ],
        },
    );
    h.hook = Some(Box::new(|mem: &FakeMemory, regs: &DwarfRegisters| {
        mem.write_u64(regs.sp() + 32, BLOCK).unwrap();
    }));
}

#[test]
fn test_string_literal_is_allocated() {
    let mut h = Harness::new();
    with_malloc(&mut h);
    let env = h.build_calls();

    let v = env.eval_value(alloc_string(Op::PushConst(make_string("hello"))));
    assert_eq!((v.base, v.len), (BLOCK, 5));
    assert!(!v.flags.contains(ValueFlags::CONSTANT));
    assert_eq!(string_val(v.value.as_ref().unwrap()), b"hello");
    assert_eq!(env.process.continue_count(), 1);

    let mut bytes = vec![0u8; 5];
    probe_value::memory::read_exact(env.mem.as_ref(), BLOCK, &mut bytes).unwrap();
    assert_eq!(bytes, b"hello");

    // size and needzero were passed to the allocator
    let args_base = SP - 32;
    assert_eq!(env.read_word(args_base), 5);
    assert_eq!(env.read_word(args_base + 16) & 0xff, 1);
}

#[test]
fn test_string_allocation_skipped_without_storage() {
    let mut h = Harness::new();
    with_malloc(&mut h);
    let string = h.types().named_basic("string");
    h.map_words(DATA, &[DATA + 0x100, 2]);
    h.mem.map(DATA + 0x100, b"ok".to_vec());
    h.local("s", string, DATA, 1, 1);
    let env = h.build_calls();

    let v = env.eval_value(alloc_string(local("s")));
    assert_eq!(v.base, DATA + 0x100);

    let v = env.eval_value(alloc_string(Op::PushConst(make_string(""))));
    assert_eq!(v.len, 0);
    assert_eq!(env.process.continue_count(), 0);
}

#[test]
fn test_string_allocation_needs_call_context() {
    let mut h = Harness::new();
    with_malloc(&mut h);
    let env = h.build();

    let err = env.eval_err(alloc_string(Op::PushConst(make_string("hello"))));
    assert_eq!(err, STR_ALLOC_NOT_ALLOWED);
}
