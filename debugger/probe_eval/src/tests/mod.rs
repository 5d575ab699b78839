//! Test modules relocated from implementation files.
//!
//! Every test runs programs against an in-memory amd64 process built by
//! [`Harness`]: one goroutine-less thread stopped in `main.main`, a stack
//! mapped around its SP and a data region for variables.

mod call_tests;
mod interpreter_tests;

use std::sync::Arc;

use probe_types::{Idx, TypeTable};
use probe_value::constant::int64_val;
use probe_value::{
    Arch, DwarfRegisters, EvalResult, FakeMemory, LoadConfig, SharedMemory, Target, Value,
};

use crate::collab::{
    FuncArgs, Function, LexicalEntry, LogicalThread, Stackframe, VarLocation,
};
use crate::program::{Op, Program};
use crate::scope::{CallOptions, EvalScope, Session};
use crate::testing::{ContinueHook, FakeDebugInfo, FakeProcess, FakeUnwinder};
use crate::{evaluate, StopReason};

const MAIN_ENTRY: u64 = 0x40_1000;
const PC: u64 = MAIN_ENTRY + 0x24;
/// Stack pointer of the stopped frame.
const SP: u64 = 0xc000_8000;
const STACK_LO: u64 = 0xc000_0000;
/// Start of the region test variables live in.
const DATA: u64 = 0x50_0000;

struct Harness {
    target: Arc<Target>,
    mem: Arc<FakeMemory>,
    di: FakeDebugInfo,
    hook: Option<ContinueHook>,
    stops: Vec<StopReason>,
    frames: Vec<Stackframe>,
    goroutine: Option<LogicalThread>,
}

impl Harness {
    fn new() -> Self {
        Self::with_arch(Arch::AMD64)
    }

    fn with_arch(arch: Arch) -> Self {
        let target = Target::new(arch);
        let mem = Arc::new(FakeMemory::new());
        mem.map_zeroed(STACK_LO, (SP - STACK_LO) as usize + 0x100);
        mem.map_zeroed(DATA, 0x1000);
        let mut di = FakeDebugInfo::new(&target);
        di.add_function(main_function(), FuncArgs::default());
        Self {
            target,
            mem,
            di,
            hook: None,
            stops: Vec::new(),
            frames: Vec::new(),
            goroutine: None,
        }
    }

    fn types(&self) -> &TypeTable {
        &self.target.types
    }

    fn int(&self) -> Idx {
        self.types().named_basic("int")
    }

    fn map_words(&self, addr: u64, words: &[u64]) {
        self.mem
            .map(addr, words.iter().flat_map(|w| w.to_le_bytes()).collect());
    }

    /// A local of the frame stored at `addr`.
    fn local(&mut self, name: &str, ty: Idx, addr: u64, depth: i32, decl_line: i64) {
        self.di.locals.push(LexicalEntry {
            name: name.to_string(),
            ty,
            location: VarLocation::Addr(addr),
            depth,
            decl_line,
            is_param: false,
            is_return: false,
        });
    }

    fn registers(&self) -> DwarfRegisters {
        let mut regs = self.target.arch.new_registers();
        regs.set_u64(regs.pc_regnum, PC);
        regs.set_u64(regs.sp_regnum, SP);
        regs.set_u64(regs.bp_regnum, SP + 0x40);
        regs.cfa = (SP + 0x50) as i64;
        regs.frame_base = regs.cfa;
        regs
    }

    fn build(self) -> Env {
        self.build_with(None)
    }

    /// Like [`build`](Self::build), with injected calls allowed.
    fn build_calls(self) -> Env {
        self.build_with(Some(CallOptions::default()))
    }

    fn build_with(self, options: Option<CallOptions>) -> Env {
        let regs = self.registers();
        let mut process = FakeProcess::new(Arc::clone(&self.mem), regs.clone());
        if let Some(hook) = self.hook {
            process = process.with_hook(hook);
        }
        process.goroutine = self.goroutine;
        for reason in self.stops {
            process.push_stop(reason);
        }
        let process = Arc::new(process);
        let function = main_function();
        let session = Session::new(
            Arc::clone(&self.target),
            Arc::new(self.di),
            Arc::clone(&process) as Arc<dyn crate::ProcessControl>,
            Arc::new(FakeUnwinder {
                frames: self.frames,
            }),
        );
        let mem = Arc::clone(&self.mem) as SharedMemory;
        let mut scope = EvalScope::new(&session, mem, PC, Some(function), regs);
        scope.thread_id = process.thread.0;
        if let Some(options) = options {
            scope = scope.with_call_context(options);
        }
        Env {
            scope,
            process,
            mem: self.mem,
        }
    }
}

struct Env {
    scope: EvalScope,
    process: Arc<FakeProcess>,
    mem: Arc<FakeMemory>,
}

impl Env {
    fn eval(&self, ops: Vec<Op>) -> EvalResult<Option<Value>> {
        evaluate(&self.scope, &Program::new(ops))
    }

    /// Evaluate and fully load the single result.
    fn eval_value(&self, ops: Vec<Op>) -> Value {
        let mut v = self.eval(ops).unwrap().unwrap();
        v.load(&LoadConfig::FULL_VALUE);
        v
    }

    fn eval_err(&self, ops: Vec<Op>) -> String {
        self.eval(ops).unwrap_err().to_string()
    }

    fn read_word(&self, addr: u64) -> u64 {
        probe_value::memory::read_uint_raw(self.mem.as_ref(), addr, 8).unwrap()
    }
}

fn main_function() -> Function {
    Function::new("main.main", MAIN_ENTRY, MAIN_ENTRY + 0x100)
}

fn int_of(v: &Value) -> i64 {
    int64_val(v.value.as_ref().unwrap()).0
}

fn local(name: &str) -> Op {
    Op::PushLocal {
        name: name.to_string(),
        frame: 0,
    }
}

fn int_const(n: i64) -> Op {
    Op::PushConst(probe_value::constant::make_int64(n))
}
