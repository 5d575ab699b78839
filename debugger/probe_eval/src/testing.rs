//! In-memory implementations of the debugger services, for tests.
//!
//! None of these talk to a real process. [`FakeProcess`] keeps one
//! thread's registers and a [`FakeMemory`] address space, counts how often
//! it was continued, and replays scripted stops.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use probe_types::Idx;
use probe_value::{
    DwarfRegisters, EvalError, EvalResult, FakeMemory, SharedMemory, Target,
};
use rustc_hash::FxHashMap;

use crate::collab::{
    DebugInfo, EvalLookup, ExprCompiler, FuncArgs, Function, LexicalEntry, LogicalThread,
    NamedConst, PackageVar, ProcessControl, Stackframe, StopEvent, StopReason, ThreadId,
    Unwinder, VisibilityFlags,
};
use crate::program::Program;

/// Debug info held in plain vectors.
pub struct FakeDebugInfo {
    pub target: Arc<Target>,
    pub producer: String,
    pub package_vars: Vec<PackageVar>,
    pub functions: Vec<Function>,
    pub constants: Vec<NamedConst>,
    /// Lexical entries returned for every function and pc.
    pub locals: Vec<LexicalEntry>,
    pub formal_args: FxHashMap<String, FuncArgs>,
    pub packages: FxHashMap<String, Vec<String>>,
}

impl FakeDebugInfo {
    pub fn new(target: &Arc<Target>) -> Self {
        Self {
            target: Arc::clone(target),
            producer: "Go cmd/compile go1.21.4".to_string(),
            package_vars: Vec::new(),
            functions: Vec::new(),
            constants: Vec::new(),
            locals: Vec::new(),
            formal_args: FxHashMap::default(),
            packages: FxHashMap::default(),
        }
    }

    /// Add a function, registering its entry with the target so function
    /// values loaded from memory can be named.
    pub fn add_function(&mut self, f: Function, args: FuncArgs) {
        self.target.register_function(f.entry, f.name.clone());
        self.formal_args.insert(f.name.clone(), args);
        self.functions.push(f);
    }
}

impl DebugInfo for FakeDebugInfo {
    fn producer(&self) -> &str {
        &self.producer
    }

    fn find_type(&self, name: &str) -> Option<Idx> {
        self.target.types.lookup(name)
    }

    fn package_map(&self, pkg: &str) -> Vec<String> {
        self.packages.get(pkg).cloned().unwrap_or_default()
    }

    fn package_vars(&self) -> &[PackageVar] {
        &self.package_vars
    }

    fn functions(&self) -> &[Function] {
        &self.functions
    }

    fn constants(&self) -> &[NamedConst] {
        &self.constants
    }

    fn variables(
        &self,
        _func: &Function,
        _pc: u64,
        _line: i64,
        _flags: VisibilityFlags,
    ) -> EvalResult<Vec<LexicalEntry>> {
        Ok(self.locals.clone())
    }

    fn formal_args(&self, func: &Function) -> EvalResult<FuncArgs> {
        self.formal_args
            .get(&func.name)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("no formal arguments for {}", func.name)))
    }
}

/// Hook run on every continue, before the stop is reported.
pub type ContinueHook = Box<dyn Fn(&FakeMemory, &DwarfRegisters) + Send + Sync>;

/// A single-threaded stopped process.
pub struct FakeProcess {
    pub mem: Arc<FakeMemory>,
    pub thread: ThreadId,
    pub goroutine: Option<LogicalThread>,
    pub trampoline: u64,
    regs: Mutex<DwarfRegisters>,
    writes: Mutex<Vec<(ThreadId, u64, u64)>>,
    continues: Mutex<usize>,
    stops: Mutex<VecDeque<StopReason>>,
    continue_error: Mutex<Option<String>>,
    on_continue: Option<ContinueHook>,
}

impl FakeProcess {
    pub fn new(mem: Arc<FakeMemory>, regs: DwarfRegisters) -> Self {
        Self {
            mem,
            thread: ThreadId(1),
            goroutine: None,
            trampoline: 0xdead_0000,
            regs: Mutex::new(regs),
            writes: Mutex::new(Vec::new()),
            continues: Mutex::new(0),
            stops: Mutex::new(VecDeque::new()),
            continue_error: Mutex::new(None),
            on_continue: None,
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: ContinueHook) -> Self {
        self.on_continue = Some(hook);
        self
    }

    /// Report `reason` on the next continue instead of `CallReturned`.
    pub fn push_stop(&self, reason: StopReason) {
        self.stops.lock().push_back(reason);
    }

    /// Make the next continue fail with `message`, as if the process
    /// had gone away.
    pub fn fail_next_continue(&self, message: impl Into<String>) {
        *self.continue_error.lock() = Some(message.into());
    }

    pub fn continue_count(&self) -> usize {
        *self.continues.lock()
    }

    /// Every register write as (thread, regnum, value), in order.
    pub fn register_writes(&self) -> Vec<(ThreadId, u64, u64)> {
        self.writes.lock().clone()
    }

    pub fn current_registers(&self) -> DwarfRegisters {
        self.regs.lock().clone()
    }
}

impl ProcessControl for FakeProcess {
    fn memory(&self) -> SharedMemory {
        Arc::clone(&self.mem) as SharedMemory
    }

    fn current_thread(&self) -> ThreadId {
        self.thread
    }

    fn find_goroutine(&self, gid: Option<i64>) -> EvalResult<Option<LogicalThread>> {
        match (gid, &self.goroutine) {
            (None, g) => Ok(g.clone()),
            (Some(id), Some(g)) if g.id == id => Ok(Some(g.clone())),
            (Some(id), _) => Err(EvalError::new(format!("unknown goroutine {id}"))),
        }
    }

    fn thread_goroutine(&self, thread: ThreadId) -> EvalResult<Option<LogicalThread>> {
        if thread == self.thread {
            Ok(self.goroutine.clone())
        } else {
            Ok(None)
        }
    }

    fn registers(&self, _thread: ThreadId) -> EvalResult<DwarfRegisters> {
        Ok(self.regs.lock().clone())
    }

    fn set_register(&self, thread: ThreadId, regnum: u64, value: u64) -> EvalResult<()> {
        self.writes.lock().push((thread, regnum, value));
        self.regs.lock().set_u64(regnum, value);
        Ok(())
    }

    fn continue_target(&self, _deadline: Option<Instant>) -> EvalResult<StopEvent> {
        *self.continues.lock() += 1;
        if let Some(message) = self.continue_error.lock().take() {
            return Err(EvalError::new(message));
        }
        if let Some(hook) = &self.on_continue {
            let regs = self.regs.lock().clone();
            hook(&self.mem, &regs);
        }
        let reason = self
            .stops
            .lock()
            .pop_front()
            .unwrap_or(StopReason::CallReturned);
        Ok(StopEvent {
            goroutine: self.goroutine.clone(),
            thread: self.thread,
            reason,
        })
    }

    fn return_trampoline(&self) -> u64 {
        self.trampoline
    }
}

/// Fixed stack traces.
#[derive(Default)]
pub struct FakeUnwinder {
    pub frames: Vec<Stackframe>,
}

impl Unwinder for FakeUnwinder {
    fn goroutine_stacktrace(
        &self,
        _g: &LogicalThread,
        depth: usize,
        _read_defers: bool,
    ) -> EvalResult<Vec<Stackframe>> {
        Ok(self.frames.iter().take(depth).cloned().collect())
    }

    fn thread_stacktrace(&self, _thread: ThreadId, depth: usize) -> EvalResult<Vec<Stackframe>> {
        Ok(self.frames.iter().take(depth).cloned().collect())
    }
}

/// A compiler that looks programs up by their source text.
#[derive(Default)]
pub struct FakeCompiler {
    programs: FxHashMap<String, Program>,
}

impl FakeCompiler {
    pub fn add(&mut self, expr: &str, program: impl Into<Program>) {
        self.programs.insert(expr.to_string(), program.into());
    }

    /// Register the program for `lhs = rhs`.
    pub fn add_set(&mut self, lhs: &str, rhs: &str, program: impl Into<Program>) {
        self.add(&format!("{lhs} = {rhs}"), program);
    }
}

impl ExprCompiler for FakeCompiler {
    fn compile(&self, _lookup: &dyn EvalLookup, expr: &str, _can_set: bool) -> EvalResult<Program> {
        self.programs
            .get(expr)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("could not compile {expr:?}")))
    }

    fn compile_set(&self, lookup: &dyn EvalLookup, lhs: &str, rhs: &str) -> EvalResult<Program> {
        self.compile(lookup, &format!("{lhs} = {rhs}"), true)
    }
}
