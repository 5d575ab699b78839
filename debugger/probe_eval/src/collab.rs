//! Interfaces to the rest of the debugger.
//!
//! The evaluator does not load debug info, control the target or unwind
//! stacks itself. It consumes those services through the traits below,
//! which the debugger implements over its real backends and which
//! [`testing`](crate::testing) implements in memory.

use std::time::Instant;

use bitflags::bitflags;
use probe_types::Idx;
use probe_value::{DwarfRegisters, EvalError, EvalResult, MemoryReadWriter, SharedMemory, Value};

use crate::program::Program;

/// Handle of an OS thread of the target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(pub i64);

/// A function of the target program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    /// Fully qualified name, e.g. `github.com/a/b.(*T).M`.
    pub name: String,
    /// Entry point; 0 if every call site was inlined.
    pub entry: u64,
    pub end: u64,
    /// Debug-info offset of the function's entry.
    pub offset: u64,
}

impl Function {
    pub fn new(name: impl Into<String>, entry: u64, end: u64) -> Self {
        Self {
            name: name.into(),
            entry,
            end,
            offset: 0,
        }
    }

    /// Import path of the package that defines the function: everything
    /// before the first `.` that follows the last `/`.
    pub fn package_name(&self) -> &str {
        let path_end = self.name.rfind('/').unwrap_or(0);
        match self.name[path_end..].find('.') {
            Some(i) => &self.name[..path_end + i],
            None => "",
        }
    }
}

/// A package-level variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageVar {
    /// Fully qualified name, e.g. `main.counter`.
    pub name: String,
    pub ty: Idx,
    pub addr: u64,
    /// Index of the executable image that defines it.
    pub image: usize,
    /// Debug-info offset within the image.
    pub offset: u64,
}

/// A named constant. Debug info records the value as an integer of the
/// constant's type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedConst {
    pub full_name: String,
    pub ty: Idx,
    pub value: i64,
}

/// Where a lexical variable lives, already evaluated for the frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VarLocation {
    /// At this offset from the canonical frame address.
    Cfa(i64),
    /// At this offset from the frame base.
    FrameBase(i64),
    /// At a fixed address.
    Addr(u64),
    /// Entirely in the register with this DWARF number.
    Register(u64),
    /// No location at the current pc.
    OptimizedOut,
}

/// A variable or formal parameter visible at some pc.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexicalEntry {
    /// Source name. A leading `&` marks an escaped variable: the frame slot
    /// holds a pointer to the heap copy.
    pub name: String,
    pub ty: Idx,
    pub location: VarLocation,
    /// Nesting depth of the lexical block that declares it; 1 is the
    /// function body.
    pub depth: i32,
    pub decl_line: i64,
    pub is_param: bool,
    /// Formal parameter that is a return value.
    pub is_return: bool,
}

/// One formal argument of a function, as laid out for a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormalArg {
    pub name: String,
    pub ty: Idx,
    /// Offset from the start of the argument frame.
    pub off: i64,
    pub is_ret: bool,
}

/// Argument frame of a function: total size plus every argument and
/// return slot, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FuncArgs {
    pub arg_frame_size: i64,
    pub args: Vec<FormalArg>,
}

bitflags! {
    /// Filters for [`DebugInfo::variables`].
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct VisibilityFlags: u8 {
        /// Only variables whose lexical block contains the pc.
        const ONLY_VISIBLE = 1 << 0;
        /// Ignore declaration lines.
        const NO_DECL_LINE_CHECK = 1 << 1;
        /// The producer records reliable declaration lines; hide variables
        /// declared after the current line.
        const TRUST_DECL_LINE = 1 << 2;
    }
}

/// Symbol and type information of the target program.
pub trait DebugInfo: Send + Sync {
    /// Producer string of the main compilation unit, e.g. `go1.21.4`.
    fn producer(&self) -> &str;

    fn find_type(&self, name: &str) -> Option<Idx>;

    /// Import paths a short package name can refer to.
    fn package_map(&self, pkg: &str) -> Vec<String>;

    fn package_vars(&self) -> &[PackageVar];

    fn functions(&self) -> &[Function];

    fn lookup_function(&self, name: &str) -> Option<&Function> {
        self.functions().iter().find(|f| f.name == name)
    }

    fn constants(&self) -> &[NamedConst];

    /// Variables of `func` visible at `pc` and `line`.
    fn variables(
        &self,
        func: &Function,
        pc: u64,
        line: i64,
        flags: VisibilityFlags,
    ) -> EvalResult<Vec<LexicalEntry>>;

    /// Argument frame layout of `func`.
    fn formal_args(&self, func: &Function) -> EvalResult<FuncArgs>;

    /// Resolve a generic shape type against the dictionary at `dict_addr`.
    fn instantiate(&self, ty: Idx, dict_addr: u64, mem: &dyn MemoryReadWriter) -> EvalResult<Idx> {
        let _ = (dict_addr, mem);
        Ok(ty)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    Runnable,
    Waiting,
}

/// A goroutine: a logical thread scheduled by the runtime onto OS threads.
#[derive(Clone, Debug)]
pub struct LogicalThread {
    pub id: i64,
    /// OS thread currently running it, if any.
    pub thread: Option<ThreadId>,
    pub stack_hi: u64,
    pub stack_lo: u64,
    pub status: ThreadStatus,
    /// The runtime descriptor, pushed by `PushCurg`.
    pub value: Option<Value>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The injected call returned to the trampoline.
    CallReturned,
    /// Some other breakpoint was hit while the call ran.
    Breakpoint,
    Exited,
    DeadlineExceeded,
}

/// Where the target stopped after being continued.
#[derive(Clone, Debug)]
pub struct StopEvent {
    /// Logical thread that was running the injected call.
    pub goroutine: Option<LogicalThread>,
    pub thread: ThreadId,
    pub reason: StopReason,
}

/// Control of the stopped target process.
pub trait ProcessControl: Send + Sync {
    fn memory(&self) -> SharedMemory;

    fn current_thread(&self) -> ThreadId;

    /// The logical thread `gid`, or the one running on the current thread
    /// when `gid` is `None`. `Ok(None)` if the current thread runs none.
    fn find_goroutine(&self, gid: Option<i64>) -> EvalResult<Option<LogicalThread>>;

    /// The logical thread running on `thread`, `Ok(None)` if it runs none.
    fn thread_goroutine(&self, thread: ThreadId) -> EvalResult<Option<LogicalThread>>;

    fn registers(&self, thread: ThreadId) -> EvalResult<DwarfRegisters>;

    fn set_register(&self, thread: ThreadId, regnum: u64, value: u64) -> EvalResult<()>;

    /// Resume the target until the next stop. A deadline that passes
    /// before the stop yields [`StopReason::DeadlineExceeded`].
    fn continue_target(&self, deadline: Option<Instant>) -> EvalResult<StopEvent>;

    /// Address injected calls return to.
    fn return_trampoline(&self) -> u64;
}

/// Source position of a frame.
#[derive(Clone, Debug, Default)]
pub struct Location {
    pub pc: u64,
    pub function: Option<Function>,
    pub line: i64,
}

/// A call registered with `defer` that has not run yet.
#[derive(Clone, Debug)]
pub struct DeferredCall {
    /// Entry of the deferred function.
    pub pc: u64,
    pub function: Option<Function>,
    pub line: i64,
    /// Start of the arguments stored with the defer record.
    pub cfa: i64,
    pub unreadable: Option<EvalError>,
}

#[derive(Clone, Debug)]
pub struct Stackframe {
    pub call: Location,
    pub regs: DwarfRegisters,
    /// Pc of the call instruction, used for symbol lookup.
    pub last_pc: u64,
    /// CFA relative to the top of the logical thread's stack.
    pub frame_offset: i64,
    pub system_stack: bool,
    pub defers: Vec<DeferredCall>,
}

pub trait Unwinder: Send + Sync {
    /// Up to `depth` frames of a logical thread, innermost first.
    fn goroutine_stacktrace(
        &self,
        g: &LogicalThread,
        depth: usize,
        read_defers: bool,
    ) -> EvalResult<Vec<Stackframe>>;

    /// Up to `depth` frames of an OS thread, innermost first.
    fn thread_stacktrace(&self, thread: ThreadId, depth: usize) -> EvalResult<Vec<Stackframe>>;
}

/// What the expression compiler may ask about the scope it compiles for.
pub trait EvalLookup {
    fn has_local(&self, name: &str) -> bool;
    fn has_global(&self, pkg: &str, name: &str) -> bool;
    /// DWARF number of a register named in an expression.
    fn lookup_register_name(&self, name: &str) -> Option<u64>;
    fn has_builtin(&self, name: &str) -> bool;
    fn find_type(&self, name: &str) -> Option<Idx>;
}

/// Compiles expression text into opcode programs.
pub trait ExprCompiler {
    /// `can_set` allows the expression to contain injected calls.
    fn compile(&self, lookup: &dyn EvalLookup, expr: &str, can_set: bool) -> EvalResult<Program>;

    /// Compile `lhs = rhs`.
    fn compile_set(&self, lookup: &dyn EvalLookup, lhs: &str, rhs: &str) -> EvalResult<Program>;
}
