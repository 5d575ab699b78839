//! Evaluation scopes.
//!
//! An [`EvalScope`] pins an evaluation to one stack frame: the pc and
//! function to resolve names against, the registers and CFA that locate
//! locals, and the memory accessor values read through. Scopes are built
//! from unwound frames with [`frame_to_scope`] or, addressing a frame by
//! logical thread and depth, with [`convert_eval_scope`]. [`thread_scope`]
//! and [`goroutine_scope`] take the innermost frame of an OS thread.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use probe_types::{Idx, TypeTable};
use probe_value::{
    cache_memory, valid_register_name, Constant, DwarfRegisters, EvalError, EvalResult,
    LoadConfig, SharedMemory, Target, Value, MAX_FRAME_PREFETCH,
};

use crate::collab::{
    DebugInfo, DeferredCall, EvalLookup, Function, LogicalThread, ProcessControl, Stackframe,
    ThreadId, Unwinder,
};

/// Allocator called to give string literals a backing store.
pub const DEFAULT_ALLOCATOR: &str = "runtime.mallocgc";

/// The debugger services one evaluation runs against.
pub struct Session {
    pub target: Arc<Target>,
    pub debug_info: Arc<dyn DebugInfo>,
    pub process: Arc<dyn ProcessControl>,
    pub unwinder: Arc<dyn Unwinder>,
}

impl Session {
    pub fn new(
        target: Arc<Target>,
        debug_info: Arc<dyn DebugInfo>,
        process: Arc<dyn ProcessControl>,
        unwinder: Arc<dyn Unwinder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            debug_info,
            process,
            unwinder,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Options for calls injected while evaluating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOptions {
    /// How long one injected call may run before the evaluation fails.
    pub deadline: Option<Duration>,
    /// Function used to allocate string literals passed to calls.
    pub allocator: String,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            allocator: DEFAULT_ALLOCATOR.to_string(),
        }
    }
}

/// Present on scopes that may inject calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallContext {
    pub options: CallOptions,
    /// Thread the runtime moved the injected call to, when it did.
    pub injection_thread: Option<ThreadId>,
}

#[derive(Clone)]
pub struct EvalScope {
    pub pc: u64,
    pub function: Option<Function>,
    pub line: i64,
    pub regs: DwarfRegisters,
    /// CFA relative to the top of the logical thread's stack.
    pub frame_offset: i64,
    pub mem: SharedMemory,
    pub session: Arc<Session>,
    pub g: Option<LogicalThread>,
    pub thread_id: i64,
    pub call_ctx: Option<CallContext>,
    /// Limits for values an evaluation materializes on its own, such as
    /// the elements of a converted string.
    pub load_cfg: Option<LoadConfig>,
    pub(crate) dict_addr: OnceLock<u64>,
}

impl EvalScope {
    /// A scope at `pc` in `function` with the given frame registers.
    pub fn new(
        session: &Arc<Session>,
        mem: SharedMemory,
        pc: u64,
        function: Option<Function>,
        regs: DwarfRegisters,
    ) -> Self {
        Self {
            pc,
            function,
            line: 0,
            regs,
            frame_offset: 0,
            mem,
            session: Arc::clone(session),
            g: None,
            thread_id: 0,
            call_ctx: None,
            load_cfg: None,
            dict_addr: OnceLock::new(),
        }
    }

    /// Allow injected calls with `options`.
    #[must_use]
    pub fn with_call_context(mut self, options: CallOptions) -> Self {
        self.call_ctx = Some(CallContext {
            options,
            injection_thread: None,
        });
        self
    }

    #[inline]
    pub fn target(&self) -> &Arc<Target> {
        &self.session.target
    }

    #[inline]
    pub fn types(&self) -> &TypeTable {
        &self.session.target.types
    }

    #[inline]
    pub fn debug_info(&self) -> &dyn DebugInfo {
        self.session.debug_info.as_ref()
    }

    #[inline]
    pub fn process(&self) -> &dyn ProcessControl {
        self.session.process.as_ref()
    }

    #[inline]
    pub fn ptr_size(&self) -> i64 {
        self.session.target.ptr_size()
    }

    pub fn value(&self, name: impl Into<String>, addr: u64, ty: Idx) -> Value {
        Value::new(name, addr, ty, Arc::clone(&self.mem), self.target())
    }

    pub fn constant(&self, c: Constant) -> Value {
        Value::constant(c, Arc::clone(&self.mem), self.target())
    }

    pub fn nil(&self) -> Value {
        Value::nil(Arc::clone(&self.mem), self.target())
    }

    /// Address of the generics dictionary of the frame, 0 if none.
    pub fn dict_addr(&self) -> u64 {
        self.dict_addr.get().copied().unwrap_or(0)
    }
}

impl std::fmt::Debug for EvalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalScope")
            .field("pc", &format_args!("{:#x}", self.pc))
            .field("function", &self.function.as_ref().map(|f| &f.name))
            .field("line", &self.line)
            .field("frame_offset", &self.frame_offset)
            .field("g", &self.g.as_ref().map(|g| g.id))
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

/// A scope for `frames[0]`.
///
/// Memory between the SP of `frames[0]` and the CFA of its caller (or its
/// own CFA if there is no caller on the same stack) is read through a
/// window cache.
pub fn frame_to_scope(
    session: &Arc<Session>,
    mem: SharedMemory,
    g: Option<LogicalThread>,
    thread_id: i64,
    frames: &[Stackframe],
) -> EvalResult<EvalScope> {
    let Some(frame) = frames.first() else {
        return Err(EvalError::new("could not decode first frame"));
    };
    let min_addr = frame.regs.sp();
    let max_addr = match frames.get(1) {
        Some(caller) if caller.system_stack == frame.system_stack => caller.regs.cfa as u64,
        _ => frame.regs.cfa as u64,
    };
    let mem = if max_addr > min_addr && max_addr - min_addr < MAX_FRAME_PREFETCH {
        cache_memory(mem, min_addr, max_addr - min_addr)
    } else {
        mem
    };
    let mut scope = EvalScope::new(
        session,
        mem,
        frame.last_pc,
        frame.call.function.clone(),
        frame.regs.clone(),
    );
    scope.line = frame.call.line;
    scope.frame_offset = frame.frame_offset;
    scope.g = g;
    scope.thread_id = thread_id;
    Ok(scope)
}

/// A scope for the innermost frame of OS thread `thread`, without a
/// logical thread.
pub fn thread_scope(session: &Arc<Session>, thread: ThreadId) -> EvalResult<EvalScope> {
    let frames = session.unwinder.thread_stacktrace(thread, 1)?;
    frame_to_scope(session, session.process.memory(), None, thread.0, &frames)
}

/// Like [`thread_scope`], for the logical thread running on `thread`.
///
/// The scope's thread id comes from the logical thread and is 0 when the
/// runtime does not report it as running.
pub fn goroutine_scope(session: &Arc<Session>, thread: ThreadId) -> EvalResult<EvalScope> {
    let frames = session.unwinder.thread_stacktrace(thread, 1)?;
    if frames.is_empty() {
        return Err(EvalError::new("could not decode first frame"));
    }
    let Some(g) = session.process.thread_goroutine(thread)? else {
        return Err(EvalError::new(format!(
            "no G executing on thread {}",
            thread.0
        )));
    };
    let thread_id = g.thread.map_or(0, |t| t.0);
    frame_to_scope(session, session.process.memory(), Some(g), thread_id, &frames)
}

/// A scope for frame `frame` of logical thread `gid` (the current one if
/// `None`). A non-zero `defer` selects that deferred call of the frame
/// instead, counting from 1.
#[tracing::instrument(level = "debug", skip(session))]
pub fn convert_eval_scope(
    session: &Arc<Session>,
    gid: Option<i64>,
    frame: usize,
    defer: usize,
) -> EvalResult<EvalScope> {
    let process = session.process.as_ref();
    let current = process.current_thread();
    let mut thread_id = current.0;
    let g = process.find_goroutine(gid)?;

    let frames = match &g {
        Some(g) => {
            if let Some(t) = g.thread {
                thread_id = t.0;
            }
            session.unwinder.goroutine_stacktrace(g, frame + 1, defer > 0)?
        }
        None => session.unwinder.thread_stacktrace(current, frame + 1)?,
    };

    if frame >= frames.len() {
        return Err(EvalError::new(format!(
            "Frame {frame} does not exist in goroutine {}",
            gid.unwrap_or(-1)
        )));
    }

    if defer > 0 {
        let defers = &frames[frame].defers;
        let Some(d) = defers.get(defer - 1) else {
            return Err(EvalError::new(format!(
                "Frame {frame} only has {} deferred calls",
                defers.len()
            )));
        };
        if let Some(err) = &d.unreadable {
            return Err(err.clone());
        }
        return defer_scope(session, g, thread_id, &frames[frame], d);
    }

    frame_to_scope(session, process.memory(), g, thread_id, &frames[frame..])
}

/// A scope positioned at the entry of a deferred call, with its arguments
/// at the CFA.
fn defer_scope(
    session: &Arc<Session>,
    g: Option<LogicalThread>,
    thread_id: i64,
    frame: &Stackframe,
    d: &DeferredCall,
) -> EvalResult<EvalScope> {
    let Some(function) = d.function.clone() else {
        return Err(EvalError::new(format!("could not find function at {:#x}", d.pc)));
    };
    let mut regs = frame.regs.clone();
    regs.cfa = d.cfa;
    let sp = (d.cfa - session.target.ptr_size()) as u64;
    regs.set_u64(regs.sp_regnum, sp);
    let mut scope = EvalScope::new(session, session.process.memory(), d.pc, Some(function), regs);
    scope.line = d.line;
    scope.frame_offset = frame.frame_offset;
    scope.g = g;
    scope.thread_id = thread_id;
    Ok(scope)
}

impl EvalLookup for EvalScope {
    fn has_local(&self, name: &str) -> bool {
        let Some(function) = &self.function else {
            return false;
        };
        let flags = crate::resolver::visibility_flags(self.debug_info().producer(), false);
        let Ok(entries) = self.debug_info().variables(function, self.pc, self.line, flags) else {
            return false;
        };
        entries
            .iter()
            .any(|e| e.name == name || e.name.strip_prefix('&') == Some(name))
    }

    fn has_global(&self, pkg: &str, name: &str) -> bool {
        let di = self.debug_info();
        let matches = crate::resolver::symbol_matches;
        let has = |qualified: &str| {
            di.package_vars().iter().any(|v| matches(&v.name, qualified))
                || di.functions().iter().any(|f| matches(&f.name, qualified))
                || di.constants().iter().any(|c| matches(&c.full_name, qualified))
        };
        if pkg.is_empty() {
            return self
                .function
                .as_ref()
                .is_some_and(|f| has(&format!("{}.{name}", f.package_name())));
        }
        di.package_map(pkg)
            .iter()
            .any(|path| has(&format!("{path}.{name}")))
            || has(&format!("{pkg}.{name}"))
    }

    fn lookup_register_name(&self, name: &str) -> Option<u64> {
        let name = valid_register_name(name)?;
        self.target().arch.register_name_to_dwarf(name)
    }

    fn has_builtin(&self, name: &str) -> bool {
        crate::builtins::is_builtin(name)
    }

    fn find_type(&self, name: &str) -> Option<Idx> {
        self.debug_info().find_type(name)
    }
}
