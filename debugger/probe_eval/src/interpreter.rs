//! The stack machine that runs opcode programs.
//!
//! An [`EvalStack`] executes a [`Program`] one op at a time against an
//! operand stack. Most ops finish immediately. The call-injection ops may
//! instead *suspend* the machine: the target has to run before evaluation
//! can go on. The driver then continues the target and hands the stop it
//! observed back to [`EvalStack::resume`]. [`evaluate`] is that driver for
//! callers that only want the result.
//!
//! # Errors
//!
//! The first failing op stops the run. Injected calls that are still open
//! are then undone innermost first, each through one more suspend/resume
//! cycle, before the error is handed out by [`EvalStack::result`].

use std::time::Instant;

use probe_types::Kind;
use probe_value::constant::{bool_val, make_int64};
use probe_value::errors::{expected_boolean, internal_error, symbol_not_found};
use probe_value::{
    Constant, EvalError, EvalResult, LoadConfig, LocalsFlags, Value, ValueFlags,
    FAKE_ADDRESS_UNRESOLV,
};
use smallvec::SmallVec;
use tracing::{debug, error, trace};

use crate::access::{
    eval_addr_of, eval_index, eval_pointer_deref, eval_reslice, eval_select, eval_type_assert,
};
use crate::builtins;
use crate::call::{CallInjection, CallPhase};
use crate::cast::eval_type_cast;
use crate::collab::{ExprCompiler, StopEvent, ThreadId, ThreadStatus};
use crate::operators::{eval_binary, eval_unary};
use crate::program::{JumpCondition, Op, Program};
use crate::scope::{convert_eval_scope, EvalScope};

/// State of one program run.
pub struct EvalStack {
    pub(crate) stack: Vec<Value>,
    /// Open injected calls, innermost last.
    pub(crate) calls: Vec<CallInjection>,
    program: Program,
    pc: usize,
    pub(crate) suspended: bool,
    err: Option<EvalError>,
    pub(crate) scope: EvalScope,
    /// Thread register writes go to.
    pub(crate) cur_thread: ThreadId,
    pub(crate) next_call_seq: u64,
    /// Injection whose undo was last started.
    last_retired: Option<u64>,
    // stack registers relative to the top of the logical thread's stack,
    // so they survive the runtime moving the stack during a call
    sp_off: i64,
    bp_off: i64,
    fb_off: i64,
}

impl EvalStack {
    pub fn new(scope: EvalScope, program: Program) -> Self {
        let cur_thread = scope
            .g
            .as_ref()
            .and_then(|g| g.thread)
            .unwrap_or(ThreadId(scope.thread_id));
        let (sp_off, bp_off, fb_off) = match &scope.g {
            Some(g) => {
                let hi = g.stack_hi as i64;
                (
                    scope.regs.sp() as i64 - hi,
                    scope.regs.bp() as i64 - hi,
                    scope.regs.frame_base - hi,
                )
            }
            None => (0, 0, 0),
        };
        Self {
            stack: Vec::new(),
            calls: Vec::new(),
            program,
            pc: 0,
            suspended: false,
            err: None,
            scope,
            cur_thread,
            next_call_seq: 0,
            last_retired: None,
            sp_off,
            bp_off,
            fb_off,
        }
    }

    #[inline]
    pub fn scope(&self) -> &EvalScope {
        &self.scope
    }

    /// Whether the target must be continued before evaluation can go on.
    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Whether the pending continue undoes an injected call rather than
    /// running one.
    pub fn is_undoing(&self) -> bool {
        self.calls
            .last()
            .is_some_and(|c| c.phase == CallPhase::Undoing)
    }

    /// Run until the program ends or suspends.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn start(&mut self) {
        debug!("eval program:\n{}", self.program.listing());
        self.run();
    }

    /// Continue after the target stopped at `event`.
    #[tracing::instrument(level = "debug", skip_all, fields(reason = ?event.reason))]
    pub fn resume(&mut self, event: StopEvent) {
        self.suspended = false;

        if let Some(g) = event.goroutine {
            let same = self.scope.g.as_ref().is_some_and(|cur| cur.id == g.id);
            if same {
                self.scope.g = Some(g);
            } else {
                // the runtime moved the call to another logical thread; the
                // original one is parked until the call returns
                debug!(from = ?self.scope.g.as_ref().map(|g| g.id), to = g.id, "call moved to another goroutine");
                if let Some(orig) = self.scope.g.as_mut() {
                    orig.thread = None;
                    orig.status = ThreadStatus::Waiting;
                }
                if let Some(ctx) = self.scope.call_ctx.as_mut() {
                    ctx.injection_thread = g.thread;
                }
            }
        }
        self.refresh_frame_registers();
        self.cur_thread = event.thread;
        self.scope.mem.invalidate();

        self.call_step(event.reason);
        if self.suspended {
            return;
        }
        self.run();
    }

    /// Recompute the frame's stack registers after the stack may have moved.
    fn refresh_frame_registers(&mut self) {
        let Some(hi) = self.scope.g.as_ref().map(|g| g.stack_hi as i64) else {
            return;
        };
        let regs = &mut self.scope.regs;
        let (pc, sp, bp) = (regs.pc_regnum, regs.sp_regnum, regs.bp_regnum);
        let keep: SmallVec<[_; 3]> = [pc, bp, sp]
            .into_iter()
            .filter_map(|n| regs.reg(n).cloned().map(|r| (n, r)))
            .collect();
        regs.clear();
        for (n, r) in keep {
            regs.add_reg(n, r);
        }
        regs.set_u64(sp, (self.sp_off + hi) as u64);
        regs.set_u64(bp, (self.bp_off + hi) as u64);
        regs.frame_base = self.fb_off + hi;
        regs.cfa = self.scope.frame_offset + hi;
    }

    /// Stop with `err` after a failure of the driver itself, such as a
    /// continue that did not return. The registers of every open injection
    /// are written back without running the target again.
    pub fn abort(&mut self, err: EvalError) {
        error!(%err, open_calls = self.calls.len(), "evaluation aborted");
        self.suspended = false;
        self.restore_all_calls();
        self.err = Some(err);
    }

    fn run(&mut self) {
        while self.pc < self.program.len() && self.err.is_none() {
            let idx = self.pc;
            if let Err(err) = self.execute_op(idx) {
                let err = if err.is_internal() {
                    err.with_note(format!("op {idx}: {}", self.program.ops()[idx]))
                } else {
                    err
                };
                self.err = Some(err);
                break;
            }
            // wraps back to `target` after a jump to 0
            self.pc = self.pc.wrapping_add(1);
            if self.suspended {
                if let Some(ctx) = self.scope.call_ctx.as_mut() {
                    ctx.injection_thread = None;
                }
                return;
            }
        }

        if self.err.is_none() && !self.calls.is_empty() {
            self.err = Some(internal_error(format!(
                "eval program finished without error but {} call injections still active",
                self.calls.len()
            )));
        }

        if self.calls.is_empty() {
            return;
        }
        let Some(seq) = self.calls.last().map(|c| c.seq) else {
            return;
        };
        if self.last_retired == Some(seq) {
            let original = self.err.take().map(|e| e.to_string()).unwrap_or_default();
            self.err = Some(internal_error(format!(
                "could not undo injected call during error recovery, original error: {original}"
            )));
            self.suspended = false;
            return;
        }
        self.undo_top_call();
        self.last_retired = Some(seq);
        self.suspended = true;
        if let Some(ctx) = self.scope.call_ctx.as_mut() {
            ctx.injection_thread = None;
        }
    }

    /// The value left on the stack, loaded with `cfg` if given, or the
    /// error that stopped the run.
    pub fn result(&mut self, cfg: Option<&LoadConfig>) -> EvalResult<Option<Value>> {
        let r = match self.stack.len() {
            0 => None,
            1 => self.stack.pop(),
            n => {
                if self.err.is_none() {
                    self.err = Some(internal_error(format!("wrong stack size at end {n}")));
                }
                None
            }
        };
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        Ok(r.map(|mut v| {
            if let Some(cfg) = cfg {
                v.load(cfg);
            }
            v
        }))
    }

    #[inline]
    pub(crate) fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub(crate) fn pop(&mut self) -> EvalResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| internal_error("operand stack underflow"))
    }

    pub(crate) fn peek_mut(&mut self) -> EvalResult<&mut Value> {
        self.stack
            .last_mut()
            .ok_or_else(|| internal_error("operand stack underflow"))
    }

    /// Record `err` unless an earlier error is already pending.
    pub(crate) fn set_err(&mut self, err: EvalError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// Skip the `n` ops after the current one.
    pub(crate) fn skip(&mut self, n: usize) {
        self.pc += n;
    }

    fn execute_op(&mut self, idx: usize) -> EvalResult<()> {
        let op = self.program.ops()[idx].clone();
        trace!(idx, %op, depth = self.stack.len(), "exec");
        let scope = &self.scope;
        match op {
            Op::PushCurg => {
                let g = self.curg()?;
                self.push(g);
            }
            Op::PushFrameOffset => {
                let v = scope.constant(make_int64(scope.frame_offset));
                self.push(v);
            }
            Op::PushThreadId => {
                let v = scope.constant(make_int64(scope.thread_id));
                self.push(v);
            }
            Op::PushConst(c) => {
                let v = scope.constant(c);
                self.push(v);
            }
            Op::PushLocal { name, frame } => {
                let v = self.local(&name, frame)?;
                self.push(v);
            }
            Op::PushNil => {
                let v = scope.nil();
                self.push(v);
            }
            Op::PushRegister { regnum, name } => {
                let Some(reg) = scope.regs.reg(regnum) else {
                    return Err(symbol_not_found(&name));
                };
                let v = Value::register(name, reg.clone(), scope.mem.clone(), scope.target());
                self.push(v);
            }
            Op::PushPackageVar { pkg, name } => {
                let v = if pkg.is_empty() {
                    let pkg = scope
                        .function
                        .as_ref()
                        .map_or("", |f| f.package_name())
                        .to_string();
                    let mut v = scope.find_global(&pkg, &name)?;
                    v.name = name;
                    v
                } else {
                    scope.find_global(&pkg, &name)?
                };
                self.push(v);
            }

            Op::Select { name } => {
                let x = self.pop()?;
                let v = eval_select(&self.scope, &name, x)?;
                self.push(v);
            }
            Op::TypeAssert {
                ty,
                expr,
                type_expr,
            } => {
                let x = self.pop()?;
                let v = eval_type_assert(ty, &expr, &type_expr, x)?;
                self.push(v);
            }
            Op::PointerDeref { expr } => {
                let x = self.pop()?;
                let v = eval_pointer_deref(&expr, x)?;
                self.push(v);
            }
            Op::AddrOf { expr } => {
                let x = self.pop()?;
                let v = eval_addr_of(&expr, x)?;
                self.push(v);
            }
            Op::Reslice { has_high, expr } => {
                let high = if has_high { Some(self.pop()?) } else { None };
                let low = self.pop()?;
                let x = self.pop()?;
                let v = eval_reslice(&expr, x, low, high)?;
                self.push(v);
            }
            Op::Index { expr } => {
                let idx = self.pop()?;
                let x = self.pop()?;
                let v = eval_index(&expr, x, idx)?;
                self.push(v);
            }

            Op::Unary { op, expr } => {
                let x = self.pop()?;
                let v = eval_unary(&self.scope, op, &expr, x)?;
                self.push(v);
            }
            Op::TypeCast { ty, expr } => {
                let x = self.pop()?;
                let v = eval_type_cast(&self.scope, ty, &expr, x)?;
                self.push(v);
            }
            Op::Binary { op, x_expr, y_expr } => {
                let y = self.pop()?;
                let x = self.pop()?;
                let v = eval_binary(&self.scope, op, x, y, &x_expr, &y_expr)?;
                self.push(v);
            }
            Op::BoolToConst => {
                let mut x = self.pop()?;
                if x.kind != Kind::Bool {
                    return Err(internal_error("expected boolean"));
                }
                x.load(&LoadConfig::FULL_VALUE);
                x.check_readable()?;
                let v = self.scope.constant(x.value.unwrap_or(Constant::Unknown));
                self.push(v);
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::BuiltinCall { name, args } => {
                let Some(f) = builtins::lookup(&name) else {
                    return Err(internal_error(format!("unknown builtin {name}")));
                };
                if self.stack.len() < args.len() {
                    return Err(internal_error("operand stack underflow"));
                }
                let at = self.stack.len() - args.len();
                let vals: builtins::BuiltinArgs = self.stack.drain(at..).collect();
                let v = f(&self.scope, vals, &args)?;
                self.push(v);
            }

            Op::Jump {
                when,
                pop,
                target,
                node,
            } => {
                let mut x = if pop {
                    self.pop()?
                } else {
                    self.peek_mut()?.clone()
                };
                if x.kind != Kind::Bool {
                    return Err(match node {
                        Some(node) => expected_boolean(&node, x.kind.as_str()),
                        None => internal_error("expected boolean"),
                    });
                }
                x.load(&LoadConfig::FULL_VALUE);
                x.check_readable()?;
                let want = when == JumpCondition::IfTrue;
                if x.value.as_ref().is_some_and(|c| bool_val(c) == want) {
                    // the increment after this op lands on `target`
                    self.pc = target.wrapping_sub(1);
                }
            }

            Op::CallInjectionStart { arg_count, expr } => self.call_start(arg_count, &expr)?,
            Op::CallInjectionSetTarget => self.call_set_target()?,
            Op::CallInjectionCopyArg { arg_num, arg_expr } => {
                self.call_copy_arg(arg_num, &arg_expr)?;
            }
            Op::CallInjectionComplete => self.call_complete()?,
            Op::CallInjectionAllocString { phase } => self.alloc_string(phase)?,

            Op::SetValue { rhs_expr } => {
                let lhs = self.pop()?;
                let rhs = self.pop()?;
                self.scope.set_value(&lhs, rhs, &rhs_expr)?;
            }
        }
        Ok(())
    }

    /// The current logical thread's descriptor, or a stand-in whose `goid`
    /// is 0 when there is none.
    fn curg(&self) -> EvalResult<Value> {
        let scope = &self.scope;
        if let Some(v) = scope.g.as_ref().and_then(|g| g.value.clone()) {
            return Ok(v);
        }
        let Some(ty) = scope.debug_info().find_type("runtime.g") else {
            return Err(EvalError::new("could not find runtime.g"));
        };
        let mut g = scope.value("curg", FAKE_ADDRESS_UNRESOLV, ty);
        g.loaded = true;
        g.flags = ValueFlags::FAKE_ADDRESS;
        let mut goid = scope.constant(make_int64(scope.g.as_ref().map_or(0, |g| g.id)));
        goid.name = "goid".to_string();
        g.children = vec![goid];
        Ok(g)
    }

    /// The visible local `name`, in frame `frame` of the current thread
    /// when non-zero.
    fn local(&self, name: &str, frame: i64) -> EvalResult<Value> {
        let vars = if frame != 0 {
            let Ok(frame) = usize::try_from(frame) else {
                return Err(EvalError::new(format!("invalid frame {frame}")));
            };
            convert_eval_scope(&self.scope.session, None, frame, 0)?.locals(LocalsFlags::empty())?
        } else {
            self.scope.locals(LocalsFlags::empty())?
        };
        vars.into_iter()
            .find(|v| v.name == name && !v.flags.contains(ValueFlags::SHADOWED))
            .ok_or_else(|| symbol_not_found(name))
    }
}

/// Run `program` in `scope` to completion, continuing the target for
/// every injected call.
#[tracing::instrument(level = "debug", skip_all)]
pub fn evaluate(scope: &EvalScope, program: &Program) -> EvalResult<Option<Value>> {
    let mut stack = EvalStack::new(scope.clone(), program.clone());
    stack.start();
    drive(&mut stack);
    stack.result(None)
}

/// Continue the target until `stack` is no longer suspended.
pub(crate) fn drive(stack: &mut EvalStack) {
    while stack.is_suspended() {
        // undo cycles run without a deadline
        let deadline = if stack.is_undoing() {
            None
        } else {
            stack
                .scope()
                .call_ctx
                .as_ref()
                .and_then(|ctx| ctx.options.deadline)
                .map(|d| Instant::now() + d)
        };
        match stack.scope().process().continue_target(deadline) {
            Ok(event) => stack.resume(event),
            Err(err) => stack.abort(err),
        }
    }
}

impl EvalScope {
    /// Compile `expr`, evaluate it and load the result with `cfg`.
    ///
    /// An unnamed result is named after `expr`.
    #[tracing::instrument(level = "debug", skip(self, compiler, cfg))]
    pub fn eval_expression(
        &self,
        compiler: &dyn ExprCompiler,
        expr: &str,
        cfg: &LoadConfig,
    ) -> EvalResult<Value> {
        let program = compiler.compile(self, expr, self.call_ctx.is_some())?;
        let mut stack = EvalStack::new(self.clone(), program);
        stack.start();
        drive(&mut stack);
        let Some(mut v) = stack.result(Some(cfg))? else {
            return Err(EvalError::new(format!("expression {expr:?} has no value")));
        };
        if v.name.is_empty() {
            v.name = expr.to_string();
        }
        Ok(v)
    }

    /// Assign the value of expression `value` to the variable `name`.
    #[tracing::instrument(level = "debug", skip(self, compiler))]
    pub fn set_variable(
        &self,
        compiler: &dyn ExprCompiler,
        name: &str,
        value: &str,
    ) -> EvalResult<()> {
        let program = compiler.compile_set(self, name, value)?;
        evaluate(self, &program).map(|_| ())
    }

    /// Ids of the goroutines blocked receiving from, then sending to, the
    /// channel `expr` evaluates to.
    ///
    /// The first `start` waiters are skipped. Collection stops once more
    /// than `count` ids were gathered, so a result longer than `count`
    /// tells the caller another page exists. Anything that is not a
    /// channel has no waiters.
    #[tracing::instrument(level = "debug", skip(self, compiler))]
    pub fn chan_goroutines(
        &self,
        compiler: &dyn ExprCompiler,
        expr: &str,
        mut start: usize,
        count: usize,
    ) -> EvalResult<Vec<i64>> {
        let program = compiler.compile(self, expr, false)?;
        let Some(ch) = evaluate(self, &program)? else {
            return Ok(Vec::new());
        };
        if ch.kind != Kind::Chan {
            return Ok(Vec::new());
        }
        ch.check_readable()?;
        if ch.base == 0 {
            return Ok(Vec::new());
        }
        let Some(hchan) = self.debug_info().find_type("runtime.hchan") else {
            return Ok(Vec::new());
        };
        let hchan = self.value(ch.name.clone(), ch.base, hchan);

        let mut goids = Vec::new();
        for queue in ["recvq", "sendq"] {
            let Some(mut waiter) = member_path(&hchan, &[queue, "first"]) else {
                continue;
            };
            waiter = waiter.maybe_dereference();
            while waiter.addr != 0 && goids.len() <= count {
                let Some(mut goid) = member_path(&waiter, &["g", "goid"]) else {
                    break;
                };
                goid.load(&LoadConfig::SINGLE_VALUE);
                goid.check_readable()?;
                if start > 0 {
                    start -= 1;
                } else {
                    goids.push(goid.as_int()?);
                }
                waiter = waiter.struct_member("next")?.maybe_dereference();
            }
        }
        Ok(goids)
    }
}

/// Follow `names` through nested struct members. `None` as soon as one is
/// missing.
fn member_path(v: &Value, names: &[&str]) -> Option<Value> {
    let mut v = v.clone();
    for name in names {
        v = v.struct_member(name).ok()?;
    }
    Some(v)
}

impl std::fmt::Debug for EvalStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalStack")
            .field("pc", &self.pc)
            .field("depth", &self.stack.len())
            .field("calls", &self.calls.len())
            .field("suspended", &self.suspended)
            .field("err", &self.err)
            .finish_non_exhaustive()
    }
}

