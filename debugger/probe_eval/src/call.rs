//! Injected function calls.
//!
//! A call `f(a, b)` compiles to
//!
//! ```text
//! <push f> CallInjectionStart
//! <push a> CallInjectionCopyArg 0
//! <push b> CallInjectionCopyArg 1
//! CallInjectionSetTarget
//! CallInjectionComplete
//! ```
//!
//! Start carves an argument frame below the current stack pointer and
//! records the registers it is about to change. The arguments are written
//! into that frame in order. SetTarget points the thread at the callee
//! with the return address set to the trampoline, then suspends. Once the
//! target stops at the trampoline, Complete reads the results and
//! restores the registers.
//!
//! Calls nest: an argument can itself contain a call, whose frame is
//! carved below the outer one.

use std::sync::Arc;

use probe_types::Kind;
use probe_value::constant::string_val;
use probe_value::errors::{
    call_injection_error, call_injection_not_allowed, call_timeout, internal_error,
    nil_pointer_dereference,
};
use probe_value::memory::{read_exact, read_uint_raw, write_uint_raw};
use probe_value::{
    EvalError, EvalResult, FakeMemory, LoadConfig, ReturnConvention, Value, ValueFlags,
};
use smallvec::{smallvec, SmallVec};
use tracing::{debug, error};

use crate::collab::{FormalArg, FuncArgs, Function, StopReason};
use crate::interpreter::EvalStack;
use crate::set::STR_ALLOC_NOT_ALLOWED;

/// Alignment of injected argument frames.
const FRAME_ALIGN: u64 = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum CallPhase {
    /// Arguments are being copied.
    ArgSetup,
    /// The target runs the callee.
    Dispatched,
    /// The callee returned to the trampoline.
    Returned,
    /// The registers were restored; the target runs once more.
    Undoing,
}

/// Registers overwritten by an injection.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Undo {
    pub(crate) pc: u64,
    pub(crate) sp: u64,
    pub(crate) lr: Option<u64>,
}

/// One open injected call.
#[derive(Debug)]
pub(crate) struct CallInjection {
    pub(crate) seq: u64,
    pub(crate) function: Function,
    pub(crate) closure_addr: u64,
    pub(crate) args: FuncArgs,
    /// Address of the first argument slot.
    pub(crate) args_base: u64,
    /// Formal inputs already taken by the receiver.
    arg_shift: usize,
    pub(crate) undo: Option<Undo>,
    pub(crate) phase: CallPhase,
}

impl CallInjection {
    fn inputs(&self) -> impl Iterator<Item = &FormalArg> {
        self.args.args.iter().filter(|a| !a.is_ret)
    }

    fn outputs(&self) -> impl Iterator<Item = &FormalArg> {
        self.args.args.iter().filter(|a| a.is_ret)
    }
}

fn align_down(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

impl EvalStack {
    fn top_call(&self) -> EvalResult<&CallInjection> {
        self.calls
            .last()
            .ok_or_else(|| internal_error("no call injection in progress"))
    }

    fn top_call_mut(&mut self) -> EvalResult<&mut CallInjection> {
        self.calls
            .last_mut()
            .ok_or_else(|| internal_error("no call injection in progress"))
    }

    fn set_register(&self, regnum: u64, value: u64) -> EvalResult<()> {
        self.scope
            .process()
            .set_register(self.cur_thread, regnum, value)
    }

    /// `CallInjectionStart`: pop the function value and open a call to it.
    pub(crate) fn call_start(&mut self, arg_count: usize, expr: &str) -> EvalResult<()> {
        let mut fv = self.pop()?;
        fv.load(&LoadConfig::SINGLE_VALUE);
        fv.check_readable()?;
        if fv.kind != Kind::Func {
            return Err(EvalError::new(format!("cannot call non-function {expr}")));
        }
        if fv.base == 0 {
            return Err(nil_pointer_dereference());
        }
        let Some(function) = self
            .scope
            .debug_info()
            .functions()
            .iter()
            .find(|f| f.entry == fv.base)
            .cloned()
        else {
            return Err(EvalError::new(format!(
                "could not find function for {expr} at {:#x}",
                fv.base
            )));
        };

        let receiver = fv.children.into_iter().next();
        self.open_call(function, fv.closure_addr, arg_count, receiver.is_some(), expr)?;
        if let Some(recv) = receiver {
            self.copy_formal(0, recv, expr)?;
        }
        Ok(())
    }

    /// Check the argument count, carve the argument frame and push the
    /// injection.
    fn open_call(
        &mut self,
        function: Function,
        closure_addr: u64,
        arg_count: usize,
        has_receiver: bool,
        expr: &str,
    ) -> EvalResult<()> {
        if self.scope.call_ctx.is_none() {
            return Err(call_injection_not_allowed());
        }
        let arch = self.scope.target().arch;
        if arch.return_convention().is_none() {
            return Err(call_injection_error(format!(
                "call injection not supported on {}",
                arch.name()
            )));
        }

        let args = self.scope.debug_info().formal_args(&function)?;
        let n_in = args.args.iter().filter(|a| !a.is_ret).count();
        let supplied = arg_count + usize::from(has_receiver);
        if supplied > n_in {
            return Err(EvalError::new(format!("too many arguments in call to {expr}")));
        }
        if supplied < n_in {
            return Err(EvalError::new(format!(
                "not enough arguments in call to {expr}"
            )));
        }

        let regs = self.scope.process().registers(self.cur_thread)?;
        let sp = regs.sp();
        let top = self.calls.last().map_or(sp, |outer| outer.args_base.min(sp));
        let frame_size = args.arg_frame_size.max(0) as u64;
        let args_base = align_down(top - frame_size, FRAME_ALIGN);
        let undo = Undo {
            pc: regs.pc(),
            sp,
            lr: regs.lr(),
        };

        let seq = self.next_call_seq;
        self.next_call_seq += 1;
        debug!(
            seq,
            function = %function.name,
            args_base = format_args!("{args_base:#x}"),
            "call injection start"
        );
        self.calls.push(CallInjection {
            seq,
            function,
            closure_addr,
            args,
            args_base,
            arg_shift: usize::from(has_receiver),
            undo: Some(undo),
            phase: CallPhase::ArgSetup,
        });

        let sp_regnum = self.scope.regs.sp_regnum;
        self.set_register(sp_regnum, args_base - arch.call_frame_reserve())
    }

    /// `CallInjectionCopyArg`: pop actual argument `arg_num` into its slot.
    pub(crate) fn call_copy_arg(&mut self, arg_num: usize, arg_expr: &str) -> EvalResult<()> {
        let mut actual = self.pop()?;
        if actual.name.is_empty() {
            actual.name = arg_expr.to_string();
        }
        let shift = self.top_call()?.arg_shift;
        self.copy_formal(arg_num + shift, actual, arg_expr)
    }

    /// Write `actual` into formal input `index` of the innermost call.
    fn copy_formal(&mut self, index: usize, actual: Value, arg_expr: &str) -> EvalResult<()> {
        let call = self.top_call()?;
        let Some(formal) = call.inputs().nth(index) else {
            return Err(internal_error(format!("no formal argument {index}")));
        };
        let slot = self.scope.value(
            formal.name.clone(),
            call.args_base + formal.off as u64,
            formal.ty,
        );
        let (formal_name, fn_name) = (formal.name.clone(), call.function.name.clone());
        self.scope.set_value(&slot, actual, arg_expr).map_err(|err| {
            call_injection_error(format!(
                "error evaluating {arg_expr:?} as argument {formal_name} in function {fn_name}: {err}"
            ))
        })
    }

    /// `CallInjectionSetTarget`: point the thread at the callee and
    /// suspend.
    pub(crate) fn call_set_target(&mut self) -> EvalResult<()> {
        let arch = self.scope.target().arch;
        let trampoline = self.scope.process().return_trampoline();
        let call = self.top_call()?;
        let (entry, closure_addr, args_base) =
            (call.function.entry, call.closure_addr, call.args_base);
        let Some(convention) = arch.return_convention() else {
            return Err(call_injection_error(format!(
                "call injection not supported on {}",
                arch.name()
            )));
        };

        match convention {
            ReturnConvention::Stack => {
                let ptr = arch.ptr_size();
                let sp = args_base - arch.call_frame_reserve() - ptr as u64;
                let mem = self.scope.process().memory();
                write_uint_raw(mem.as_ref(), sp, trampoline, ptr)?;
                self.set_register(self.scope.regs.sp_regnum, sp)?;
            }
            ReturnConvention::LinkRegister { regnum } => {
                self.set_register(regnum, trampoline)?;
            }
        }
        if closure_addr != 0 {
            if let Some(regnum) = arch.closure_context_regnum() {
                self.set_register(regnum, closure_addr)?;
            }
        }
        self.set_register(self.scope.regs.pc_regnum, entry)?;

        let call = self.top_call_mut()?;
        call.phase = CallPhase::Dispatched;
        debug!(seq = call.seq, entry = format_args!("{entry:#x}"), "call injection dispatched");
        self.suspended = true;
        Ok(())
    }

    /// Advance the innermost injection after the target stopped.
    pub(crate) fn call_step(&mut self, reason: StopReason) {
        let Some(call) = self.calls.last_mut() else {
            return;
        };
        let (seq, phase) = (call.seq, call.phase);
        match (phase, reason) {
            (CallPhase::Undoing, _) => {
                debug!(seq, "call injection undone");
                self.calls.pop();
            }
            (_, StopReason::Exited) => {
                error!(seq, "target exited during injected call");
                // nothing left to restore
                self.calls.clear();
                self.set_err(call_injection_error("target exited during injected call"));
            }
            (CallPhase::Dispatched, StopReason::CallReturned) => {
                call.phase = CallPhase::Returned;
                debug!(seq, "call injection returned");
            }
            (CallPhase::Dispatched, StopReason::DeadlineExceeded) => {
                self.set_err(call_timeout());
            }
            (CallPhase::Dispatched, StopReason::Breakpoint) => {
                let name = call.function.name.clone();
                self.set_err(call_injection_error(format!(
                    "call to {name} stopped at a breakpoint"
                )));
            }
            (phase, reason) => {
                self.set_err(internal_error(format!(
                    "unexpected stop {reason:?} in call injection phase {phase:?}"
                )));
            }
        }
    }

    /// Restore the registers the innermost injection changed and mark it
    /// as undoing.
    pub(crate) fn undo_top_call(&mut self) {
        let Some(call) = self.calls.last_mut() else {
            return;
        };
        call.phase = CallPhase::Undoing;
        let seq = call.seq;
        if let Some(undo) = call.undo.take() {
            self.restore_registers(seq, undo);
        }
    }

    /// Write back every register an open injection changed, innermost
    /// first, and drop the injections. Nothing is continued.
    pub(crate) fn restore_all_calls(&mut self) {
        while let Some(mut call) = self.calls.pop() {
            if let Some(undo) = call.undo.take() {
                self.restore_registers(call.seq, undo);
            }
        }
    }

    fn restore_registers(&self, seq: u64, undo: Undo) {
        let regs = &self.scope.regs;
        debug!(seq, pc = format_args!("{:#x}", undo.pc), "call injection undo");
        let mut writes: SmallVec<[(u64, u64); 3]> = smallvec![(regs.sp_regnum, undo.sp)];
        if let (Some(regnum), Some(lr)) = (regs.lr_regnum, undo.lr) {
            writes.push((regnum, lr));
        }
        writes.push((regs.pc_regnum, undo.pc));
        for (regnum, value) in writes {
            if let Err(err) = self.set_register(regnum, value) {
                error!(seq, regnum, %err, "could not restore register");
            }
        }
    }

    /// `CallInjectionComplete`: collect the results of the returned call
    /// and restore the caller's registers.
    pub(crate) fn call_complete(&mut self) -> EvalResult<()> {
        let call = self.top_call()?;
        if call.phase != CallPhase::Returned {
            return Err(internal_error(format!(
                "call injection completed in phase {:?}",
                call.phase
            )));
        }

        // the frame is dead once the registers are restored; keep a copy
        // so the results stay readable
        let frame_size = call.args.arg_frame_size.max(0) as usize;
        let mut frame = vec![0u8; frame_size];
        read_exact(self.scope.mem.as_ref(), call.args_base, &mut frame)?;
        let copy = FakeMemory::with_fallback(Arc::clone(&self.scope.mem));
        copy.map(call.args_base, frame);
        let copy: probe_value::SharedMemory = Arc::new(copy);

        let mut rets: Vec<Value> = call
            .outputs()
            .map(|out| {
                let mut v = Value::new(
                    out.name.clone(),
                    call.args_base + out.off as u64,
                    out.ty,
                    Arc::clone(&copy),
                    self.scope.target(),
                );
                v.flags |= ValueFlags::RETURN_ARGUMENT | ValueFlags::FAKE_ADDRESS;
                v
            })
            .collect();
        for v in &mut rets {
            v.load(&LoadConfig::FULL_VALUE);
        }

        let undo = call.undo;
        let seq = call.seq;
        if let Some(undo) = undo {
            self.set_register(self.scope.regs.sp_regnum, undo.sp)?;
            if let (Some(regnum), Some(lr)) = (self.scope.regs.lr_regnum, undo.lr) {
                self.set_register(regnum, lr)?;
            }
            self.set_register(self.scope.regs.pc_regnum, undo.pc)?;
        }
        self.top_call_mut()?.undo = None;
        self.calls.pop();
        debug!(seq, results = rets.len(), "call injection complete");

        let r = match rets.len() {
            0 => {
                let mut r = self.scope.constant(probe_value::Constant::Unknown);
                r.flags = ValueFlags::empty();
                r.unreadable = Some(EvalError::new("no return values"));
                r
            }
            1 => rets.remove(0),
            n => {
                let mut r = self.scope.constant(probe_value::Constant::Unknown);
                r.flags = ValueFlags::empty();
                r.len = n as i64;
                r.children = rets;
                r
            }
        };
        self.push(r);
        Ok(())
    }

    /// `CallInjectionAllocString`: give the string literal on top of the
    /// stack a backing store in the target.
    ///
    /// Phase 0 calls the allocator, or skips the two following ops (the
    /// completion and phase 1) if the string needs no storage. Phase 1
    /// copies the bytes into the allocated block.
    pub(crate) fn alloc_string(&mut self, phase: u8) -> EvalResult<()> {
        match phase {
            0 => {
                let x = self.peek_mut()?;
                let needs_storage = x.kind == Kind::String
                    && x.addr == 0
                    && x.flags.contains(ValueFlags::CONSTANT)
                    && x.len > 0;
                if !needs_storage {
                    self.skip(2);
                    return Ok(());
                }
                let len = x.len as u64;
                let Some(ctx) = &self.scope.call_ctx else {
                    return Err(EvalError::new(STR_ALLOC_NOT_ALLOWED));
                };
                let allocator = ctx.options.allocator.clone();
                let Some(function) = self.scope.debug_info().lookup_function(&allocator).cloned()
                else {
                    return Err(EvalError::new(format!(
                        "could not find allocator {allocator}"
                    )));
                };
                let n_in = self
                    .scope
                    .debug_info()
                    .formal_args(&function)?
                    .args
                    .iter()
                    .filter(|a| !a.is_ret)
                    .count();
                self.open_call(function, 0, n_in, false, &allocator)?;

                // (size, type, needzero)
                let call = self.top_call()?;
                let words = [len, 0, 1];
                let mem = self.scope.process().memory();
                for (formal, word) in call.inputs().zip(words) {
                    let size = self.scope.types().size(formal.ty);
                    write_uint_raw(mem.as_ref(), call.args_base + formal.off as u64, word, size)?;
                }
                self.call_set_target()
            }
            1 => {
                let block = self.pop()?;
                let addr = if block.addr != 0 {
                    read_uint_raw(block.mem.as_ref(), block.addr, block.ptr_size())?
                } else {
                    block.children.first().map_or(0, |c| c.addr)
                };
                if addr == 0 {
                    return Err(call_injection_error("string allocation returned nil"));
                }
                let mem = self.scope.process().memory();
                let x = self.peek_mut()?;
                let bytes = x.value.as_ref().map(string_val).unwrap_or_default().to_vec();
                let n = mem.write_memory(addr, &bytes)?;
                if n < bytes.len() {
                    return Err(call_injection_error(format!(
                        "short write of string literal at {addr:#x}"
                    )));
                }
                x.base = addr;
                x.flags.remove(ValueFlags::CONSTANT);
                Ok(())
            }
            _ => Err(internal_error(format!("unknown string allocation phase {phase}"))),
        }
    }
}
