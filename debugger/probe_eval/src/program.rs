//! Opcode programs.
//!
//! The expression compiler (outside this crate) lowers an expression into a
//! flat [`Program`] of [`Op`]s for a stack machine. Every op pops its
//! operands off the operand stack and pushes at most one result. Control
//! flow is limited to forward [`Op::Jump`]s used by `&&` and `||`.
//!
//! Ops that carry an `expr` field keep the source text of the operand they
//! act on; it is only used to build error messages.

use std::fmt;

use probe_types::Idx;
use probe_value::{BinaryOp, Constant, UnaryOp};

/// Condition of a conditional jump.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JumpCondition {
    IfTrue,
    IfFalse,
}

#[derive(Clone, Debug)]
pub enum Op {
    /// Push the current logical thread's descriptor.
    PushCurg,
    /// Push the frame offset of the scope as an integer constant.
    PushFrameOffset,
    /// Push the id of the scope's thread as an integer constant.
    PushThreadId,
    PushConst(Constant),
    /// Push the visible local `name`. A non-zero `frame` resolves the name
    /// in that frame of the current thread instead.
    PushLocal { name: String, frame: i64 },
    PushNil,
    /// Push a CPU register of the scope's frame.
    PushRegister { regnum: u64, name: String },
    /// Push a package variable, function or named constant. An empty `pkg`
    /// means the package of the scope's function.
    PushPackageVar { pkg: String, name: String },

    /// `x.name`: field, method or register view.
    Select { name: String },
    /// `x.(T)`.
    TypeAssert {
        ty: Option<Idx>,
        expr: String,
        type_expr: String,
    },
    /// `*x`.
    PointerDeref { expr: String },
    /// `&x`.
    AddrOf { expr: String },
    /// `x[low:high]`; pops high (if present), then low, then x.
    Reslice { has_high: bool, expr: String },
    /// `x[i]`.
    Index { expr: String },

    Unary { op: UnaryOp, expr: String },
    /// `T(x)`.
    TypeCast { ty: Idx, expr: String },
    Binary {
        op: BinaryOp,
        x_expr: String,
        y_expr: String,
    },
    /// Replace the boolean on top of the stack with an untyped constant.
    BoolToConst,
    Pop,
    /// Call a built-in function on the top `args.len()` values.
    BuiltinCall { name: String, args: Vec<String> },

    /// Branch to `target` if the boolean on top of the stack matches
    /// `when`, popping it first if `pop` is set.
    Jump {
        when: JumpCondition,
        pop: bool,
        target: usize,
        /// Source text of the condition, for the non-boolean error.
        node: Option<String>,
    },

    /// Pop a function value and begin injecting a call to it.
    CallInjectionStart { arg_count: usize, expr: String },
    /// Point the thread at the callee and suspend.
    CallInjectionSetTarget,
    /// Pop one actual argument and store it in its formal slot.
    CallInjectionCopyArg { arg_num: usize, arg_expr: String },
    /// Collect the results of the returned call.
    CallInjectionComplete,
    /// Allocate (phase 0) or fill (phase 1) target memory for a string
    /// literal on top of the stack.
    CallInjectionAllocString { phase: u8 },

    /// Pop the destination, then the source, and assign.
    SetValue { rhs_expr: String },
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::PushCurg => write!(f, "PushCurg"),
            Op::PushFrameOffset => write!(f, "PushFrameOffset"),
            Op::PushThreadId => write!(f, "PushThreadId"),
            Op::PushConst(c) => write!(f, "PushConst {c}"),
            Op::PushLocal { name, frame } => write!(f, "PushLocal {name} frame={frame}"),
            Op::PushNil => write!(f, "PushNil"),
            Op::PushRegister { regnum, name } => write!(f, "PushRegister {name} ({regnum})"),
            Op::PushPackageVar { pkg, name } => write!(f, "PushPackageVar {pkg}.{name}"),
            Op::Select { name } => write!(f, "Select {name}"),
            Op::TypeAssert { type_expr, .. } => write!(f, "TypeAssert {type_expr}"),
            Op::PointerDeref { .. } => write!(f, "PointerDeref"),
            Op::AddrOf { .. } => write!(f, "AddrOf"),
            Op::Reslice { has_high, .. } => write!(f, "Reslice has_high={has_high}"),
            Op::Index { .. } => write!(f, "Index"),
            Op::Unary { op, .. } => write!(f, "Unary {op}"),
            Op::TypeCast { ty, .. } => write!(f, "TypeCast {ty:?}"),
            Op::Binary { op, .. } => write!(f, "Binary {op}"),
            Op::BoolToConst => write!(f, "BoolToConst"),
            Op::Pop => write!(f, "Pop"),
            Op::BuiltinCall { name, args } => write!(f, "BuiltinCall {name} {}", args.len()),
            Op::Jump {
                when, pop, target, ..
            } => write!(f, "Jump {when:?} pop={pop} -> {target}"),
            Op::CallInjectionStart { arg_count, expr } => {
                write!(f, "CallInjectionStart {expr} args={arg_count}")
            }
            Op::CallInjectionSetTarget => write!(f, "CallInjectionSetTarget"),
            Op::CallInjectionCopyArg { arg_num, .. } => write!(f, "CallInjectionCopyArg {arg_num}"),
            Op::CallInjectionComplete => write!(f, "CallInjectionComplete"),
            Op::CallInjectionAllocString { phase } => write!(f, "CallInjectionAllocString {phase}"),
            Op::SetValue { .. } => write!(f, "SetValue"),
        }
    }
}

/// An immutable compiled expression.
#[derive(Clone, Debug, Default)]
pub struct Program {
    ops: Vec<Op>,
}

impl Program {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    #[inline]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// One op per line, prefixed with its index.
    pub fn listing(&self) -> String {
        use fmt::Write;
        let mut out = String::new();
        for (i, op) in self.ops.iter().enumerate() {
            let _ = writeln!(out, "{i:4} {op}");
        }
        out
    }
}

impl From<Vec<Op>> for Program {
    fn from(ops: Vec<Op>) -> Self {
        Self::new(ops)
    }
}
