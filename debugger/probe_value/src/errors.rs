//! Evaluation errors.
//!
//! Every failure the evaluator reports is an [`EvalError`]: a structured
//! [`EvalErrorKind`] plus the rendered message. Factory functions (e.g.
//! [`index_out_of_bounds()`]) are the public way to build them; they keep
//! the message text stable so callers that show errors verbatim to users
//! see the same wording regardless of which layer failed.
//!
//! # Categories
//!
//! [`EvalError::category`] sorts errors into the four groups the
//! interpreter treats differently:
//!
//! - `User`: a bad operation in the expression; reported verbatim.
//! - `Unreadable`: target memory or a register could not be fetched.
//!   Stored in a value's error slot and surfaced when the value is used.
//! - `Internal`: an invariant of the evaluator was violated.
//! - `CallInjection`: the function call protocol failed.

use std::fmt;

use crate::memory::MemoryError;

/// Result of an evaluation step.
pub type EvalResult<T> = Result<T, EvalError>;

/// Coarse classification of an [`EvalError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    User,
    Unreadable,
    Internal,
    CallInjection,
}

/// Typed error kinds.
///
/// `Display` produces the exact user-visible message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalErrorKind {
    // Member access
    NotAStruct {
        name: String,
        type_name: String,
    },
    NoMember {
        name: String,
        member: String,
    },
    IsNil {
        name: String,
    },

    // Pointers
    CannotDereference {
        expr: String,
        type_name: String,
    },
    NilCannotBeDereferenced,
    NilPointerDereference,
    CannotTakeAddress {
        expr: String,
    },

    // Indexing and slicing
    IndexOutOfBounds,
    MapIndexOutOfBounds,
    DoesNotSupportIndexing {
        expr: String,
        type_name: String,
    },
    CannotIndex {
        expr: String,
    },
    CannotSlice {
        expr: String,
        type_name: Option<String>,
    },
    MapHighBound,
    KeyNotFound,

    // Types
    MismatchedTypes {
        left: String,
        right: String,
    },
    TypeConversion {
        src: String,
        dst: String,
    },
    CannotConvert {
        expr: String,
        dst: String,
    },
    CannotConvertConstant {
        constant: String,
        dst: String,
    },

    // Operators
    NotComparable {
        kind: String,
    },
    OperatorNotDefined {
        op: String,
        kind: String,
    },
    OperatorNotApplicable {
        op: String,
        expr: String,
    },
    NonFiniteFloat,
    DivisionByZero,

    // Resolution
    SymbolNotFound {
        name: String,
    },
    ExpectedBoolean {
        expr: String,
        kind: String,
    },
    NotAnInterface {
        expr: String,
    },

    // Built-ins
    WrongArgCount {
        builtin: String,
        got: usize,
    },

    /// Memory or register could not be read.
    Unreadable {
        message: String,
    },
    /// An evaluator invariant was violated.
    Internal {
        message: String,
    },
    /// The function call protocol failed.
    CallInjection {
        message: String,
    },
    CallInjectionNotAllowed,
    Timeout,

    /// Catch-all for errors that carry only a message.
    Custom {
        message: String,
    },
}

impl fmt::Display for EvalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAStruct { name, type_name } => {
                write!(f, "{name} (type {type_name}) is not a struct")
            }
            Self::NoMember { name, member } => write!(f, "{name} has no member {member}"),
            Self::IsNil { name } => write!(f, "{name} is nil"),

            Self::CannotDereference { expr, type_name } => {
                write!(f, "expression {expr:?} ({type_name}) can not be dereferenced")
            }
            Self::NilCannotBeDereferenced => write!(f, "nil can not be dereferenced"),
            Self::NilPointerDereference => write!(f, "nil pointer dereference"),
            Self::CannotTakeAddress { expr } => write!(f, "can not take address of {expr:?}"),

            Self::IndexOutOfBounds => write!(f, "index out of bounds"),
            Self::MapIndexOutOfBounds => write!(f, "map index out of bounds"),
            Self::DoesNotSupportIndexing { expr, type_name } => {
                write!(f, "expression {expr:?} ({type_name}) does not support indexing")
            }
            Self::CannotIndex { expr } => write!(f, "can not index {expr:?}"),
            Self::CannotSlice { expr, type_name } => match type_name {
                Some(t) => write!(f, "can not slice {expr:?} (type {t})"),
                None => write!(f, "can not slice {expr:?}"),
            },
            Self::MapHighBound => write!(f, "second slice argument must be empty for maps"),
            Self::KeyNotFound => write!(f, "key not found"),

            Self::MismatchedTypes { left, right } => {
                write!(f, "mismatched types {left:?} and {right:?}")
            }
            Self::TypeConversion { src, dst } => {
                write!(f, "can not convert value of type {src} to {dst}")
            }
            Self::CannotConvert { expr, dst } => write!(f, "can not convert {expr:?} to {dst}"),
            Self::CannotConvertConstant { constant, dst } => {
                write!(f, "can not convert {constant} constant to {dst}")
            }

            Self::NotComparable { kind } => write!(f, "can not compare {kind} variables"),
            Self::OperatorNotDefined { op, kind } => {
                write!(f, "operator {op} not defined on {kind}")
            }
            Self::OperatorNotApplicable { op, expr } => {
                write!(f, "operator {op} can not be applied to {expr:?}")
            }
            Self::NonFiniteFloat => write!(f, "operations on non-finite floats not implemented"),
            Self::DivisionByZero => write!(f, "division by zero"),

            Self::SymbolNotFound { name } => write!(f, "could not find symbol value for {name}"),
            Self::ExpectedBoolean { expr, kind } => {
                write!(f, "expression {expr:?} should be boolean not {kind}")
            }
            Self::NotAnInterface { expr } => write!(f, "expression {expr:?} not an interface"),

            Self::WrongArgCount { builtin, got } => {
                write!(f, "wrong number of arguments to {builtin}: {got}")
            }

            Self::Unreadable { message } | Self::Custom { message } => write!(f, "{message}"),
            Self::Internal { message } => write!(f, "internal debugger error: {message}"),
            Self::CallInjection { message } => write!(f, "{message}"),
            Self::CallInjectionNotAllowed => write!(f, "call injection not allowed"),
            Self::Timeout => write!(f, "timed out waiting for injected call to return"),
        }
    }
}

/// Evaluation error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    /// Human-readable message; equals `kind.to_string()` for factory-built errors.
    pub message: String,
    /// Diagnostic context appended by outer layers (opcode index, original error).
    pub notes: Vec<String>,
}

impl EvalError {
    /// Create an error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: EvalErrorKind::Custom {
                message: message.clone(),
            },
            message,
            notes: Vec::new(),
        }
    }

    fn from_kind(kind: EvalErrorKind) -> Self {
        let message = kind.to_string();
        Self {
            kind,
            message,
            notes: Vec::new(),
        }
    }

    /// Attach a diagnostic note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        match self.kind {
            EvalErrorKind::Unreadable { .. } => ErrorCategory::Unreadable,
            EvalErrorKind::Internal { .. } => ErrorCategory::Internal,
            EvalErrorKind::CallInjection { .. }
            | EvalErrorKind::CallInjectionNotAllowed
            | EvalErrorKind::Timeout => ErrorCategory::CallInjection,
            _ => ErrorCategory::User,
        }
    }

    #[inline]
    pub fn is_internal(&self) -> bool {
        self.category() == ErrorCategory::Internal
    }

    /// Whether this is the "can not convert value of type" error, which
    /// assignment retries as an interface boxing.
    #[inline]
    pub fn is_type_conversion(&self) -> bool {
        matches!(self.kind, EvalErrorKind::TypeConversion { .. })
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for note in &self.notes {
            write!(f, "\n  {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {}

impl From<MemoryError> for EvalError {
    fn from(err: MemoryError) -> Self {
        unreadable(err.to_string())
    }
}

// Member access

#[cold]
pub fn not_a_struct(name: &str, type_name: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::NotAStruct {
        name: name.to_string(),
        type_name: type_name.to_string(),
    })
}

#[cold]
pub fn no_member(name: &str, member: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::NoMember {
        name: name.to_string(),
        member: member.to_string(),
    })
}

#[cold]
pub fn is_nil(name: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::IsNil {
        name: name.to_string(),
    })
}

// Pointers

#[cold]
pub fn cannot_dereference(expr: &str, type_name: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::CannotDereference {
        expr: expr.to_string(),
        type_name: type_name.to_string(),
    })
}

#[cold]
pub fn nil_cannot_be_dereferenced() -> EvalError {
    EvalError::from_kind(EvalErrorKind::NilCannotBeDereferenced)
}

#[cold]
pub fn nil_pointer_dereference() -> EvalError {
    EvalError::from_kind(EvalErrorKind::NilPointerDereference)
}

#[cold]
pub fn cannot_take_address(expr: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::CannotTakeAddress {
        expr: expr.to_string(),
    })
}

// Indexing and slicing

#[cold]
pub fn index_out_of_bounds() -> EvalError {
    EvalError::from_kind(EvalErrorKind::IndexOutOfBounds)
}

#[cold]
pub fn map_index_out_of_bounds() -> EvalError {
    EvalError::from_kind(EvalErrorKind::MapIndexOutOfBounds)
}

#[cold]
pub fn does_not_support_indexing(expr: &str, type_name: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::DoesNotSupportIndexing {
        expr: expr.to_string(),
        type_name: type_name.to_string(),
    })
}

#[cold]
pub fn cannot_index(expr: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::CannotIndex {
        expr: expr.to_string(),
    })
}

#[cold]
pub fn cannot_slice(expr: &str, type_name: Option<&str>) -> EvalError {
    EvalError::from_kind(EvalErrorKind::CannotSlice {
        expr: expr.to_string(),
        type_name: type_name.map(str::to_string),
    })
}

#[cold]
pub fn map_high_bound() -> EvalError {
    EvalError::from_kind(EvalErrorKind::MapHighBound)
}

#[cold]
pub fn key_not_found() -> EvalError {
    EvalError::from_kind(EvalErrorKind::KeyNotFound)
}

// Types

#[cold]
pub fn mismatched_types(left: &str, right: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::MismatchedTypes {
        left: left.to_string(),
        right: right.to_string(),
    })
}

#[cold]
pub fn type_conversion(src: &str, dst: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::TypeConversion {
        src: src.to_string(),
        dst: dst.to_string(),
    })
}

#[cold]
pub fn cannot_convert(expr: &str, dst: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::CannotConvert {
        expr: expr.to_string(),
        dst: dst.to_string(),
    })
}

#[cold]
pub fn cannot_convert_constant(constant: &str, dst: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::CannotConvertConstant {
        constant: constant.to_string(),
        dst: dst.to_string(),
    })
}

// Operators

#[cold]
pub fn not_comparable(kind: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::NotComparable {
        kind: kind.to_string(),
    })
}

#[cold]
pub fn operator_not_defined(op: &str, kind: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::OperatorNotDefined {
        op: op.to_string(),
        kind: kind.to_string(),
    })
}

#[cold]
pub fn operator_not_applicable(op: &str, expr: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::OperatorNotApplicable {
        op: op.to_string(),
        expr: expr.to_string(),
    })
}

#[cold]
pub fn non_finite_float() -> EvalError {
    EvalError::from_kind(EvalErrorKind::NonFiniteFloat)
}

#[cold]
pub fn division_by_zero() -> EvalError {
    EvalError::from_kind(EvalErrorKind::DivisionByZero)
}

// Resolution

#[cold]
pub fn symbol_not_found(name: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::SymbolNotFound {
        name: name.to_string(),
    })
}

#[cold]
pub fn expected_boolean(expr: &str, kind: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::ExpectedBoolean {
        expr: expr.to_string(),
        kind: kind.to_string(),
    })
}

#[cold]
pub fn not_an_interface(expr: &str) -> EvalError {
    EvalError::from_kind(EvalErrorKind::NotAnInterface {
        expr: expr.to_string(),
    })
}

#[cold]
pub fn wrong_arg_count(builtin: &str, got: usize) -> EvalError {
    EvalError::from_kind(EvalErrorKind::WrongArgCount {
        builtin: builtin.to_string(),
        got,
    })
}

// Categories

#[cold]
pub fn unreadable(message: impl Into<String>) -> EvalError {
    EvalError::from_kind(EvalErrorKind::Unreadable {
        message: message.into(),
    })
}

#[cold]
pub fn internal_error(message: impl Into<String>) -> EvalError {
    EvalError::from_kind(EvalErrorKind::Internal {
        message: message.into(),
    })
}

#[cold]
pub fn call_injection_error(message: impl Into<String>) -> EvalError {
    EvalError::from_kind(EvalErrorKind::CallInjection {
        message: message.into(),
    })
}

#[cold]
pub fn call_injection_not_allowed() -> EvalError {
    EvalError::from_kind(EvalErrorKind::CallInjectionNotAllowed)
}

#[cold]
pub fn call_timeout() -> EvalError {
    EvalError::from_kind(EvalErrorKind::Timeout)
}
