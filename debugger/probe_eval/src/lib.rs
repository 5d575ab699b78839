//! Probe Eval - expression evaluation for the probe debugger.
//!
//! Evaluates compiled expressions against a stopped Go program: reading
//! locals and globals, applying operators, casts and builtins, and, when
//! allowed, injecting function calls into the target.
//!
//! # Architecture
//!
//! - [`EvalScope`]: the frame an evaluation runs in; resolves locals,
//!   arguments and package variables.
//! - [`Program`] / [`Op`]: compiled expressions, produced by an
//!   [`ExprCompiler`] outside this crate.
//! - [`EvalStack`]: the stack machine running a program, including the
//!   call-injection protocol; [`evaluate`] drives it to completion.
//! - [`collab`]: the debug-info, process-control and unwinding services
//!   the evaluator consumes.
//!
//! Values, constants and memory access live in `probe_value`; types in
//! `probe_types`.
//!
//! # Debugging
//!
//! Enable tracing with environment variables:
//! - `RUST_LOG=probe_eval=debug` - program listings and call injection
//! - `RUST_LOG=probe_eval=trace` - every executed op

mod access;
mod builtins;
mod call;
mod cast;
pub mod collab;
mod interpreter;
mod operators;
pub mod program;
mod resolver;
mod scope;
mod set;

#[doc(hidden)]
#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests use unwrap to panic on unexpected state")]
mod tests;

pub use collab::{
    DebugInfo, EvalLookup, ExprCompiler, FormalArg, FuncArgs, Function, LexicalEntry,
    LogicalThread, ProcessControl, StopEvent, StopReason, ThreadId, ThreadStatus, Unwinder,
    VarLocation, VisibilityFlags,
};
pub use interpreter::{evaluate, EvalStack};
pub use program::{JumpCondition, Op, Program};
pub use scope::{
    convert_eval_scope, frame_to_scope, goroutine_scope, thread_scope, CallContext, CallOptions,
    EvalScope, Session, DEFAULT_ALLOCATOR,
};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
