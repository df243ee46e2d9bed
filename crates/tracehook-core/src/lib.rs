//! # Tracehook Core
//!
//! Load-time instrumentation for a small scripting language, including:
//! - The script language itself (AST, parser, compile checks, evaluator,
//!   import system, builtins)
//! - AST utilities: scope analysis, name collection, location backfilling,
//!   block wrapping
//! - The decorator-injection pass and the instrumented module-load chain
//! - The interactive (cell-by-cell) variant
//! - A trace output backend
//!
//! Front ends (the `tracehook` CLI, the REPL) build on the types exported
//! here.

#![warn(clippy::all)]

pub mod analysis;
pub mod ast;
pub mod compile;
pub mod error;
pub mod import;
pub mod instrument;
pub mod interactive;
pub mod parser;
pub mod runtime;
pub mod tracer;

use std::sync::Once;

// Re-export commonly used types
pub use analysis::{scope_global_names, wrap_as_callable, TracedUnit};
pub use ast::{Module, SourceUnit, ToSource};
pub use compile::{compile, Code};
pub use error::{CacheError, ConsistencyError, Error, ImportError, InstrumentError, ParseError, Result};
pub use instrument::{
    InstrumentationConfig, MainModuleGuard, ProcessInstrumentationContext, TracePolicy, NAME_TRACE_DECORATOR,
    NAME_TRACE_MODULE_FN,
};
pub use interactive::{TraceConfigUpdate, TraceSession};
pub use parser::{parse_expression, parse_module};
pub use runtime::{Interpreter, InterpreterConfig, ModuleObject, RuntimeError, Value};
pub use tracer::{TraceLog, Tracer, TracerSettings};

/// Tracehook version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable turning on debug diagnostics of the load chain
pub const DEBUG_ENV: &str = "TRACEHOOK_DEBUG";

/// Initialize tracing for tracehook components. `TRACEHOOK_DEBUG=1` enables
/// debug output of the transform and load steps; otherwise `RUST_LOG`
/// decides, and nothing is printed when it is unset. Safe to call more than
/// once.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let debug = std::env::var(DEBUG_ENV).map(|v| v == "1").unwrap_or(false);
        let filter = if debug {
            tracing_subscriber::EnvFilter::new("tracehook_core=debug,tracehook_cli=debug,tracehook_repl=debug")
        } else {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"))
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
