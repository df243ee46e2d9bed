//! Tracehook CLI - run a script with every function it defines or imports
//! traced
//!
//! This crate provides the command-line grammar and the driver that installs
//! the instrumented load chain and runs the target as `__main__`.

pub mod args;
pub mod driver;

// Re-export commonly used types for convenience
pub use args::{parse_args, usage, CliOptions, Invocation, Target, UsageError};
pub use driver::run;
