//! Tracehook REPL - Interactive shell that traces cells as they run
//!
//! This crate provides REPL (Read-Eval-Print Loop) functionality on top of
//! [`tracehook_core::TraceSession`], including command parsing and
//! multi-line input handling.

pub mod repl;

// Re-export commonly used types for convenience
pub use repl::{DefaultNotifier, Repl, ReplCommand, ReplNotifier};
