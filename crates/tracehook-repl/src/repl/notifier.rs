//! Output notification system for the REPL
//!
//! Provides a trait-based system for handling REPL output, so tests and
//! other front ends can capture what a session reports.

/// Trait for handling REPL output notifications
pub trait ReplNotifier {
    /// Handle regular output
    fn on_output(&self, content: &str);

    /// Handle error output
    fn on_error(&self, content: &str);

    /// Handle the repr of a cell's value
    fn on_result(&self, repr: &str);
}

/// Default console-based notifier
#[derive(Debug, Default)]
pub struct DefaultNotifier;

impl DefaultNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl ReplNotifier for DefaultNotifier {
    fn on_output(&self, content: &str) {
        if !content.is_empty() {
            println!("{content}");
        }
    }

    fn on_error(&self, content: &str) {
        eprintln!("{content}");
    }

    fn on_result(&self, repr: &str) {
        println!("{repr}");
    }
}
