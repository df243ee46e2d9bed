//! REPL (Read-Eval-Print Loop) functionality for tracehook
//!
//! This module wraps a [`TraceSession`] with the interactive pieces:
//! - Multi-line input collection
//! - REPL commands (.trace, .etrace, .traceconfig, .autotrace, ...)
//! - Trace blocks (`.trace` alone, ended by a lone `.`)
//! - Output formatting and notifications

use anyhow::Result;
use tracehook_core::{Error, RuntimeError, TraceSession, Value};
use tracing::debug;

pub mod commands;
pub mod multiline;
pub mod notifier;

pub use commands::{parse_command, ReplCommand, TraceConfigArgs};
pub use multiline::{LineProcessResult, MultiLineCollector};
pub use notifier::{DefaultNotifier, ReplNotifier};

/// How a collected cell is run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellMode {
    /// Traced only when autotrace says so
    Plain,
    Traced,
}

/// Interactive tracing shell
pub struct Repl {
    session: TraceSession,
    notifier: Box<dyn ReplNotifier>,
    multiline: MultiLineCollector,
    /// Lines of an open `.trace` block
    trace_block: Option<String>,
    running: bool,
}

impl Repl {
    pub fn new(session: TraceSession) -> Self {
        Self {
            session,
            notifier: Box::new(DefaultNotifier::new()),
            multiline: MultiLineCollector::new(),
            trace_block: None,
            running: true,
        }
    }

    /// Set the notifier for this REPL
    pub fn set_notifier(&mut self, notifier: Box<dyn ReplNotifier>) {
        self.notifier = notifier;
    }

    pub fn notifier(&self) -> &dyn ReplNotifier {
        self.notifier.as_ref()
    }

    pub fn session(&mut self) -> &mut TraceSession {
        &mut self.session
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn prompt(&self) -> &'static str {
        if self.trace_block.is_some() {
            "... "
        } else {
            self.multiline.get_prompt()
        }
    }

    /// Whether input is being collected for a cell or block
    pub fn is_collecting(&self) -> bool {
        self.trace_block.is_some() || self.multiline.is_collecting()
    }

    /// Drop partially entered input
    pub fn cancel(&mut self) {
        self.trace_block = None;
        self.multiline.reset();
    }

    /// Feed one line of input
    pub fn process_line(&mut self, line: &str) {
        if let Some(block) = self.trace_block.as_mut() {
            if line.trim() == "." {
                let code = std::mem::take(block);
                self.trace_block = None;
                self.run(&code, CellMode::Traced);
            } else {
                if !block.is_empty() {
                    block.push('\n');
                }
                block.push_str(line);
            }
            return;
        }

        if !self.multiline.is_collecting() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return;
            }
            if trimmed.starts_with('.') {
                match parse_command(trimmed).and_then(|command| self.handle_command(command)) {
                    Ok(output) => self.notifier.on_output(&output),
                    Err(e) => self.notifier.on_error(&format!("Error: {e}")),
                }
                return;
            }
        }

        if let LineProcessResult::Complete(code) = self.multiline.process_line(line) {
            self.run(&code, CellMode::Plain);
        }
    }

    /// Handle a REPL command
    pub fn handle_command(&mut self, command: ReplCommand) -> Result<String> {
        debug!(?command, "repl command");
        match command {
            ReplCommand::Help => Ok(help_text().to_string()),
            ReplCommand::Quit => {
                self.running = false;
                Ok("Goodbye!".to_string())
            }
            ReplCommand::Trace(None) => {
                self.trace_block = Some(String::new());
                Ok("Tracing block. End with '.' on a line by itself.".to_string())
            }
            ReplCommand::Trace(Some(code)) => {
                self.run(&code, CellMode::Traced);
                Ok(String::new())
            }
            ReplCommand::Etrace(expr) => {
                let result = self.session.etrace(&expr);
                self.report(result);
                Ok(String::new())
            }
            ReplCommand::TraceConfig(args) => {
                let show = args.show || !args.has_changes();
                self.session.configure(args.into())?;
                Ok(if show {
                    self.session.describe_config()
                } else {
                    String::new()
                })
            }
            ReplCommand::Autotrace(state) => {
                let on = self.session.autotrace(state);
                Ok(format!("Autotrace: {}", if on { "on" } else { "off" }))
            }
        }
    }

    fn run(&mut self, code: &str, mode: CellMode) {
        let result = match mode {
            CellMode::Plain => self.session.run_cell(code),
            CellMode::Traced => self.session.trace(code),
        };
        self.report(result);
    }

    /// Print a cell's value or its failure
    fn report(&mut self, result: tracehook_core::Result<Value>) {
        match result {
            Ok(Value::None) => {}
            Ok(value) => match self.session.interpreter().repr(&value) {
                Ok(repr) => self.notifier.on_result(&repr),
                Err(err) => self.report_runtime(err),
            },
            Err(Error::Parse(err)) => self.notifier.on_error(err.report().trim_end()),
            Err(Error::Runtime(err)) => self.report_runtime(err),
            Err(other) => self.notifier.on_error(&format!("Error: {other}")),
        }
    }

    fn report_runtime(&mut self, err: RuntimeError) {
        match err {
            RuntimeError::Raised(exc) => {
                let interp = self.session.interpreter();
                if interp.exit_status(&exc).is_some() {
                    self.running = false;
                    return;
                }
                let report = interp.format_exception(&exc);
                self.notifier.on_error(report.trim_end());
            }
            RuntimeError::Consistency(err) => self.notifier.on_error(&format!("Error: {err}")),
        }
    }
}

fn help_text() -> &'static str {
    r#"Tracehook REPL Commands:
  .help                 - Show this help message
  .quit                 - Exit the REPL
  .trace CODE           - Run CODE with tracing
  .trace                - Start a traced block (end with '.')
  .etrace EXPR          - Show the value of every part of EXPR
  .traceconfig [OPTS]   - Show or change trace settings
      --show              print the settings
      -c on|off           colorize output
      -p PREFIX           trace line prefix
      -W                  clear variable watches
      -w NAME             watch a variable (repeatable)
      -d N                call depth (at least 1)
  .autotrace [on|off]   - Trace every cell that uses session variables"#
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use tracehook_core::runtime::SharedBuffer;
    use tracehook_core::{Interpreter, InterpreterConfig, TracerSettings};

    use super::*;

    #[derive(Default, Clone)]
    struct Captured {
        lines: Rc<RefCell<Vec<String>>>,
    }

    impl ReplNotifier for Captured {
        fn on_output(&self, content: &str) {
            if !content.is_empty() {
                self.lines.borrow_mut().push(content.to_string());
            }
        }

        fn on_error(&self, content: &str) {
            self.lines.borrow_mut().push(format!("E: {content}"));
        }

        fn on_result(&self, repr: &str) {
            self.lines.borrow_mut().push(format!("= {repr}"));
        }
    }

    struct Fixture {
        repl: Repl,
        notes: Captured,
        stdout: SharedBuffer,
        trace: SharedBuffer,
    }

    fn fixture() -> Fixture {
        let stdout = SharedBuffer::new();
        let trace = SharedBuffer::new();
        let interp = Interpreter::with_output(InterpreterConfig::default(), stdout.sink(), trace.sink());
        let settings = TracerSettings {
            prefix: "T".to_string(),
            ..Default::default()
        };
        let mut repl = Repl::new(TraceSession::with_settings(interp, settings));
        let notes = Captured::default();
        repl.set_notifier(Box::new(notes.clone()));
        Fixture {
            repl,
            notes,
            stdout,
            trace,
        }
    }

    fn feed(repl: &mut Repl, lines: &[&str]) {
        for line in lines {
            repl.process_line(line);
        }
    }

    #[test]
    fn test_cells_report_values() {
        let mut f = fixture();
        feed(&mut f.repl, &["x = 20", "x + 1", "print('hi')", "None"]);
        assert_eq!(*f.notes.lines.borrow(), ["= 21"]);
        assert_eq!(f.stdout.contents(), "hi\n");
        assert!(f.trace.contents().is_empty());
    }

    #[test]
    fn test_multiline_definition() {
        let mut f = fixture();
        feed(&mut f.repl, &["def double(n):", "    return n * 2", "", "double(4)"]);
        assert_eq!(*f.notes.lines.borrow(), ["= 8"]);
    }

    #[test]
    fn test_trace_inline_and_block() {
        let mut f = fixture();
        feed(&mut f.repl, &["total = 5", ".trace total * 2"]);
        assert_eq!(*f.notes.lines.borrow(), ["= 10"]);
        assert!(f.trace.contents().contains("T >>> Call to __trace_block_1"));

        f.trace.clear();
        feed(&mut f.repl, &[".trace", "total = total + 1", "total", "."]);
        assert_eq!(f.notes.lines.borrow().last().map(String::as_str), Some("= 6"));
        assert!(f.trace.contents().contains("__trace_block_2"), "{}", f.trace.contents());
        assert_eq!(f.repl.prompt(), ">>> ");
    }

    #[test]
    fn test_autotrace_command() {
        let mut f = fixture();
        feed(&mut f.repl, &["n = 3", ".autotrace", ".autotrace on", "n + 1", "7 * 6"]);
        assert_eq!(
            *f.notes.lines.borrow(),
            ["Autotrace: off", "Autotrace: on", "= 4", "= 42"]
        );
        let trace = f.trace.contents();
        assert_eq!(trace.matches(">>> Call to").count(), 1, "{trace}");
    }

    #[test]
    fn test_traceconfig_command() {
        let mut f = fixture();
        feed(&mut f.repl, &[".traceconfig -d 3 -w total", ".traceconfig"]);
        let lines = f.notes.lines.borrow();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Call depth: 3"), "{}", lines[0]);
        assert!(lines[0].contains("Variable watches: total"), "{}", lines[0]);
        drop(lines);

        feed(&mut f.repl, &[".traceconfig -d 0"]);
        assert_eq!(f.notes.lines.borrow().last().map(String::as_str), Some("E: Error: depth must be >= 1"));
        assert_eq!(f.repl.session().settings().depth, 3);
    }

    #[test]
    fn test_errors_are_reported() {
        let mut f = fixture();
        feed(&mut f.repl, &["x = 1 / 0", "print(1 +)", ".nope"]);
        let lines = f.notes.lines.borrow();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("E: Traceback"), "{}", lines[0]);
        assert!(lines[0].ends_with("ZeroDivisionError: division by zero"), "{}", lines[0]);
        assert!(lines[1].contains("SyntaxError"), "{}", lines[1]);
        assert_eq!(lines[2], "E: Error: Unknown command: .nope");
        assert!(f.repl.is_running());
    }

    #[test]
    fn test_quit_and_system_exit() {
        let mut f = fixture();
        f.repl.process_line(".quit");
        assert!(!f.repl.is_running());

        let mut f = fixture();
        feed(&mut f.repl, &["import sys", "sys.exit(0)"]);
        assert!(!f.repl.is_running());
    }
}
