//! Trace output backend.
//!
//! A [`Tracer`] is the capability instrumented code is decorated with. The
//! interpreter drives it with events (call, line, variable, return,
//! exception) and it renders them as prefixed, indented text lines:
//!
//! ```text
//! DBG: >>> Call to add in File "demo.py", line 1
//! DBG: ...... a = 1
//! DBG:    2 |     c = a + b
//! DBG: ...... c = 3
//! DBG: <<< Return value from add: 3
//! ```
//!
//! Settings live behind a `RefCell` so a tracer can be reconfigured in place
//! without changing its identity.

pub mod log;

pub use log::{strip_ansi_escapes, TraceLog};

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crossterm::style::Stylize;
use tracing::debug;

use crate::ast::Expr;
use crate::parser::parse_expression;
use crate::runtime::io::{emit, stderr_sink, Sink};

pub const DEFAULT_PREFIX: &str = "DBG:";

/// Live tracer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerSettings {
    /// Frames traced below a decorated call, counting the call itself
    pub depth: u32,
    pub prefix: String,
    pub color: bool,
    /// Expressions evaluated in every traced frame
    pub watch: Vec<String>,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self {
            depth: 1,
            prefix: DEFAULT_PREFIX.to_string(),
            color: false,
            watch: Vec::new(),
        }
    }
}

impl TracerSettings {
    /// Add a watch expression unless it is already watched
    pub fn add_watch(&mut self, expr: impl Into<String>) {
        let expr = expr.into();
        if !self.watch.contains(&expr) {
            self.watch.push(expr);
        }
    }
}

pub struct Tracer {
    settings: RefCell<TracerSettings>,
    sink: Sink,
    watch_cache: RefCell<HashMap<String, Option<Rc<Expr>>>>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("settings", &*self.settings.borrow())
            .finish_non_exhaustive()
    }
}

impl Tracer {
    pub fn new(settings: TracerSettings, sink: Sink) -> Rc<Self> {
        Rc::new(Self {
            settings: RefCell::new(settings),
            sink,
            watch_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Tracer printing to the process's stderr
    pub fn stderr(settings: TracerSettings) -> Rc<Self> {
        Self::new(settings, stderr_sink())
    }

    /// A new tracer writing to the same sink with a copy of these settings
    pub fn fork(&self, depth: Option<u32>) -> Rc<Self> {
        let mut settings = self.settings().clone();
        if let Some(depth) = depth {
            settings.depth = depth.max(1);
        }
        Self::new(settings, self.sink.clone())
    }

    pub fn settings(&self) -> Ref<'_, TracerSettings> {
        self.settings.borrow()
    }

    pub fn configure(&self, update: impl FnOnce(&mut TracerSettings)) {
        let mut settings = self.settings.borrow_mut();
        update(&mut settings);
        settings.depth = settings.depth.max(1);
        debug!(?settings, "tracer reconfigured");
    }

    pub fn depth(&self) -> u32 {
        self.settings.borrow().depth
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    /// Watch expressions in order, parsed once. Unparseable ones are skipped.
    pub fn watch_exprs(&self) -> Vec<(String, Rc<Expr>)> {
        let watch = self.settings.borrow().watch.clone();
        let mut cache = self.watch_cache.borrow_mut();
        watch
            .into_iter()
            .filter_map(|text| {
                let parsed = cache
                    .entry(text.clone())
                    .or_insert_with(|| parse_expression(&text, "<watch>").ok().map(Rc::new))
                    .clone();
                parsed.map(|expr| (text, expr))
            })
            .collect()
    }

    fn write(&self, level: usize, body: String) {
        let settings = self.settings.borrow();
        let indent = "    ".repeat(level);
        emit(&self.sink, &format!("{} {}{}\n", settings.prefix, indent, body));
    }

    fn paint<'a>(&self, text: &'a str, style: fn(&'a str) -> String) -> String {
        if self.settings.borrow().color {
            style(text)
        } else {
            text.to_string()
        }
    }

    pub fn call(&self, level: usize, name: &str, filename: &str, line: u32) {
        let head = self.paint(">>> Call to", |s| s.green().bold().to_string());
        self.write(level, format!("{head} {name} in File \"{filename}\", line {line}"));
    }

    /// A variable seen for the first time or whose value changed
    pub fn variable(&self, level: usize, name: &str, repr: &str) {
        let dots = self.paint("......", |s| s.dark_grey().to_string());
        self.write(level, format!("{dots} {name} = {repr}"));
    }

    pub fn line(&self, level: usize, lineno: u32, text: Option<&str>) {
        let number = format!("{lineno:>4} |");
        let number = self.paint(&number, |s| s.dark_grey().to_string());
        self.write(level, format!("{} {}", number, text.unwrap_or("<no source>")));
    }

    pub fn ret(&self, level: usize, name: &str, repr: &str) {
        let head = self.paint("<<< Return value from", |s| s.cyan().bold().to_string());
        self.write(level, format!("{head} {name}: {repr}"));
    }

    pub fn exception(&self, level: usize, class: &str, message: &str) {
        let body = if message.is_empty() {
            format!("!!! {class}")
        } else {
            format!("!!! {class}: {message}")
        };
        let body = self.paint(&body, |s| s.red().to_string());
        self.write(level, body);
    }

    pub fn ended_by_exception(&self, level: usize) {
        let body = self.paint("!!! Call ended by exception", |s| s.red().to_string());
        self.write(level, body);
    }

    /// One sub-expression of a deep expression trace
    pub fn expression(&self, level: usize, text: &str, repr: &str) {
        let text = self.paint(text, |s| s.yellow().to_string());
        self.write(level, format!("{text} = {repr}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::io::SharedBuffer;

    fn tracer(settings: TracerSettings) -> (Rc<Tracer>, SharedBuffer) {
        let buffer = SharedBuffer::new();
        (Tracer::new(settings, buffer.sink()), buffer)
    }

    #[test]
    fn test_event_lines() {
        let (tracer, buffer) = tracer(TracerSettings::default());
        tracer.call(0, "add", "demo.py", 1);
        tracer.variable(0, "a", "1");
        tracer.line(0, 2, Some("    c = a + b"));
        tracer.variable(0, "c", "3");
        tracer.ret(0, "add", "3");
        assert_eq!(
            buffer.contents(),
            "DBG: >>> Call to add in File \"demo.py\", line 1\n\
             DBG: ...... a = 1\n\
             DBG:    2 |     c = a + b\n\
             DBG: ...... c = 3\n\
             DBG: <<< Return value from add: 3\n"
        );
    }

    #[test]
    fn test_nesting_and_missing_source() {
        let (tracer, buffer) = tracer(TracerSettings {
            prefix: "T>".into(),
            ..Default::default()
        });
        tracer.line(1, 12, None);
        tracer.exception(1, "ValueError", "bad");
        tracer.ended_by_exception(1);
        assert_eq!(
            buffer.contents(),
            "T>       12 | <no source>\nT>     !!! ValueError: bad\nT>     !!! Call ended by exception\n"
        );
    }

    #[test]
    fn test_color_output_strips_to_plain() {
        let (tracer, buffer) = tracer(TracerSettings {
            color: true,
            ..Default::default()
        });
        tracer.ret(0, "f", "None");
        let raw = buffer.contents();
        assert!(raw.contains('\x1b'));
        assert_eq!(strip_ansi_escapes(&raw), "DBG: <<< Return value from f: None\n");
    }

    #[test]
    fn test_configure_keeps_identity_and_clamps_depth() {
        let (tracer, _) = tracer(TracerSettings::default());
        let same = Rc::clone(&tracer);
        tracer.configure(|s| {
            s.depth = 0;
            s.add_watch("x");
            s.add_watch("x");
        });
        assert!(Rc::ptr_eq(&tracer, &same));
        assert_eq!(same.depth(), 1);
        assert_eq!(same.settings().watch, vec!["x".to_string()]);
    }

    #[test]
    fn test_watch_exprs_skip_unparseable() {
        let (tracer, _) = tracer(TracerSettings {
            watch: vec!["a + 1".into(), "(".into()],
            ..Default::default()
        });
        let watches = tracer.watch_exprs();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].0, "a + 1");
    }

    #[test]
    fn test_fork_copies_settings() {
        let (tracer, _) = tracer(TracerSettings {
            prefix: "P".into(),
            ..Default::default()
        });
        let forked = tracer.fork(Some(3));
        assert!(!Rc::ptr_eq(&tracer, &forked));
        assert_eq!(forked.depth(), 3);
        assert_eq!(forked.settings().prefix, "P");
    }
}
