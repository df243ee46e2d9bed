// Error types shared across the crate.
// Script-level failures are host exceptions (see `runtime::exceptions`); the
// types here describe failures of the machinery itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorKind {
    Syntax,
    Indentation,
}

impl ParseErrorKind {
    /// Name of the script exception class this error surfaces as
    pub fn class_name(self) -> &'static str {
        match self {
            ParseErrorKind::Syntax => "SyntaxError",
            ParseErrorKind::Indentation => "IndentationError",
        }
    }
}

/// Invalid source text, or a scope rule violated at compile time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({filename}, line {line})")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub filename: String,
    pub line: u32,
    pub col: u32,
    /// The offending source line, when known
    pub text: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        filename: impl Into<String>,
        line: u32,
        col: u32,
        text: Option<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            filename: filename.into(),
            line,
            col,
            text,
        }
    }

    pub fn syntax(message: impl Into<String>, filename: impl Into<String>, line: u32, col: u32) -> Self {
        Self::new(ParseErrorKind::Syntax, message, filename, line, col, None)
    }

    /// Attach the offending line from `source` if none is set
    pub fn with_source_line(mut self, source: &str) -> Self {
        if self.text.is_none() && self.line > 0 {
            self.text = source.lines().nth(self.line as usize - 1).map(str::to_string);
        }
        self
    }

    /// Multi-line report in the shape of an interpreter traceback tail
    pub fn report(&self) -> String {
        let mut out = format!("  File \"{}\", line {}\n", self.filename, self.line);
        if let Some(text) = &self.text {
            let trimmed = text.trim_start();
            let shift = text.len() - trimmed.len();
            out.push_str(&format!("    {}\n", trimmed.trim_end()));
            let caret = (self.col as usize).saturating_sub(shift);
            out.push_str(&format!("    {}^\n", " ".repeat(caret)));
        }
        out.push_str(&format!("{}: {}\n", self.kind.class_name(), self.message));
        out
    }
}

/// Module resolution failures
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("no module named '{0}'")]
    NotFound(String),

    #[error("relative module names are not supported")]
    Relative,

    #[error("cannot import name '{name}' from '{module}'")]
    NameNotFound { name: String, module: String },

    #[error("{reason}: {}", .path.display())]
    Io {
        reason: String,
        path: PathBuf,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// The tracer bound in an instrumented namespace is no longer the configured one
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tracer binding '{binding}' in module '{module}' was replaced during execution")]
pub struct ConsistencyError {
    pub module: String,
    pub binding: String,
}

/// Misuse of the process instrumentation context
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentError {
    #[error("instrumentation is already installed in this process")]
    AlreadyInstalled,

    #[error("instrumentation is not installed")]
    NotInstalled,

    #[error("depth must be >= 1")]
    InvalidDepth(i64),

    #[error("depth {0} is too large")]
    DepthTooLarge(i64),
}

/// Bytecode cache read/write failures; never fatal to an import
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("stale cache entry for {}", .0.display())]
    Stale(PathBuf),

    #[error("cache writes are disabled")]
    Disabled,
}

/// Error types for tracehook core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Instrumentation error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tracehook core operations
pub type Result<T> = std::result::Result<T, Error>;
