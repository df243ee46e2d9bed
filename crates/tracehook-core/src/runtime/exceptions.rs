// Script-level exceptions and the interpreter's error type

use std::fmt;
use std::rc::Rc;

use super::value::{Instance, Value};
use crate::error::ConsistencyError;

/// The builtin exception classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    Exception,
    SystemExit,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    ImportError,
    ModuleNotFoundError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    AssertionError,
    SyntaxError,
}

impl ExcKind {
    /// Parents come before children
    pub const ALL: [ExcKind; 21] = [
        ExcKind::BaseException,
        ExcKind::Exception,
        ExcKind::SystemExit,
        ExcKind::ArithmeticError,
        ExcKind::ZeroDivisionError,
        ExcKind::OverflowError,
        ExcKind::LookupError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::ValueError,
        ExcKind::TypeError,
        ExcKind::NameError,
        ExcKind::UnboundLocalError,
        ExcKind::AttributeError,
        ExcKind::ImportError,
        ExcKind::ModuleNotFoundError,
        ExcKind::RuntimeError,
        ExcKind::RecursionError,
        ExcKind::NotImplementedError,
        ExcKind::AssertionError,
        ExcKind::SyntaxError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::Exception => "Exception",
            ExcKind::SystemExit => "SystemExit",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::LookupError => "LookupError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::ValueError => "ValueError",
            ExcKind::TypeError => "TypeError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::ImportError => "ImportError",
            ExcKind::ModuleNotFoundError => "ModuleNotFoundError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::SyntaxError => "SyntaxError",
        }
    }

    pub fn parent(self) -> Option<ExcKind> {
        Some(match self {
            ExcKind::BaseException => return None,
            ExcKind::Exception | ExcKind::SystemExit => ExcKind::BaseException,
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => ExcKind::ArithmeticError,
            ExcKind::IndexError | ExcKind::KeyError => ExcKind::LookupError,
            ExcKind::UnboundLocalError => ExcKind::NameError,
            ExcKind::ModuleNotFoundError => ExcKind::ImportError,
            ExcKind::RecursionError | ExcKind::NotImplementedError => ExcKind::RuntimeError,
            _ => ExcKind::Exception,
        })
    }

    pub fn index(self) -> usize {
        ExcKind::ALL.iter().position(|k| *k == self).unwrap_or(0)
    }
}

/// One frame of a traceback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracebackEntry {
    pub filename: Rc<str>,
    pub line: u32,
    pub name: String,
}

/// An exception instance in flight, with the frames it unwound through
pub struct RaisedException {
    pub value: Rc<Instance>,
    /// Innermost frame first
    pub traceback: Vec<TracebackEntry>,
}

impl RaisedException {
    pub fn new(value: Rc<Instance>) -> Self {
        Self {
            value,
            traceback: Vec::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.value.class.name
    }

    pub fn args(&self) -> Vec<Value> {
        match self.value.dict.borrow().get("args") {
            Some(Value::Tuple(items)) => items.to_vec(),
            _ => Vec::new(),
        }
    }

    /// `str(exc)` for the common argument shapes
    pub fn message(&self) -> String {
        let args = self.args();
        match args.as_slice() {
            [] => String::new(),
            [single] if self.class_name() == "KeyError" => super::ops::basic_repr(single),
            [single] => super::ops::basic_str(single),
            many => super::ops::basic_repr(&Value::tuple(many.to_vec())),
        }
    }

    /// `Type: message` as printed on the last traceback line
    pub fn summary(&self) -> String {
        let message = self.message();
        if message.is_empty() {
            self.class_name().to_string()
        } else {
            format!("{}: {}", self.class_name(), message)
        }
    }

    /// Explicit `raise ... from` cause
    pub fn cause(&self) -> Option<Rc<Instance>> {
        match self.value.dict.borrow().get("__cause__") {
            Some(Value::Instance(cause)) => Some(cause.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for RaisedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaisedException")
            .field("summary", &self.summary())
            .field("traceback", &self.traceback)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A script-level exception, catchable by `except`
    #[error("{}", .0.summary())]
    Raised(Box<RaisedException>),

    /// Tracing state was desynchronized; never catchable by scripts
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
}

impl RuntimeError {
    pub fn exception(&self) -> Option<&RaisedException> {
        match self {
            RuntimeError::Raised(exc) => Some(exc),
            RuntimeError::Consistency(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_is_ordered() {
        for kind in ExcKind::ALL {
            if let Some(parent) = kind.parent() {
                assert!(parent.index() < kind.index(), "{} before {}", parent.name(), kind.name());
            }
        }
        assert_eq!(ExcKind::ModuleNotFoundError.parent(), Some(ExcKind::ImportError));
        assert_eq!(ExcKind::SystemExit.parent(), Some(ExcKind::BaseException));
    }
}
