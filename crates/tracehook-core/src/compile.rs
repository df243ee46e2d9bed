// Compiler front half: the static checks a module must pass before it can
// run, and the serializable unit the runtime executes and the cache stores.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::analysis::build_scope_tree;
use crate::ast::*;
use crate::error::ParseError;

/// A checked, executable module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub filename: String,
    pub module: Module,
    /// Original text, kept for tracebacks and line events
    pub source: Option<String>,
}

impl Code {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Check `module` and turn it into a [`Code`] unit
pub fn compile(module: Module, filename: &str) -> Result<Code, ParseError> {
    build_scope_tree(&module, filename)?;
    let mut checker = Checker {
        filename,
        in_function: false,
        in_loop: false,
    };
    checker.body(&module.body)?;
    trace!(filename, statements = module.body.len(), "compiled module");
    Ok(Code {
        filename: filename.to_string(),
        module,
        source: None,
    })
}

struct Checker<'a> {
    filename: &'a str,
    in_function: bool,
    in_loop: bool,
}

impl Checker<'_> {
    fn error(&self, message: impl Into<String>, loc: Option<Location>) -> ParseError {
        let loc = loc.unwrap_or(Location::point(1, 0));
        ParseError::syntax(message, self.filename, loc.line, loc.col)
    }

    fn body(&mut self, body: &[Stmt]) -> Result<(), ParseError> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn nested<F>(&mut self, in_function: bool, in_loop: bool, f: F) -> Result<(), ParseError>
    where
        F: FnOnce(&mut Self) -> Result<(), ParseError>,
    {
        let saved = (self.in_function, self.in_loop);
        self.in_function = in_function;
        self.in_loop = in_loop;
        let result = f(self);
        (self.in_function, self.in_loop) = saved;
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), ParseError> {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => self.nested(true, false, |c| c.body(&def.body)),
            StmtKind::ClassDef(def) => self.nested(false, false, |c| c.body(&def.body)),
            StmtKind::Return(_) if !self.in_function => Err(self.error("'return' outside function", stmt.loc)),
            StmtKind::Break if !self.in_loop => Err(self.error("'break' outside loop", stmt.loc)),
            StmtKind::Continue if !self.in_loop => Err(self.error("'continue' not properly in loop", stmt.loc)),
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    self.target(target, "assign to")?;
                }
                Ok(())
            }
            StmtKind::AugAssign { target, .. } => match target.kind {
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
                _ => Err(self.error(
                    format!("'{}' is an illegal expression for augmented assignment", describe(target)),
                    target.loc.or(stmt.loc),
                )),
            },
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.target(target, "delete")?;
                }
                Ok(())
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                self.target(target, "assign to")?;
                self.nested(self.in_function, true, |c| c.body(body))?;
                self.body(orelse)
            }
            StmtKind::While { body, orelse, .. } => {
                self.nested(self.in_function, true, |c| c.body(body))?;
                self.body(orelse)
            }
            StmtKind::If { body, orelse, .. } => {
                self.body(body)?;
                self.body(orelse)
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.body(body)?;
                for handler in handlers {
                    self.body(&handler.body)?;
                }
                self.body(orelse)?;
                self.body(finalbody)
            }
            StmtKind::ImportFrom { names, .. } if self.in_function && names.iter().any(|a| a.name == "*") => {
                Err(self.error("import * only allowed at module level", stmt.loc))
            }
            _ => Ok(()),
        }
    }

    fn target(&self, target: &Expr, verb: &str) -> Result<(), ParseError> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                let mut starred = 0;
                for elt in elts {
                    if let ExprKind::Starred(inner) = &elt.kind {
                        starred += 1;
                        self.target(inner, verb)?;
                    } else {
                        self.target(elt, verb)?;
                    }
                }
                if starred > 1 {
                    return Err(self.error("multiple starred expressions in assignment", target.loc));
                }
                Ok(())
            }
            ExprKind::Starred(_) => Err(self.error("starred assignment target must be in a list or tuple", target.loc)),
            _ => Err(self.error(format!("cannot {verb} {}", describe(target)), target.loc)),
        }
    }
}

fn describe(expr: &Expr) -> &'static str {
    match &expr.kind {
        ExprKind::Call { .. } => "function call",
        ExprKind::Constant(Constant::None) => "None",
        ExprKind::Constant(Constant::Bool(true)) => "True",
        ExprKind::Constant(Constant::Bool(false)) => "False",
        ExprKind::Constant(_) => "literal",
        ExprKind::FormattedString(_) => "f-string expression",
        ExprKind::BinOp { .. } | ExprKind::UnaryOp { .. } => "expression",
        ExprKind::BoolOp { .. } => "expression",
        ExprKind::Compare { .. } => "comparison",
        ExprKind::Lambda { .. } => "lambda",
        ExprKind::IfExp { .. } => "conditional expression",
        ExprKind::Dict { .. } => "dict literal",
        ExprKind::ListComp { .. } => "list comprehension",
        ExprKind::Tuple(_) => "tuple",
        ExprKind::List(_) => "list",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn check(source: &str) -> Result<Code, ParseError> {
        compile(parse_module(source, "<test>")?, "<test>")
    }

    #[test]
    fn test_valid_module_compiles() {
        let code = check("def f(x):\n    for i in x:\n        if i:\n            break\n    return x\n").unwrap();
        assert_eq!(code.filename, "<test>");
        assert!(code.source.is_none());
    }

    #[test]
    fn test_return_outside_function() {
        let err = check("x = 1\nreturn x\n").unwrap_err();
        assert_eq!(err.message, "'return' outside function");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_return_in_class_body() {
        let err = check("def f():\n    class C:\n        return 1\n").unwrap_err();
        assert_eq!(err.message, "'return' outside function");
    }

    #[test]
    fn test_break_and_continue_outside_loop() {
        assert_eq!(check("break\n").unwrap_err().message, "'break' outside loop");
        let err = check("while x:\n    def f():\n        continue\n").unwrap_err();
        assert_eq!(err.message, "'continue' not properly in loop");
    }

    #[test]
    fn test_invalid_assignment_targets() {
        assert_eq!(check("f() = 1\n").unwrap_err().message, "cannot assign to function call");
        assert_eq!(check("1 = x\n").unwrap_err().message, "cannot assign to literal");
        assert_eq!(check("a, *b, *c = x\n").unwrap_err().message, "multiple starred expressions in assignment");
        assert_eq!(check("del f()\n").unwrap_err().message, "cannot delete function call");
        assert!(check("a, (b, c) = x\n").is_ok());
    }

    #[test]
    fn test_scope_errors_surface() {
        let err = check("nonlocal x\n").unwrap_err();
        assert_eq!(err.message, "nonlocal declaration not allowed at module level");
    }

    #[test]
    fn test_star_import_in_function() {
        let err = check("def f():\n    from m import *\n").unwrap_err();
        assert_eq!(err.message, "import * only allowed at module level");
        assert!(check("if x:\n    from m import *\n").is_ok());
    }
}
