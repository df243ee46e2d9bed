// Scope-insensitive identifier collection

use std::collections::BTreeSet;

use crate::ast::visit::{walk_class_def, walk_expr, walk_function_def, Visitor};
use crate::ast::*;

/// Anything a [`Visitor`] can be run over
pub trait Node {
    fn accept<V: Visitor>(&self, visitor: &mut V);
}

impl Node for Module {
    fn accept<V: Visitor>(&self, visitor: &mut V) {
        self.body.accept(visitor);
    }
}

impl Node for [Stmt] {
    fn accept<V: Visitor>(&self, visitor: &mut V) {
        for stmt in self {
            visitor.visit_stmt(stmt);
        }
    }
}

impl Node for Vec<Stmt> {
    fn accept<V: Visitor>(&self, visitor: &mut V) {
        self.as_slice().accept(visitor);
    }
}

impl Node for Stmt {
    fn accept<V: Visitor>(&self, visitor: &mut V) {
        visitor.visit_stmt(self);
    }
}

impl Node for Expr {
    fn accept<V: Visitor>(&self, visitor: &mut V) {
        visitor.visit_expr(self);
    }
}

impl Node for SourceUnit {
    fn accept<V: Visitor>(&self, visitor: &mut V) {
        match self {
            SourceUnit::Module(module) => module.accept(visitor),
            SourceUnit::Expression(expr) => expr.accept(visitor),
        }
    }
}

#[derive(Default)]
struct NameCollector {
    names: BTreeSet<String>,
}

impl Visitor for NameCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Name(id) = &expr.kind {
            self.names.insert(id.clone());
        }
        walk_expr(self, expr);
    }

    fn visit_function_def(&mut self, def: &FunctionDef) {
        self.names.insert(def.name.clone());
        walk_function_def(self, def);
    }

    fn visit_class_def(&mut self, def: &ClassDef) {
        self.names.insert(def.name.clone());
        walk_class_def(self, def);
    }

    fn visit_alias(&mut self, alias: &Alias) {
        if alias.name != "*" {
            self.names.insert(alias.bound_name().to_string());
        }
    }
}

/// Every bare name reference, import binding and def/class name in `node`.
///
/// This may under-approximate: exception handler names, parameters and
/// attribute names are not collected.
pub fn collect_referenced_names<N: Node + ?Sized>(node: &N) -> BTreeSet<String> {
    let mut collector = NameCollector::default();
    node.accept(&mut collector);
    collector.names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn test_collects_names_imports_and_definitions() {
        let module = parse_module(
            "import os.path\nimport numpy as np\nfrom m import a, b as c\ndef f(p):\n    return q\nclass K:\n    pass\nx = y.attr\n",
            "<test>",
        )
        .unwrap();
        let names = collect_referenced_names(&module);
        let expected: BTreeSet<String> = ["os", "np", "a", "c", "f", "q", "K", "x", "y"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_handler_names_and_parameters_are_not_collected() {
        let module = parse_module(
            "try:\n    pass\nexcept E as err:\n    pass\nlambda v: 1\n",
            "<test>",
        )
        .unwrap();
        let names = collect_referenced_names(&module);
        assert!(names.contains("E"));
        assert!(!names.contains("err"));
        assert!(!names.contains("v"));
    }
}
