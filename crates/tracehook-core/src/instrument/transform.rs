// Module-level instrumentation transform

use tracing::{debug, trace};

use super::inject::{inject_decorator, InjectOptions};
use super::{TracePolicy, NAME_TRACE_DECORATOR, NAME_TRACE_MODULE_FN};
use crate::analysis::{copy_location, propagate_missing_locations, wrap_as_callable, CopyMode};
use crate::ast::*;

/// A rewrite applied to a whole parsed module before it is compiled
pub trait ModuleTransform {
    /// Human-readable name, used in diagnostics
    fn name(&self) -> &'static str;

    /// Rewrite `module`, returning the module to compile
    fn transform(&self, module: Module) -> Module;
}

fn decorator() -> Expr {
    Expr::name(NAME_TRACE_DECORATOR)
}

/// Decorate every eligible function with the tracer binding and, when
/// `policy.trace_modules` is set, move the module body into a traced
/// function that declares every referenced name `global`. Missing
/// locations are backfilled afterwards.
pub fn trace_transform_module(module: &mut Module, policy: TracePolicy) {
    let options = InjectOptions {
        exclude_methods: !policy.trace_methods,
        exclude_nested: !policy.trace_nested,
    };
    let decorated = inject_decorator(module, &decorator, options);

    if policy.trace_modules {
        let (mut def, call) = wrap_as_callable(NAME_TRACE_MODULE_FN, &module.body, DeclarationKind::Global, None);
        let mut wrap = decorator();
        copy_location(&mut wrap, &def, CopyMode::Start);
        if let Some(func) = def.as_function_def_mut() {
            func.decorators.insert(0, wrap);
        }
        let loc = call.loc;
        let mut run = Stmt::expr(call);
        run.loc = loc;
        module.body = vec![def, run];
    }

    propagate_missing_locations(module, 1, 0, None, None);
    debug!(decorated, wrapped = policy.trace_modules, "module transformed");
    trace!(source = %module.to_source(), "transformed source");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn transformed(source: &str, policy: TracePolicy) -> Module {
        let mut module = parse_module(source, "m.py").unwrap();
        trace_transform_module(&mut module, policy);
        module
    }

    #[test]
    fn test_functions_get_the_tracer_binding() {
        let module = transformed("def f():\n    pass\n", TracePolicy::default());
        let def = module.body[0].as_function_def().unwrap();
        assert_eq!(def.decorators[0].as_name(), Some(NAME_TRACE_DECORATOR));
        assert_eq!(module.body.len(), 1);
    }

    #[test]
    fn test_module_wrap_replaces_body() {
        let policy = TracePolicy {
            trace_modules: true,
            ..Default::default()
        };
        let module = transformed("x = 1\ndef f():\n    return x\nf()\n", policy);
        assert_eq!(module.body.len(), 2);

        let wrapper = module.body[0].as_function_def().unwrap();
        assert_eq!(wrapper.name, NAME_TRACE_MODULE_FN);
        assert_eq!(wrapper.decorators[0].as_name(), Some(NAME_TRACE_DECORATOR));
        assert!(matches!(&wrapper.body[0].kind, StmtKind::Global(names) if names.contains(&"x".to_string())));
        // the inner def was decorated before wrapping
        let inner = wrapper.body[2].as_function_def().unwrap();
        assert_eq!(inner.decorators.len(), 1);

        match &module.body[1].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Call { func, .. },
                ..
            }) => assert_eq!(func.as_name(), Some(NAME_TRACE_MODULE_FN)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(module.body[1].line(), Some(4));
    }

    #[test]
    fn test_every_node_has_a_location() {
        use crate::ast::visit::{walk_expr, walk_stmt, Visitor};

        struct Missing(usize);
        impl Visitor for Missing {
            fn visit_stmt(&mut self, stmt: &Stmt) {
                self.0 += stmt.loc.is_none() as usize;
                walk_stmt(self, stmt);
            }
            fn visit_expr(&mut self, expr: &Expr) {
                self.0 += expr.loc.is_none() as usize;
                walk_expr(self, expr);
            }
        }

        let policy = TracePolicy {
            trace_modules: true,
            ..Default::default()
        };
        let module = transformed("class A:\n    def m(self):\n        return 1\nA().m()\n", policy);
        let mut missing = Missing(0);
        for stmt in &module.body {
            missing.visit_stmt(stmt);
        }
        assert_eq!(missing.0, 0);
    }
}
