// Decorator injection pass

use std::collections::VecDeque;

use tracing::trace;

use crate::ast::*;

/// Which function definitions [`inject_decorator`] leaves alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectOptions {
    /// Decorate a function but not the functions defined inside it
    pub exclude_nested: bool,
    /// Skip functions defined directly in a class body, and everything
    /// inside them
    pub exclude_methods: bool,
}

/// Put a fresh `factory()` node first in the decorator list of every
/// eligible function definition in `module`, breadth-first. Returns the
/// number of definitions decorated.
pub fn inject_decorator(module: &mut Module, factory: &dyn Fn() -> Expr, options: InjectOptions) -> usize {
    // (statement list, whether it is a class body)
    let mut queue: VecDeque<(&mut Vec<Stmt>, bool)> = VecDeque::new();
    queue.push_back((&mut module.body, false));
    let mut decorated = 0;

    while let Some((body, class_body)) = queue.pop_front() {
        for stmt in body {
            match &mut stmt.kind {
                StmtKind::FunctionDef(def) => {
                    if class_body && options.exclude_methods {
                        trace!(name = %def.name, "skipping method");
                        continue;
                    }
                    def.decorators.insert(0, factory());
                    decorated += 1;
                    if !options.exclude_nested {
                        queue.push_back((&mut def.body, false));
                    }
                }
                StmtKind::ClassDef(def) => queue.push_back((&mut def.body, true)),
                StmtKind::For { body, orelse, .. }
                | StmtKind::While { body, orelse, .. }
                | StmtKind::If { body, orelse, .. } => {
                    queue.push_back((body, false));
                    queue.push_back((orelse, false));
                }
                StmtKind::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                } => {
                    queue.push_back((body, false));
                    for handler in handlers.iter_mut() {
                        queue.push_back((&mut handler.body, false));
                    }
                    queue.push_back((orelse, false));
                    queue.push_back((finalbody, false));
                }
                _ => {}
            }
        }
    }
    decorated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "\
def free():
    def inner():
        pass
    return inner

class Shape:
    def area(self):
        def helper():
            pass
        return 0

if True:
    def conditional():
        pass
";

    fn decorated(module: &Module) -> Vec<String> {
        let mut names = Vec::new();
        collect(&module.body, &mut names);
        names
    }

    fn collect(body: &[Stmt], names: &mut Vec<String>) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::FunctionDef(def) => {
                    if def.decorators.iter().any(|d| d.as_name() == Some("trace")) {
                        names.push(def.name.clone());
                    }
                    collect(&def.body, names);
                }
                StmtKind::ClassDef(def) => collect(&def.body, names),
                StmtKind::If { body, orelse, .. } => {
                    collect(body, names);
                    collect(orelse, names);
                }
                _ => {}
            }
        }
    }

    fn run(options: InjectOptions) -> (usize, Vec<String>) {
        let mut module = parse_module(SOURCE, "t.py").unwrap();
        let count = inject_decorator(&mut module, &|| Expr::name("trace"), options);
        (count, decorated(&module))
    }

    #[test]
    fn test_decorates_everything_by_default() {
        let (count, names) = run(InjectOptions::default());
        assert_eq!(count, 5);
        assert_eq!(names, ["free", "inner", "area", "helper", "conditional"]);
    }

    #[test]
    fn test_exclude_methods_skips_method_subtrees() {
        let (count, names) = run(InjectOptions {
            exclude_methods: true,
            ..Default::default()
        });
        assert_eq!(count, 3);
        assert_eq!(names, ["free", "inner", "conditional"]);
    }

    #[test]
    fn test_exclude_nested_only_decorates_outer_functions() {
        let (_, names) = run(InjectOptions {
            exclude_nested: true,
            ..Default::default()
        });
        assert_eq!(names, ["free", "area", "conditional"]);

        let (_, names) = run(InjectOptions {
            exclude_nested: true,
            exclude_methods: true,
        });
        assert_eq!(names, ["free", "conditional"]);
    }

    #[test]
    fn test_existing_decorators_stay_after_the_injected_one() {
        let mut module = parse_module("@cache\ndef f():\n    pass\n", "t.py").unwrap();
        inject_decorator(&mut module, &|| Expr::name("trace"), InjectOptions::default());
        let def = module.body[0].as_function_def().unwrap();
        let names: Vec<_> = def.decorators.iter().filter_map(Expr::as_name).collect();
        assert_eq!(names, ["trace", "cache"]);
    }

    #[test]
    fn test_each_site_gets_its_own_node() {
        let mut module = parse_module("def a():\n    pass\ndef b():\n    pass\n", "t.py").unwrap();
        let calls = std::cell::Cell::new(0);
        let factory = || {
            calls.set(calls.get() + 1);
            Expr::name("trace")
        };
        assert_eq!(inject_decorator(&mut module, &factory, InjectOptions::default()), 2);
        assert_eq!(calls.get(), 2);
    }
}
