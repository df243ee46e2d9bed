// Scope tree construction and name resolution.
// One SymbolScope per module, function, lambda, class body and comprehension.
// Building the tree also enforces the declaration rules a compiler checks.

use std::collections::{BTreeSet, HashSet, VecDeque};

use indexmap::IndexMap;

use crate::ast::*;
use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Lambda,
    Class,
    Comprehension,
}

impl ScopeKind {
    /// Scopes whose bindings are visible to nested functions
    pub fn is_function_like(self) -> bool {
        matches!(self, ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolFlags {
    pub assigned: bool,
    pub referenced: bool,
    pub parameter: bool,
    pub imported: bool,
    pub declared_global: bool,
    pub declared_nonlocal: bool,
}

impl SymbolFlags {
    pub fn is_bound(&self) -> bool {
        self.assigned || self.parameter || self.imported
    }
}

/// Where a name resolves at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Local,
    GlobalExplicit,
    GlobalImplicit,
    Free,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub flags: SymbolFlags,
    pub binding: Binding,
    /// Location of a global/nonlocal declaration, if any
    pub declared_at: Option<Location>,
}

impl Symbol {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: SymbolFlags::default(),
            binding: Binding::Local,
            declared_at: None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self.binding, Binding::GlobalExplicit | Binding::GlobalImplicit)
    }

    pub fn is_local(&self) -> bool {
        self.binding == Binding::Local
    }

    pub fn is_free(&self) -> bool {
        self.binding == Binding::Free
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolScope {
    pub name: String,
    pub kind: ScopeKind,
    pub line: u32,
    pub symbols: IndexMap<String, Symbol>,
    pub children: Vec<SymbolScope>,
}

impl SymbolScope {
    fn new(name: impl Into<String>, kind: ScopeKind, line: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            line,
            symbols: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    fn symbol(&mut self, name: &str) -> &mut Symbol {
        self.symbols
            .entry(name.to_string())
            .or_insert_with(|| Symbol::new(name))
    }

    /// Names visible to nested function scopes
    fn enclosing_bindings(&self) -> HashSet<String> {
        self.symbols
            .values()
            .filter(|s| !s.flags.declared_global && (s.flags.is_bound() || s.flags.declared_nonlocal))
            .map(|s| s.name.clone())
            .collect()
    }
}

/// Breadth-first iterator over a scope tree
pub struct ScopeWalk<'a> {
    queue: VecDeque<&'a SymbolScope>,
}

impl<'a> Iterator for ScopeWalk<'a> {
    type Item = &'a SymbolScope;

    fn next(&mut self) -> Option<Self::Item> {
        let scope = self.queue.pop_front()?;
        self.queue.extend(scope.children.iter());
        Some(scope)
    }
}

pub fn walk_scopes(root: &SymbolScope) -> ScopeWalk<'_> {
    ScopeWalk {
        queue: VecDeque::from([root]),
    }
}

/// Build and resolve the scope tree of a module
pub fn build_scope_tree(module: &Module, filename: &str) -> Result<SymbolScope, ParseError> {
    let mut builder = ScopeBuilder {
        filename,
        stack: vec![SymbolScope::new("top", ScopeKind::Module, 0)],
        current: None,
    };
    for stmt in &module.body {
        builder.stmt(stmt)?;
    }
    let mut root = builder
        .stack
        .pop()
        .unwrap_or_else(|| SymbolScope::new("top", ScopeKind::Module, 0));
    resolve(&mut root, &[], filename)?;
    Ok(root)
}

struct ScopeBuilder<'a> {
    filename: &'a str,
    stack: Vec<SymbolScope>,
    current: Option<Location>,
}

impl<'a> ScopeBuilder<'a> {
    fn scope(&mut self) -> &mut SymbolScope {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn error(&self, message: String) -> ParseError {
        let at = self.current.unwrap_or(Location::point(1, 0));
        ParseError::syntax(message, self.filename, at.line, at.col)
    }

    fn push(&mut self, name: &str, kind: ScopeKind) {
        let line = self.current.map(|l| l.line).unwrap_or(0);
        self.stack.push(SymbolScope::new(name, kind, line));
    }

    fn pop(&mut self) {
        if self.stack.len() > 1 {
            if let Some(scope) = self.stack.pop() {
                self.scope().children.push(scope);
            }
        }
    }

    fn reference(&mut self, name: &str) {
        self.scope().symbol(name).flags.referenced = true;
    }

    fn assign(&mut self, name: &str) {
        self.scope().symbol(name).flags.assigned = true;
    }

    fn body(&mut self, body: &[Stmt]) -> Result<(), ParseError> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn params(&mut self, params: &Parameters) {
        for name in params.names() {
            self.scope().symbol(name).flags.parameter = true;
        }
    }

    fn defaults(&mut self, params: &Parameters) -> Result<(), ParseError> {
        for param in params.iter() {
            if let Some(default) = &param.default {
                self.expr(default)?;
            }
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), ParseError> {
        if stmt.loc.is_some() {
            self.current = stmt.loc;
        }
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                for decorator in &def.decorators {
                    self.expr(decorator)?;
                }
                self.defaults(&def.params)?;
                self.assign(&def.name);
                self.push(&def.name, ScopeKind::Function);
                self.params(&def.params);
                self.body(&def.body)?;
                self.pop();
            }
            StmtKind::ClassDef(def) => {
                for decorator in &def.decorators {
                    self.expr(decorator)?;
                }
                for base in &def.bases {
                    self.expr(base)?;
                }
                self.assign(&def.name);
                self.push(&def.name, ScopeKind::Class);
                self.body(&def.body)?;
                self.pop();
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value)?;
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.target(target)?;
                }
            }
            StmtKind::Assign { targets, value } => {
                self.expr(value)?;
                for target in targets {
                    self.target(target)?;
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(value)?;
                if let ExprKind::Name(name) = &target.kind {
                    self.reference(name);
                }
                self.target(target)?;
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.expr(iter)?;
                self.target(target)?;
                self.body(body)?;
                self.body(orelse)?;
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.expr(test)?;
                self.body(body)?;
                self.body(orelse)?;
            }
            StmtKind::Raise { exc, cause } => {
                for expr in [exc, cause].into_iter().flatten() {
                    self.expr(expr)?;
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.body(body)?;
                for handler in handlers {
                    if let Some(class) = &handler.class {
                        self.expr(class)?;
                    }
                    if let Some(name) = &handler.name {
                        self.assign(name);
                    }
                    self.body(&handler.body)?;
                }
                self.body(orelse)?;
                self.body(finalbody)?;
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test)?;
                if let Some(msg) = msg {
                    self.expr(msg)?;
                }
            }
            StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    if alias.name != "*" {
                        let bound = alias.bound_name().to_string();
                        self.scope().symbol(&bound).flags.imported = true;
                    }
                }
            }
            StmtKind::Global(names) => {
                for name in names {
                    self.declare(name, true)?;
                }
            }
            StmtKind::Nonlocal(names) => {
                if self.scope().kind == ScopeKind::Module {
                    return Err(self.error("nonlocal declaration not allowed at module level".to_string()));
                }
                for name in names {
                    self.declare(name, false)?;
                }
            }
            StmtKind::Expr(value) => self.expr(value)?,
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
        }
        Ok(())
    }

    fn declare(&mut self, name: &str, global: bool) -> Result<(), ParseError> {
        let what = if global { "global" } else { "nonlocal" };
        let at = self.current;
        let flags = self.scope().symbol(name).flags;
        if flags.parameter {
            return Err(self.error(format!("name '{name}' is parameter and {what}")));
        }
        if (global && flags.declared_nonlocal) || (!global && flags.declared_global) {
            return Err(self.error(format!("name '{name}' is nonlocal and global")));
        }
        if flags.assigned || flags.imported {
            return Err(self.error(format!("name '{name}' is assigned to before {what} declaration")));
        }
        if flags.referenced {
            return Err(self.error(format!("name '{name}' is used prior to {what} declaration")));
        }
        let symbol = self.scope().symbol(name);
        if global {
            symbol.flags.declared_global = true;
        } else {
            symbol.flags.declared_nonlocal = true;
        }
        symbol.declared_at = at;
        Ok(())
    }

    /// Record the names a store target binds
    fn target(&mut self, target: &Expr) -> Result<(), ParseError> {
        match &target.kind {
            ExprKind::Name(name) => self.assign(name),
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                for elt in elts {
                    self.target(elt)?;
                }
            }
            ExprKind::Starred(inner) => self.target(inner)?,
            ExprKind::Attribute { value, .. } => self.expr(value)?,
            ExprKind::Subscript { value, index } => {
                self.expr(value)?;
                self.expr(index)?;
            }
            _ => self.expr(target)?,
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), ParseError> {
        match &expr.kind {
            ExprKind::Name(name) => self.reference(name),
            ExprKind::Lambda { params, body } => {
                self.defaults(params)?;
                self.push("lambda", ScopeKind::Lambda);
                self.params(params);
                self.expr(body)?;
                self.pop();
            }
            ExprKind::ListComp { elt, generators } => {
                let mut generators = generators.iter();
                if let Some(first) = generators.next() {
                    self.expr(&first.iter)?;
                    self.push("listcomp", ScopeKind::Comprehension);
                    self.target(&first.target)?;
                    for cond in &first.ifs {
                        self.expr(cond)?;
                    }
                    for generator in generators {
                        self.expr(&generator.iter)?;
                        self.target(&generator.target)?;
                        for cond in &generator.ifs {
                            self.expr(cond)?;
                        }
                    }
                    self.expr(elt)?;
                    self.pop();
                }
            }
            _ => {
                let mut children = Vec::new();
                collect_child_exprs(expr, &mut children);
                for child in children {
                    self.expr(child)?;
                }
            }
        }
        Ok(())
    }
}

/// Direct sub-expressions of an expression other than lambda and comprehension
fn collect_child_exprs<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match &expr.kind {
        ExprKind::BoolOp { values, .. } => out.extend(values.iter()),
        ExprKind::BinOp { left, right, .. } => {
            out.push(left);
            out.push(right);
        }
        ExprKind::UnaryOp { operand, .. } => out.push(operand),
        ExprKind::IfExp { test, body, orelse } => {
            out.push(test);
            out.push(body);
            out.push(orelse);
        }
        ExprKind::Dict { keys, values } => {
            out.extend(keys.iter());
            out.extend(values.iter());
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            out.push(left);
            out.extend(comparators.iter());
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            out.push(func);
            out.extend(args.iter());
            out.extend(keywords.iter().map(|k| &k.value));
        }
        ExprKind::FormattedString(parts) => {
            for part in parts {
                if let FStringPart::Value { value, .. } = part {
                    out.push(value);
                }
            }
        }
        ExprKind::Attribute { value, .. } | ExprKind::Starred(value) => out.push(value),
        ExprKind::Subscript { value, index } => {
            out.push(value);
            out.push(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                out.push(part);
            }
        }
        ExprKind::List(elts) | ExprKind::Tuple(elts) => out.extend(elts.iter()),
        ExprKind::Lambda { .. }
        | ExprKind::ListComp { .. }
        | ExprKind::Constant(_)
        | ExprKind::Name(_) => {}
    }
}

fn resolve(scope: &mut SymbolScope, enclosing: &[HashSet<String>], filename: &str) -> Result<(), ParseError> {
    let module = scope.kind == ScopeKind::Module;
    for symbol in scope.symbols.values_mut() {
        symbol.binding = if symbol.flags.declared_global {
            Binding::GlobalExplicit
        } else if module {
            Binding::GlobalImplicit
        } else if symbol.flags.declared_nonlocal {
            if !enclosing.iter().any(|names| names.contains(&symbol.name)) {
                let at = symbol.declared_at.unwrap_or(Location::point(scope.line, 0));
                return Err(ParseError::syntax(
                    format!("no binding for nonlocal '{}' found", symbol.name),
                    filename,
                    at.line,
                    at.col,
                ));
            }
            Binding::Free
        } else if symbol.flags.is_bound() {
            Binding::Local
        } else if enclosing.iter().any(|names| names.contains(&symbol.name)) {
            Binding::Free
        } else {
            Binding::GlobalImplicit
        };
    }

    let mut nested = enclosing.to_vec();
    if scope.kind.is_function_like() {
        nested.push(scope.enclosing_bindings());
    }
    for child in &mut scope.children {
        resolve(child, &nested, filename)?;
    }
    Ok(())
}

/// Local, global and nonlocal names of one function body, for the runtime.
/// Nested function, class, lambda and comprehension bodies are not entered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalScope {
    pub locals: BTreeSet<String>,
    pub globals: BTreeSet<String>,
    pub nonlocals: BTreeSet<String>,
}

impl LocalScope {
    pub fn of_function(params: &Parameters, body: &[Stmt]) -> Self {
        let mut scan = BindingScan::default();
        for stmt in body {
            scan.stmt(stmt);
        }
        let mut locals: BTreeSet<String> = params.names().map(str::to_string).collect();
        locals.extend(scan.bound);
        locals.retain(|name| !scan.globals.contains(name) && !scan.nonlocals.contains(name));
        Self {
            locals,
            globals: scan.globals,
            nonlocals: scan.nonlocals,
        }
    }

    pub fn of_lambda(params: &Parameters) -> Self {
        Self {
            locals: params.names().map(str::to_string).collect(),
            ..Default::default()
        }
    }

    /// Comprehension targets
    pub fn of_comprehension(generators: &[Comprehension]) -> Self {
        let mut scan = BindingScan::default();
        for generator in generators {
            scan.target(&generator.target);
        }
        Self {
            locals: scan.bound,
            ..Default::default()
        }
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains(name)
    }
}

#[derive(Default)]
struct BindingScan {
    bound: BTreeSet<String>,
    globals: BTreeSet<String>,
    nonlocals: BTreeSet<String>,
}

impl BindingScan {
    fn body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.bound.insert(name.clone());
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                for elt in elts {
                    self.target(elt);
                }
            }
            ExprKind::Starred(inner) => self.target(inner),
            _ => {}
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.bound.insert(def.name.clone());
            }
            StmtKind::ClassDef(def) => {
                self.bound.insert(def.name.clone());
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.target(target);
                }
            }
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    self.target(target);
                }
            }
            StmtKind::AugAssign { target, .. } => self.target(target),
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                self.target(target);
                self.body(body);
                self.body(orelse);
            }
            StmtKind::While { body, orelse, .. } | StmtKind::If { body, orelse, .. } => {
                self.body(body);
                self.body(orelse);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.body(body);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        self.bound.insert(name.clone());
                    }
                    self.body(&handler.body);
                }
                self.body(orelse);
                self.body(finalbody);
            }
            StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    if alias.name != "*" {
                        self.bound.insert(alias.bound_name().to_string());
                    }
                }
            }
            StmtKind::Global(names) => self.globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => self.nonlocals.extend(names.iter().cloned()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn tree(source: &str) -> SymbolScope {
        build_scope_tree(&parse_module(source, "<test>").unwrap(), "<test>").unwrap()
    }

    fn tree_err(source: &str) -> ParseError {
        build_scope_tree(&parse_module(source, "<test>").unwrap(), "<test>").unwrap_err()
    }

    #[test]
    fn test_module_symbols_are_global() {
        let root = tree("x = 1\ndef f():\n    return x\n");
        assert!(root.lookup("x").unwrap().is_global());
        assert!(root.lookup("f").unwrap().is_global());
        let f = &root.children[0];
        assert_eq!(f.kind, ScopeKind::Function);
        assert_eq!(f.lookup("x").unwrap().binding, Binding::GlobalImplicit);
    }

    #[test]
    fn test_closure_skips_class_scope() {
        let source = "\
def outer():
    y = 1
    class K:
        z = 2
        def m(self):
            return y + z
    return K
";
        let root = tree(source);
        let outer = &root.children[0];
        let class = &outer.children[0];
        let method = &class.children[0];
        assert_eq!(method.lookup("y").unwrap().binding, Binding::Free);
        // class attributes are not visible to methods
        assert_eq!(method.lookup("z").unwrap().binding, Binding::GlobalImplicit);
    }

    #[test]
    fn test_global_and_nonlocal_declarations() {
        let source = "\
def f():
    global g
    g = 1
    n = 0
    def h():
        nonlocal n
        n += 1
    return h
";
        let root = tree(source);
        let f = &root.children[0];
        assert_eq!(f.lookup("g").unwrap().binding, Binding::GlobalExplicit);
        assert_eq!(f.lookup("n").unwrap().binding, Binding::Local);
        assert_eq!(f.children[0].lookup("n").unwrap().binding, Binding::Free);
    }

    #[test]
    fn test_declaration_errors() {
        assert!(tree_err("nonlocal x\n").message.contains("module level"));
        assert!(tree_err("def f():\n    nonlocal x\n").message.contains("no binding for nonlocal 'x'"));
        assert!(tree_err("def f(a):\n    global a\n").message.contains("parameter and global"));
        let err = tree_err("def f():\n    print(x)\n    global x\n");
        assert!(err.message.contains("used prior to global declaration"));
        assert_eq!(err.line, 3);
        assert!(tree_err("def f():\n    x = 1\n    global x\n")
            .message
            .contains("assigned to before global declaration"));
    }

    #[test]
    fn test_walk_is_breadth_first() {
        let root = tree("def a():\n    def b():\n        pass\nclass C:\n    pass\n");
        let names: Vec<_> = walk_scopes(&root).map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["top", "a", "C", "b"]);
    }

    #[test]
    fn test_comprehension_and_lambda_scopes() {
        let root = tree("ys = [x * k for x in xs]\nf = lambda a: a + b\n");
        let comp = &root.children[0];
        assert_eq!(comp.kind, ScopeKind::Comprehension);
        assert!(comp.lookup("x").unwrap().is_local());
        assert!(comp.lookup("k").unwrap().is_global());
        let lambda = &root.children[1];
        assert!(lambda.lookup("a").unwrap().flags.parameter);
        assert!(lambda.lookup("b").unwrap().is_global());
    }

    #[test]
    fn test_local_scope_of_function() {
        let module = parse_module(
            "def f(a):\n    global g\n    for i in a:\n        b = i\n    def inner():\n        c = 1\n    import os.path\n",
            "<test>",
        )
        .unwrap();
        let def = module.body[0].as_function_def().unwrap();
        let scope = LocalScope::of_function(&def.params, &def.body);
        let locals: Vec<_> = scope.locals.iter().map(String::as_str).collect();
        assert_eq!(locals, vec!["a", "b", "i", "inner", "os"]);
        assert!(scope.globals.contains("g"));
    }
}
