// Tree walking over the AST.
// One method per node kind, each defaulting to a structural walk of the
// node's children; implementors override only the kinds they care about.

use super::*;

pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_function_def(&mut self, def: &FunctionDef) {
        walk_function_def(self, def);
    }

    fn visit_class_def(&mut self, def: &ClassDef) {
        walk_class_def(self, def);
    }

    fn visit_alias(&mut self, _alias: &Alias) {}

    fn visit_handler(&mut self, handler: &ExceptHandler) {
        walk_handler(self, handler);
    }

    fn visit_params(&mut self, params: &Parameters) {
        for param in params.iter() {
            if let Some(default) = &param.default {
                self.visit_expr(default);
            }
        }
    }
}

pub fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_function_def<V: Visitor + ?Sized>(visitor: &mut V, def: &FunctionDef) {
    for decorator in &def.decorators {
        visitor.visit_expr(decorator);
    }
    visitor.visit_params(&def.params);
    walk_body(visitor, &def.body);
}

pub fn walk_class_def<V: Visitor + ?Sized>(visitor: &mut V, def: &ClassDef) {
    for decorator in &def.decorators {
        visitor.visit_expr(decorator);
    }
    for base in &def.bases {
        visitor.visit_expr(base);
    }
    walk_body(visitor, &def.body);
}

pub fn walk_handler<V: Visitor + ?Sized>(visitor: &mut V, handler: &ExceptHandler) {
    if let Some(class) = &handler.class {
        visitor.visit_expr(class);
    }
    walk_body(visitor, &handler.body);
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::FunctionDef(def) => visitor.visit_function_def(def),
        StmtKind::ClassDef(def) => visitor.visit_class_def(def),
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                visitor.visit_expr(target);
            }
        }
        StmtKind::Assign { targets, value } => {
            for target in targets {
                visitor.visit_expr(target);
            }
            visitor.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            visitor.visit_expr(target);
            visitor.visit_expr(iter);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            visitor.visit_expr(test);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::Raise { exc, cause } => {
            if let Some(exc) = exc {
                visitor.visit_expr(exc);
            }
            if let Some(cause) = cause {
                visitor.visit_expr(cause);
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            walk_body(visitor, body);
            for handler in handlers {
                visitor.visit_handler(handler);
            }
            walk_body(visitor, orelse);
            walk_body(visitor, finalbody);
        }
        StmtKind::Assert { test, msg } => {
            visitor.visit_expr(test);
            if let Some(msg) = msg {
                visitor.visit_expr(msg);
            }
        }
        StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => {
            for alias in names {
                visitor.visit_alias(alias);
            }
        }
        StmtKind::Expr(value) => visitor.visit_expr(value),
        StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::BoolOp { values, .. } => {
            for value in values {
                visitor.visit_expr(value);
            }
        }
        ExprKind::BinOp { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::UnaryOp { operand, .. } => visitor.visit_expr(operand),
        ExprKind::Lambda { params, body } => {
            visitor.visit_params(params);
            visitor.visit_expr(body);
        }
        ExprKind::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        ExprKind::Dict { keys, values } => {
            for (key, value) in keys.iter().zip(values) {
                visitor.visit_expr(key);
                visitor.visit_expr(value);
            }
        }
        ExprKind::ListComp { elt, generators } => {
            for generator in generators {
                visitor.visit_expr(&generator.iter);
                visitor.visit_expr(&generator.target);
                for cond in &generator.ifs {
                    visitor.visit_expr(cond);
                }
            }
            visitor.visit_expr(elt);
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            visitor.visit_expr(left);
            for comparator in comparators {
                visitor.visit_expr(comparator);
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            visitor.visit_expr(func);
            for arg in args {
                visitor.visit_expr(arg);
            }
            for keyword in keywords {
                visitor.visit_expr(&keyword.value);
            }
        }
        ExprKind::FormattedString(parts) => {
            for part in parts {
                if let FStringPart::Value { value, .. } = part {
                    visitor.visit_expr(value);
                }
            }
        }
        ExprKind::Attribute { value, .. } => visitor.visit_expr(value),
        ExprKind::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        ExprKind::Starred(value) => visitor.visit_expr(value),
        ExprKind::List(elts) | ExprKind::Tuple(elts) => {
            for elt in elts {
                visitor.visit_expr(elt);
            }
        }
        ExprKind::Constant(_) | ExprKind::Name(_) => {}
    }
}

/// Mutable counterpart of [`Visitor`], used by location backfilling.
pub trait VisitorMut {
    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        walk_stmt_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
    }

    fn visit_handler_mut(&mut self, handler: &mut ExceptHandler) {
        walk_handler_mut(self, handler);
    }

    fn visit_alias_mut(&mut self, _alias: &mut Alias) {}

    fn visit_param_mut(&mut self, param: &mut Param) {
        if let Some(default) = &mut param.default {
            self.visit_expr_mut(default);
        }
    }

    fn visit_keyword_mut(&mut self, keyword: &mut Keyword) {
        self.visit_expr_mut(&mut keyword.value);
    }
}

pub fn walk_body_mut<V: VisitorMut + ?Sized>(visitor: &mut V, body: &mut [Stmt]) {
    for stmt in body {
        visitor.visit_stmt_mut(stmt);
    }
}

pub fn walk_handler_mut<V: VisitorMut + ?Sized>(visitor: &mut V, handler: &mut ExceptHandler) {
    if let Some(class) = &mut handler.class {
        visitor.visit_expr_mut(class);
    }
    walk_body_mut(visitor, &mut handler.body);
}

fn walk_params_mut<V: VisitorMut + ?Sized>(visitor: &mut V, params: &mut Parameters) {
    for param in params.iter_mut() {
        visitor.visit_param_mut(param);
    }
}

pub fn walk_stmt_mut<V: VisitorMut + ?Sized>(visitor: &mut V, stmt: &mut Stmt) {
    match &mut stmt.kind {
        StmtKind::FunctionDef(def) => {
            for decorator in &mut def.decorators {
                visitor.visit_expr_mut(decorator);
            }
            walk_params_mut(visitor, &mut def.params);
            walk_body_mut(visitor, &mut def.body);
        }
        StmtKind::ClassDef(def) => {
            for decorator in &mut def.decorators {
                visitor.visit_expr_mut(decorator);
            }
            for base in &mut def.bases {
                visitor.visit_expr_mut(base);
            }
            walk_body_mut(visitor, &mut def.body);
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr_mut(value);
            }
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                visitor.visit_expr_mut(target);
            }
        }
        StmtKind::Assign { targets, value } => {
            for target in targets {
                visitor.visit_expr_mut(target);
            }
            visitor.visit_expr_mut(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr_mut(target);
            visitor.visit_expr_mut(value);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            visitor.visit_expr_mut(target);
            visitor.visit_expr_mut(iter);
            walk_body_mut(visitor, body);
            walk_body_mut(visitor, orelse);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            visitor.visit_expr_mut(test);
            walk_body_mut(visitor, body);
            walk_body_mut(visitor, orelse);
        }
        StmtKind::Raise { exc, cause } => {
            if let Some(exc) = exc {
                visitor.visit_expr_mut(exc);
            }
            if let Some(cause) = cause {
                visitor.visit_expr_mut(cause);
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            walk_body_mut(visitor, body);
            for handler in handlers {
                visitor.visit_handler_mut(handler);
            }
            walk_body_mut(visitor, orelse);
            walk_body_mut(visitor, finalbody);
        }
        StmtKind::Assert { test, msg } => {
            visitor.visit_expr_mut(test);
            if let Some(msg) = msg {
                visitor.visit_expr_mut(msg);
            }
        }
        StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => {
            for alias in names {
                visitor.visit_alias_mut(alias);
            }
        }
        StmtKind::Expr(value) => visitor.visit_expr_mut(value),
        StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

pub fn walk_expr_mut<V: VisitorMut + ?Sized>(visitor: &mut V, expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::BoolOp { values, .. } => {
            for value in values {
                visitor.visit_expr_mut(value);
            }
        }
        ExprKind::BinOp { left, right, .. } => {
            visitor.visit_expr_mut(left);
            visitor.visit_expr_mut(right);
        }
        ExprKind::UnaryOp { operand, .. } => visitor.visit_expr_mut(operand),
        ExprKind::Lambda { params, body } => {
            walk_params_mut(visitor, params);
            visitor.visit_expr_mut(body);
        }
        ExprKind::IfExp { test, body, orelse } => {
            visitor.visit_expr_mut(test);
            visitor.visit_expr_mut(body);
            visitor.visit_expr_mut(orelse);
        }
        ExprKind::Dict { keys, values } => {
            for key in keys {
                visitor.visit_expr_mut(key);
            }
            for value in values {
                visitor.visit_expr_mut(value);
            }
        }
        ExprKind::ListComp { elt, generators } => {
            for generator in generators {
                visitor.visit_expr_mut(&mut generator.iter);
                visitor.visit_expr_mut(&mut generator.target);
                for cond in &mut generator.ifs {
                    visitor.visit_expr_mut(cond);
                }
            }
            visitor.visit_expr_mut(elt);
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            visitor.visit_expr_mut(left);
            for comparator in comparators {
                visitor.visit_expr_mut(comparator);
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            visitor.visit_expr_mut(func);
            for arg in args {
                visitor.visit_expr_mut(arg);
            }
            for keyword in keywords {
                visitor.visit_keyword_mut(keyword);
            }
        }
        ExprKind::FormattedString(parts) => {
            for part in parts {
                if let FStringPart::Value { value, .. } = part {
                    visitor.visit_expr_mut(value);
                }
            }
        }
        ExprKind::Attribute { value, .. } => visitor.visit_expr_mut(value),
        ExprKind::Subscript { value, index } => {
            visitor.visit_expr_mut(value);
            visitor.visit_expr_mut(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr_mut(part);
            }
        }
        ExprKind::Starred(value) => visitor.visit_expr_mut(value),
        ExprKind::List(elts) | ExprKind::Tuple(elts) => {
            for elt in elts {
                visitor.visit_expr_mut(elt);
            }
        }
        ExprKind::Constant(_) | ExprKind::Name(_) => {}
    }
}
