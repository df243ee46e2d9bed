// Statement execution and expression evaluation

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::exceptions::{ExcKind, RaisedException, RuntimeError};
use super::value::{Args, BoundMethod, Class, Env, Function, FunctionBody, Value};
use super::{builtins, Interpreter, Locals, RtResult, Scope};
use crate::analysis::LocalScope;
use crate::ast::{
    BoolOp, ClassDef, Comprehension, Constant, ExceptHandler, Expr, ExprKind, FStringPart, FunctionDef, Keyword,
    Stmt, StmtKind,
};
use crate::error::ImportError;

/// How a statement left its block
pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub(crate) fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::str(s),
    }
}

impl Interpreter {
    pub(crate) fn exec_block(&mut self, body: &[Stmt], scope: &Scope) -> RtResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> RtResult<Flow> {
        // declarations are not executed, so they report no line
        let declaration = matches!(stmt.kind, StmtKind::Global(_) | StmtKind::Nonlocal(_));
        if let (Some(line), false) = (stmt.line(), declaration) {
            self.set_line(line);
            self.trace_line(scope, line);
        }
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let decorators = self.eval_all(&def.decorators, scope)?;
                let func = self.make_function(def, stmt.line().unwrap_or(0), scope)?;
                let value = self.decorate(func, decorators)?;
                self.store_name(&def.name, value, scope)?;
            }
            StmtKind::ClassDef(def) => self.exec_class_def(def, scope)?,
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete_target(target, scope)?;
                }
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.exec_aug_assign(target, *op, value, scope)?,
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => return self.exec_for(target, iter, body, orelse, scope),
            StmtKind::While { test, body, orelse } => {
                loop {
                    let condition = self.eval(test, scope)?;
                    if !self.truthy(&condition)? {
                        return self.exec_block(orelse, scope);
                    }
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::If { test, body, orelse } => {
                let condition = self.eval(test, scope)?;
                return if self.truthy(&condition)? {
                    self.exec_block(body, scope)
                } else {
                    self.exec_block(orelse, scope)
                };
            }
            StmtKind::Raise { exc, cause } => return Err(self.exec_raise(exc.as_ref(), cause.as_ref(), scope)),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let result = match self.exec_block(body, scope) {
                    Ok(Flow::Normal) => self.exec_block(orelse, scope),
                    Err(RuntimeError::Raised(exc)) => self.handle_exception(exc, handlers, scope),
                    other => other,
                };
                if finalbody.is_empty() {
                    return result;
                }
                return match self.exec_block(finalbody, scope)? {
                    Flow::Normal => result,
                    flow => Ok(flow),
                };
            }
            StmtKind::Assert { test, msg } => {
                let condition = self.eval(test, scope)?;
                if !self.truthy(&condition)? {
                    let args = match msg {
                        Some(msg) => vec![self.eval(msg, scope)?],
                        None => Vec::new(),
                    };
                    let class = Value::Class(self.exc_class(ExcKind::AssertionError));
                    let exc = self.call(&class, Args::new(args))?;
                    return Err(self.raise_value(exc, None));
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import_module(&alias.name)?;
                    let bound = match &alias.asname {
                        Some(_) => module,
                        None => {
                            let top = alias.bound_name();
                            self.module(top).unwrap_or(module)
                        }
                    };
                    self.store_name(alias.bound_name(), Value::Module(bound), scope)?;
                }
            }
            StmtKind::ImportFrom { module, names } => {
                if module.starts_with('.') {
                    return Err(self.import_failure(ImportError::Relative));
                }
                let source = self.import_module(module)?;
                for alias in names {
                    if alias.name == "*" {
                        for (name, value) in self.public_names(&source) {
                            self.store_name(&name, value, scope)?;
                        }
                        continue;
                    }
                    let value = self.import_from(&source, &alias.name)?;
                    self.store_name(alias.bound_name(), value, scope)?;
                }
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) | StmtKind::Pass => {}
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn exec_for(&mut self, target: &Expr, iter: &Expr, body: &[Stmt], orelse: &[Stmt], scope: &Scope) -> RtResult<Flow> {
        let iterable = self.eval(iter, scope)?;
        let items = match &iterable {
            Value::Range(_) => None,
            other => Some(self.iterate(other)?),
        };
        let mut index = 0;
        loop {
            let item = match (&items, &iterable) {
                (Some(items), _) => items.get(index).cloned(),
                (None, Value::Range(range)) => range.get(index).map(Value::Int),
                _ => None,
            };
            let Some(item) = item else {
                return self.exec_block(orelse, scope);
            };
            index += 1;
            self.assign(target, item, scope)?;
            match self.exec_block(body, scope)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
    }

    fn exec_aug_assign(&mut self, target: &Expr, op: crate::ast::BinOp, value: &Expr, scope: &Scope) -> RtResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.load_name(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.inplace_op(op, &current, &rhs)?;
                self.store_name(name, updated, scope)
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                let current = self.get_attr(&object, attr)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.inplace_op(op, &current, &rhs)?;
                self.set_attr(&object, attr, updated)
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.inplace_op(op, &current, &rhs)?;
                self.set_item(&object, &index, updated)
            }
            _ => Err(self.error(ExcKind::SyntaxError, "illegal expression for augmented assignment")),
        }
    }

    /// `list += iterable` extends in place; everything else rebinds
    fn inplace_op(&mut self, op: crate::ast::BinOp, current: &Value, rhs: &Value) -> RtResult<Value> {
        if let (crate::ast::BinOp::Add, Value::List(items)) = (op, current) {
            let extra = self.iterate(rhs)?;
            items.borrow_mut().extend(extra);
            return Ok(current.clone());
        }
        self.binary_op(op, current, rhs)
    }

    fn exec_raise(&mut self, exc: Option<&Expr>, cause: Option<&Expr>, scope: &Scope) -> RuntimeError {
        let Some(exc) = exc else {
            return match self.handling.last() {
                Some((value, traceback)) => RuntimeError::Raised(Box::new(RaisedException {
                    value: value.clone(),
                    traceback: traceback.clone(),
                })),
                None => self.error(ExcKind::RuntimeError, "No active exception to reraise"),
            };
        };
        let value = match self.eval(exc, scope) {
            Ok(value) => value,
            Err(err) => return err,
        };
        let cause = match cause.map(|cause| self.eval(cause, scope)).transpose() {
            Ok(cause) => cause,
            Err(err) => return err,
        };
        self.raise_value(value, cause)
    }

    /// Turn a raised value into an error, instantiating bare classes
    fn raise_value(&mut self, value: Value, cause: Option<Value>) -> RuntimeError {
        let instance = match self.exception_instance(value) {
            Ok(instance) => instance,
            Err(err) => return err,
        };
        match cause {
            Some(Value::None) => {
                instance.dict.borrow_mut().insert("__cause__".to_string(), Value::None);
            }
            Some(cause) => match self.exception_instance(cause) {
                Ok(cause) => {
                    instance
                        .dict
                        .borrow_mut()
                        .insert("__cause__".to_string(), Value::Instance(cause));
                }
                Err(err) => return err,
            },
            None => {}
        }
        RuntimeError::Raised(Box::new(RaisedException::new(instance)))
    }

    fn exception_instance(&mut self, value: Value) -> RtResult<Rc<super::value::Instance>> {
        match value {
            Value::Class(class) if self.is_exception_class(&class) => match self.call(&Value::Class(class), Args::default())? {
                Value::Instance(instance) => Ok(instance),
                _ => Err(self.error(ExcKind::TypeError, "exceptions must derive from BaseException")),
            },
            Value::Instance(instance) if self.is_exception_class(&instance.class) => Ok(instance),
            _ => Err(self.error(ExcKind::TypeError, "exceptions must derive from BaseException")),
        }
    }

    fn handle_exception(
        &mut self,
        exc: Box<RaisedException>,
        handlers: &[ExceptHandler],
        scope: &Scope,
    ) -> RtResult<Flow> {
        for handler in handlers {
            let matched = match &handler.class {
                None => true,
                Some(class) => {
                    let class = self.eval(class, scope)?;
                    self.exception_matches(&exc, &class)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(line) = handler.loc.map(|l| l.line) {
                self.set_line(line);
            }
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Instance(exc.value.clone()), scope)?;
            }
            self.handling.push((exc.value.clone(), exc.traceback.clone()));
            let result = self.exec_block(&handler.body, scope);
            self.handling.pop();
            if let Some(name) = &handler.name {
                let _ = self.delete_name(name, scope);
            }
            return result;
        }
        Err(RuntimeError::Raised(exc))
    }

    fn exception_matches(&mut self, exc: &RaisedException, class: &Value) -> RtResult<bool> {
        match class {
            Value::Class(class) if self.is_exception_class(class) => Ok(exc.value.class.is_subclass(class)),
            Value::Tuple(classes) => {
                for class in classes.iter() {
                    if self.exception_matches(exc, class)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(self.error(
                ExcKind::TypeError,
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }

    fn make_function(&mut self, def: &FunctionDef, line: u32, scope: &Scope) -> RtResult<Value> {
        let (defaults, kw_defaults) = self.eval_defaults(&def.params, scope)?;
        let filename = self.current_filename();
        let func = Function {
            name: def.name.clone(),
            qualname: self.qualname(&def.name, scope),
            filename,
            line,
            params: def.params.clone(),
            defaults,
            kw_defaults,
            body: FunctionBody::Block(Rc::from(def.body.clone())),
            scope: Rc::new(LocalScope::of_function(&def.params, &def.body)),
            globals: scope.module.clone(),
            closure: scope.closure(),
        };
        Ok(Value::Function(Rc::new(func)))
    }

    fn qualname(&self, name: &str, scope: &Scope) -> String {
        match &scope.locals {
            Locals::Class { ns, .. } => match ns.borrow().get("__qualname__") {
                Some(Value::Str(class)) => format!("{class}.{name}"),
                _ => name.to_string(),
            },
            _ => name.to_string(),
        }
    }

    fn current_filename(&self) -> Rc<str> {
        self.frames
            .last()
            .map(|frame| frame.filename.clone())
            .unwrap_or_else(|| Rc::from("<unknown>"))
    }

    fn eval_defaults(
        &mut self,
        params: &crate::ast::Parameters,
        scope: &Scope,
    ) -> RtResult<(Vec<Option<Value>>, Vec<Option<Value>>)> {
        let mut defaults = Vec::with_capacity(params.args.len());
        for param in &params.args {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        let mut kw_defaults = Vec::with_capacity(params.kwonly.len());
        for param in &params.kwonly {
            kw_defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        Ok((defaults, kw_defaults))
    }

    fn decorate(&mut self, mut value: Value, decorators: Vec<Value>) -> RtResult<Value> {
        for decorator in decorators.iter().rev() {
            value = self.call(decorator, Args::new(vec![value]))?;
        }
        Ok(value)
    }

    fn exec_class_def(&mut self, def: &ClassDef, scope: &Scope) -> RtResult<()> {
        let decorators = self.eval_all(&def.decorators, scope)?;
        let mut bases = Vec::new();
        for base in self.eval_all(&def.bases, scope)? {
            match base {
                Value::Class(class) => bases.push(class),
                other => {
                    return Err(self.error(
                        ExcKind::TypeError,
                        format!("bases must be classes, not '{}'", other.type_name()),
                    ))
                }
            }
        }
        let ns = Rc::new(RefCell::new(IndexMap::new()));
        ns.borrow_mut()
            .insert("__module__".to_string(), Value::str(&scope.module.name));
        ns.borrow_mut()
            .insert("__qualname__".to_string(), Value::str(self.qualname(&def.name, scope)));
        let body_scope = Scope {
            module: scope.module.clone(),
            locals: Locals::Class {
                ns: ns.clone(),
                env: scope.closure(),
            },
        };
        self.exec_block(&def.body, &body_scope)?;
        let mut class = Class::new(def.name.clone(), scope.module.name.clone(), bases);
        class.dict = RefCell::new(ns.take());
        let value = self.decorate(Value::Class(Rc::new(class)), decorators)?;
        self.store_name(&def.name, value, scope)
    }

    fn eval_all(&mut self, exprs: &[Expr], scope: &Scope) -> RtResult<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr, scope)).collect()
    }

    // -- names --

    fn load_global(&self, name: &str, module: &super::ModuleObject) -> RtResult<Value> {
        module
            .get(name)
            .or_else(|| self.builtins.get(name))
            .ok_or_else(|| self.error(ExcKind::NameError, format!("name '{name}' is not defined")))
    }

    fn load_name(&mut self, name: &str, scope: &Scope) -> RtResult<Value> {
        match &scope.locals {
            Locals::Module => self.load_global(name, &scope.module),
            Locals::Function { env, decls } => {
                if decls.globals.contains(name) {
                    return self.load_global(name, &scope.module);
                }
                if let Some(cell) = env.cells.get(name) {
                    return cell.borrow().clone().ok_or_else(|| {
                        self.error(
                            ExcKind::UnboundLocalError,
                            format!("cannot access local variable '{name}' where it is not associated with a value"),
                        )
                    });
                }
                self.load_enclosing(name, env, scope)
            }
            Locals::Class { ns, env } => {
                if let Some(value) = ns.borrow().get(name) {
                    return Ok(value.clone());
                }
                match env {
                    Some(env) => match env.cells.get(name) {
                        Some(cell) => match cell.borrow().clone() {
                            Some(value) => Ok(value),
                            None => self.load_global(name, &scope.module),
                        },
                        None => self.load_enclosing(name, env, scope),
                    },
                    None => self.load_global(name, &scope.module),
                }
            }
        }
    }

    fn load_enclosing(&self, name: &str, env: &Env, scope: &Scope) -> RtResult<Value> {
        match env.enclosing(name) {
            Some(cell) => cell.borrow().clone().ok_or_else(|| {
                self.error(
                    ExcKind::NameError,
                    format!(
                        "cannot access free variable '{name}' where it is not associated with a value in enclosing scope"
                    ),
                )
            }),
            None => self.load_global(name, &scope.module),
        }
    }

    pub(crate) fn store_name(&mut self, name: &str, value: Value, scope: &Scope) -> RtResult<()> {
        match &scope.locals {
            Locals::Module => scope.module.set(name, value),
            Locals::Function { env, decls } => {
                if decls.globals.contains(name) {
                    scope.module.set(name, value);
                } else if let Some(cell) = env.cells.get(name) {
                    *cell.borrow_mut() = Some(value);
                } else if let Some(cell) = env.enclosing(name) {
                    *cell.borrow_mut() = Some(value);
                } else {
                    scope.module.set(name, value);
                }
            }
            Locals::Class { ns, .. } => {
                ns.borrow_mut().insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    fn delete_name(&mut self, name: &str, scope: &Scope) -> RtResult<()> {
        let not_defined = || self.error(ExcKind::NameError, format!("name '{name}' is not defined"));
        match &scope.locals {
            Locals::Module => scope.module.remove(name).map(|_| ()).ok_or_else(not_defined),
            Locals::Function { env, decls } => {
                let cell = if decls.globals.contains(name) {
                    return scope.module.remove(name).map(|_| ()).ok_or_else(not_defined);
                } else {
                    env.cells.get(name).cloned().or_else(|| env.enclosing(name))
                };
                match cell {
                    Some(cell) if cell.borrow().is_some() => {
                        *cell.borrow_mut() = None;
                        Ok(())
                    }
                    _ => Err(self.error(
                        ExcKind::UnboundLocalError,
                        format!("cannot access local variable '{name}' where it is not associated with a value"),
                    )),
                }
            }
            Locals::Class { ns, .. } => ns.borrow_mut().shift_remove(name).map(|_| ()).ok_or_else(not_defined),
        }
    }

    // -- targets --

    pub(crate) fn assign(&mut self, target: &Expr, value: Value, scope: &Scope) -> RtResult<()> {
        match &target.kind {
            ExprKind::Name(name) => self.store_name(name, value, scope),
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                self.set_attr(&object, attr, value)
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval(object, scope)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let (lower, upper, step) = self.slice_bounds(lower, upper, step, scope)?;
                    return self.set_slice(&object, lower, upper, step, value);
                }
                let index = self.eval(index, scope)?;
                self.set_item(&object, &index, value)
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                let items = self.iterate(&value)?;
                self.unpack(elts, items, scope)
            }
            _ => Err(self.error(ExcKind::SyntaxError, "cannot assign to expression")),
        }
    }

    fn unpack(&mut self, targets: &[Expr], items: Vec<Value>, scope: &Scope) -> RtResult<()> {
        let star = targets.iter().position(|t| matches!(t.kind, ExprKind::Starred(_)));
        match star {
            None => {
                if items.len() > targets.len() {
                    return Err(self.error(
                        ExcKind::ValueError,
                        format!("too many values to unpack (expected {})", targets.len()),
                    ));
                }
                if items.len() < targets.len() {
                    return Err(self.error(
                        ExcKind::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                    ));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    return Err(self.error(
                        ExcKind::ValueError,
                        format!(
                            "not enough values to unpack (expected at least {}, got {})",
                            targets.len() - 1,
                            items.len()
                        ),
                    ));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                if let ExprKind::Starred(inner) = &targets[star].kind {
                    self.assign(inner, Value::list(middle), scope)?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
        }
    }

    fn set_slice(&mut self, object: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>, value: Value) -> RtResult<()> {
        let Value::List(items) = object else {
            return Err(self.error(
                ExcKind::TypeError,
                format!("'{}' object does not support slice assignment", object.type_name()),
            ));
        };
        if step.unwrap_or(1) != 1 {
            return Err(self.error(ExcKind::ValueError, "extended slice assignment is not supported"));
        }
        let replacement = self.iterate(&value)?;
        let len = items.borrow().len();
        let picked = super::ops::slice_indices(len, lower, upper, 1);
        let start = picked.first().copied().unwrap_or_else(|| {
            let lower = lower.unwrap_or(0);
            let lower = if lower < 0 { lower + len as i64 } else { lower };
            lower.clamp(0, len as i64) as usize
        });
        let end = picked.last().map_or(start, |last| last + 1);
        items.borrow_mut().splice(start..end, replacement);
        Ok(())
    }

    fn delete_target(&mut self, target: &Expr, scope: &Scope) -> RtResult<()> {
        match &target.kind {
            ExprKind::Name(name) => self.delete_name(name, scope),
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, scope)?;
                self.del_attr(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value, scope)?;
                let index = self.eval(index, scope)?;
                self.del_item(&object, &index)
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                for elt in elts {
                    self.delete_target(elt, scope)?;
                }
                Ok(())
            }
            _ => Err(self.error(ExcKind::SyntaxError, "cannot delete expression")),
        }
    }

    // -- attributes --

    pub fn get_attr(&mut self, object: &Value, name: &str) -> RtResult<Value> {
        let missing = |interp: &Self, owner: String| {
            interp.error(ExcKind::AttributeError, format!("{owner} has no attribute '{name}'"))
        };
        match object {
            Value::Instance(instance) => {
                if let Some(value) = instance.dict.borrow().get(name) {
                    return Ok(value.clone());
                }
                if name == "__class__" {
                    return Ok(Value::Class(instance.class.clone()));
                }
                match instance.class.lookup(name) {
                    Some(method @ (Value::Function(_) | Value::Traced(_))) => {
                        Ok(Value::BoundMethod(Rc::new(BoundMethod {
                            receiver: object.clone(),
                            func: method,
                        })))
                    }
                    Some(value) => Ok(value),
                    None => Err(missing(self, format!("'{}' object", instance.class.name))),
                }
            }
            Value::Class(class) => match name {
                "__name__" => Ok(Value::str(&class.name)),
                "__bases__" => Ok(Value::tuple(class.bases.iter().cloned().map(Value::Class).collect())),
                _ => class
                    .lookup(name)
                    .ok_or_else(|| missing(self, format!("type object '{}'", class.name))),
            },
            Value::Module(module) => module
                .get(name)
                .ok_or_else(|| missing(self, format!("module '{}'", module.name))),
            Value::Function(func) => match name {
                "__name__" => Ok(Value::str(&func.name)),
                "__qualname__" => Ok(Value::str(&func.qualname)),
                "__module__" => Ok(Value::str(&func.globals.name)),
                _ => Err(missing(self, "'function' object".to_string())),
            },
            Value::Builtin(builtin) if name == "__name__" => Ok(Value::str(&builtin.name)),
            Value::Traced(traced) => match name {
                "__wrapped__" => Ok(traced.func.clone()),
                _ => {
                    let inner = traced.func.clone();
                    self.get_attr(&inner, name)
                }
            },
            other => builtins::method(object, name)
                .ok_or_else(|| missing(self, format!("'{}' object", other.type_name()))),
        }
    }

    pub fn set_attr(&mut self, object: &Value, name: &str, value: Value) -> RtResult<()> {
        match object {
            Value::Instance(instance) => {
                instance.dict.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.dict.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Module(module) => {
                module.set(name, value);
                Ok(())
            }
            other => Err(self.error(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{}'", other.type_name(), name),
            )),
        }
    }

    fn del_attr(&mut self, object: &Value, name: &str) -> RtResult<()> {
        let removed = match object {
            Value::Instance(instance) => instance.dict.borrow_mut().shift_remove(name),
            Value::Class(class) => class.dict.borrow_mut().shift_remove(name),
            Value::Module(module) => module.remove(name),
            _ => None,
        };
        removed.map(|_| ()).ok_or_else(|| {
            self.error(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{}'", object.type_name(), name),
            )
        })
    }

    // -- expressions --

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Scope) -> RtResult<Value> {
        if self.expr_trace_active() {
            return self.eval_recorded(expr, scope);
        }
        self.eval_node(expr, scope)
    }

    pub(crate) fn eval_node(&mut self, expr: &Expr, scope: &Scope) -> RtResult<Value> {
        match &expr.kind {
            ExprKind::BoolOp { op, values } => {
                let mut result = Value::None;
                for value in values {
                    result = self.eval(value, scope)?;
                    let truthy = self.truthy(&result)?;
                    match op {
                        BoolOp::And if !truthy => break,
                        BoolOp::Or if truthy => break,
                        _ => {}
                    }
                }
                Ok(result)
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary_op(*op, &left, &right)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval(operand, scope)?;
                self.unary_op(*op, &operand)
            }
            ExprKind::Lambda { params, body } => {
                let (defaults, kw_defaults) = self.eval_defaults(params, scope)?;
                let func = Function {
                    name: "<lambda>".to_string(),
                    qualname: "<lambda>".to_string(),
                    filename: self.current_filename(),
                    line: expr.loc.map_or(0, |l| l.line),
                    params: (**params).clone(),
                    defaults,
                    kw_defaults,
                    body: FunctionBody::Lambda(Rc::new((**body).clone())),
                    scope: Rc::new(LocalScope::of_lambda(params)),
                    globals: scope.module.clone(),
                    closure: scope.closure(),
                };
                Ok(Value::Function(Rc::new(func)))
            }
            ExprKind::IfExp { test, body, orelse } => {
                let condition = self.eval(test, scope)?;
                if self.truthy(&condition)? {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            ExprKind::Dict { keys, values } => {
                let mut pairs = Vec::with_capacity(keys.len());
                for (key, value) in keys.iter().zip(values) {
                    let key = self.eval(key, scope)?;
                    let value = self.eval(value, scope)?;
                    pairs.push((key, value));
                }
                let dict = self.dict_from_pairs(pairs)?;
                Ok(Value::dict(dict))
            }
            ExprKind::ListComp { elt, generators } => self.eval_list_comp(elt, generators, scope),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut left = self.eval(left, scope)?;
                for (op, comparator) in ops.iter().zip(comparators) {
                    let right = self.eval(comparator, scope)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Call { func, args, keywords } => {
                let callee = self.eval(func, scope)?;
                let args = self.eval_args(args, keywords, scope)?;
                self.call(&callee, args)
            }
            ExprKind::FormattedString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Value {
                            value,
                            conversion,
                            format_spec,
                        } => {
                            let mut value = self.eval(value, scope)?;
                            match conversion {
                                Some('r') | Some('a') => value = Value::str(self.repr(&value)?),
                                Some('s') => value = Value::str(self.str(&value)?),
                                _ => {}
                            }
                            let text = self.format_value(&value, format_spec.as_deref().unwrap_or(""))?;
                            out.push_str(&text);
                        }
                    }
                }
                Ok(Value::str(out))
            }
            ExprKind::Constant(constant) => Ok(constant_value(constant)),
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, scope)?;
                self.get_attr(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value, scope)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let (lower, upper, step) = self.slice_bounds(lower, upper, step, scope)?;
                    return self.get_slice(&object, lower, upper, step);
                }
                let index = self.eval(index, scope)?;
                self.get_item(&object, &index)
            }
            ExprKind::Slice { .. } => Err(self.error(ExcKind::SyntaxError, "slice outside of a subscript")),
            ExprKind::Starred(_) => Err(self.error(ExcKind::SyntaxError, "can't use starred expression here")),
            ExprKind::Name(name) => self.load_name(name, scope),
            ExprKind::List(elts) => Ok(Value::list(self.eval_elements(elts, scope)?)),
            ExprKind::Tuple(elts) => Ok(Value::tuple(self.eval_elements(elts, scope)?)),
        }
    }

    fn slice_bounds(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
        scope: &Scope,
    ) -> RtResult<(Option<i64>, Option<i64>, Option<i64>)> {
        let mut bound = |expr: &Option<Box<Expr>>| -> RtResult<Option<i64>> {
            let Some(expr) = expr else {
                return Ok(None);
            };
            match self.eval(expr, scope)? {
                Value::None => Ok(None),
                value => value.as_int().map(Some).ok_or_else(|| {
                    self.error(
                        ExcKind::TypeError,
                        "slice indices must be integers or None",
                    )
                }),
            }
        };
        Ok((bound(lower)?, bound(upper)?, bound(step)?))
    }

    /// Display elements with `*iterable` expansion
    fn eval_elements(&mut self, elts: &[Expr], scope: &Scope) -> RtResult<Vec<Value>> {
        let mut items = Vec::with_capacity(elts.len());
        for elt in elts {
            match &elt.kind {
                ExprKind::Starred(inner) => {
                    let iterable = self.eval(inner, scope)?;
                    items.extend(self.iterate(&iterable)?);
                }
                _ => items.push(self.eval(elt, scope)?),
            }
        }
        Ok(items)
    }

    fn eval_args(&mut self, args: &[Expr], keywords: &[Keyword], scope: &Scope) -> RtResult<Args> {
        let positional = self.eval_elements(args, scope)?;
        let mut named = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let value = self.eval(&keyword.value, scope)?;
            match &keyword.arg {
                Some(name) => named.push((name.clone(), value)),
                None => {
                    let Value::Dict(dict) = &value else {
                        return Err(self.error(
                            ExcKind::TypeError,
                            format!("argument after ** must be a mapping, not {}", value.type_name()),
                        ));
                    };
                    for (key, item) in dict.borrow().items() {
                        let Value::Str(key) = key else {
                            return Err(self.error(ExcKind::TypeError, "keywords must be strings"));
                        };
                        named.push((key.to_string(), item));
                    }
                }
            }
        }
        Ok(Args {
            positional,
            keywords: named,
        })
    }

    fn eval_list_comp(&mut self, elt: &Expr, generators: &[Comprehension], scope: &Scope) -> RtResult<Value> {
        let Some(first) = generators.first() else {
            return Ok(Value::list(Vec::new()));
        };
        let outer = self.eval(&first.iter, scope)?;
        let decls = Rc::new(LocalScope::of_comprehension(generators));
        let env = Rc::new(Env::new(decls.locals.iter().cloned(), scope.closure()));
        let inner = Scope {
            module: scope.module.clone(),
            locals: Locals::Function { env, decls },
        };
        let mut out = Vec::new();
        self.comprehend(elt, generators, Some(outer), &inner, &mut out)?;
        Ok(Value::list(out))
    }

    fn comprehend(
        &mut self,
        elt: &Expr,
        generators: &[Comprehension],
        iterable: Option<Value>,
        scope: &Scope,
        out: &mut Vec<Value>,
    ) -> RtResult<()> {
        let Some((generator, rest)) = generators.split_first() else {
            out.push(self.eval(elt, scope)?);
            return Ok(());
        };
        let iterable = match iterable {
            Some(value) => value,
            None => self.eval(&generator.iter, scope)?,
        };
        'items: for item in self.iterate(&iterable)? {
            self.assign(&generator.target, item, scope)?;
            for condition in &generator.ifs {
                let keep = self.eval(condition, scope)?;
                if !self.truthy(&keep)? {
                    continue 'items;
                }
            }
            self.comprehend(elt, rest, None, scope, out)?;
        }
        Ok(())
    }

    /// Names `from module import *` binds
    fn public_names(&mut self, module: &super::ModuleObject) -> Vec<(String, Value)> {
        let dict = module.dict.borrow();
        if let Some(Value::List(all)) = dict.get("__all__") {
            return all
                .borrow()
                .iter()
                .filter_map(|name| name.as_str().map(str::to_string))
                .filter_map(|name| dict.get(&name).cloned().map(|value| (name, value)))
                .collect();
        }
        dict.iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::io::SharedBuffer;
    use crate::runtime::{InterpreterConfig, ModuleObject};
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> (String, Result<(), String>) {
        let stdout = SharedBuffer::new();
        let stderr = SharedBuffer::new();
        let mut interp = Interpreter::with_output(InterpreterConfig::default(), stdout.sink(), stderr.sink());
        let module = ModuleObject::new("__main__");
        let result = interp.run_source(source, "test.py", &module).map_err(|e| match e {
            crate::Error::Runtime(err) => err.to_string(),
            other => other.to_string(),
        });
        (stdout.contents(), result)
    }

    fn output(source: &str) -> String {
        let (out, result) = run(source);
        assert!(result.is_ok(), "script failed: {result:?}");
        out
    }

    #[test]
    fn test_arithmetic_and_print() {
        assert_eq!(output("print(1 + 2 * 3, 7 // 2, 7 / 2, 2 ** 10)\n"), "7 3 3.5 1024\n");
    }

    #[test]
    fn test_closures_and_nonlocal() {
        let source = "\
def counter():
    n = 0
    def bump():
        nonlocal n
        n += 1
        return n
    return bump
c = counter()
c()
print(c(), c())
";
        assert_eq!(output(source), "2 3\n");
    }

    #[test]
    fn test_global_declaration() {
        let source = "\
total = 1
def add(x):
    global total
    total = total + x
add(4)
print(total)
";
        assert_eq!(output(source), "5\n");
    }

    #[test]
    fn test_unbound_local() {
        let source = "\
x = 1
def f():
    print(x)
    x = 2
f()
";
        let (_, result) = run(source);
        assert_eq!(
            result.unwrap_err(),
            "UnboundLocalError: cannot access local variable 'x' where it is not associated with a value"
        );
    }

    #[test]
    fn test_try_except_finally() {
        let source = "\
def risky(n):
    try:
        if n == 0:
            raise ValueError('zero')
        return 10 // n
    except ValueError as e:
        print('caught', e)
        return -1
    finally:
        print('done', n)
print(risky(0), risky(5))
";
        assert_eq!(output(source), "caught zero\ndone 0\ndone 5\n-1 2\n");
    }

    #[test]
    fn test_classes_and_methods() {
        let source = "\
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y
    def __repr__(self):
        return f'Point({self.x}, {self.y})'
    def __add__(self, other):
        return Point(self.x + other.x, self.y + other.y)
class Named(Point):
    label = 'n'
p = Named(1, 2) + Point(3, 4)
print(p, Named.label, isinstance(p, Point))
";
        assert_eq!(output(source), "Point(4, 6) n True\n");
    }

    #[test]
    fn test_comprehension_scope() {
        let source = "\
x = 'outer'
squares = [x * x for x in range(5) if x % 2 == 0]
print(squares, x)
pairs = [(a, b) for a in [1, 2] for b in 'ab']
print(pairs)
";
        assert_eq!(
            output(source),
            "[0, 4, 16] outer\n[(1, 'a'), (1, 'b'), (2, 'a'), (2, 'b')]\n"
        );
    }

    #[test]
    fn test_unpacking() {
        let source = "\
a, *rest, z = [1, 2, 3, 4]
print(a, rest, z)
(p, q), r = (1, 2), 3
print(p + q + r)
";
        assert_eq!(output(source), "1 [2, 3] 4\n6\n");
        let (_, result) = run("a, b = [1, 2, 3]\n");
        assert_eq!(result.unwrap_err(), "ValueError: too many values to unpack (expected 2)");
    }

    #[test]
    fn test_while_else_and_break() {
        let source = "\
i = 0
while i < 10:
    i += 1
    if i == 3:
        break
else:
    print('never')
for j in range(2):
    pass
else:
    print('loop done', i, j)
";
        assert_eq!(output(source), "loop done 3 1\n");
    }

    #[test]
    fn test_exception_chaining_and_reraise() {
        let source = "\
try:
    try:
        {}['missing']
    except KeyError:
        raise
except LookupError as e:
    print(type(e).__name__, repr(e))
";
        assert_eq!(output(source), "KeyError KeyError('missing')\n");
    }

    #[test]
    fn test_keyword_arguments() {
        let source = "\
def f(a, b=2, *args, c, **kw):
    return [a, b, args, c, kw]
print(f(1, c=3))
print(f(1, 5, 6, c=0, d=1))
";
        assert_eq!(output(source), "[1, 2, (), 3, {}]\n[1, 5, (6,), 0, {'d': 1}]\n");
        let (_, result) = run("def g(a, b): pass\ng(1)\n");
        assert_eq!(
            result.unwrap_err(),
            "TypeError: g() missing 1 required positional argument: 'b'"
        );
    }

    #[test]
    fn test_name_error() {
        let (_, result) = run("print(undefined_name)\n");
        assert_eq!(result.unwrap_err(), "NameError: name 'undefined_name' is not defined");
    }

    #[test]
    fn test_slices_and_fstrings() {
        let source = "\
xs = [0, 1, 2, 3, 4]
xs[1:3] = ['a']
print(xs, xs[::-1][:2], 'hello'[1:4])
v = 3.14159
s = 'q'
print(f'{v:.2f}|{42:>5}|{s!r}')
";
        assert_eq!(output(source), "[0, 'a', 3, 4] [4, 3] ell\n3.14|   42|'q'\n");
    }
}
