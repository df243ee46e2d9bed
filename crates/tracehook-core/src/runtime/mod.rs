//! Tree-walking interpreter for the tracehook script language.
//!
//! The interpreter owns the module registry, the import hooks the
//! instrumentation chain patches, the call stack and the output streams.
//! Code reaches it as a compiled [`Code`] unit; functions close over
//! reference-counted variable cells, so every object here is `Rc`-based and
//! the interpreter is strictly single-threaded.

pub mod builtins;
mod eval;
pub mod exceptions;
pub mod io;
pub mod ops;
pub mod value;

pub use exceptions::{ExcKind, RaisedException, RuntimeError, TracebackEntry};
pub use io::{SharedBuffer, Sink};
pub use value::{Args, Class, Dict, Env, Function, Instance, Key, ModuleObject, Range, Value};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::analysis::LocalScope;
use crate::ast::{Expr, ToSource};
use crate::compile::{compile, Code};
use crate::error::{Error, ImportError};
use crate::import::cache::BytecodeCache;
use crate::import::{default_path_hooks, PathEntryFinder, PathHook};
use crate::instrument::NAME_TRACE_MODULE_FN;
use crate::interactive::TRACE_BLOCK_PREFIX;
use crate::parser::parse_module;
use crate::tracer::Tracer;
use value::{FunctionBody, Traced};

pub type RtResult<T> = Result<T, RuntimeError>;

pub const DEFAULT_RECURSION_LIMIT: usize = 1000;
pub const VERSION_STRING: &str = concat!("tracehook ", env!("CARGO_PKG_VERSION"));

/// Process-level settings of an interpreter
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub argv: Vec<String>,
    /// Initial `sys.path`
    pub path: Vec<PathBuf>,
    /// Runtime install prefix; its `lib` directory holds bundled modules
    pub prefix: PathBuf,
    pub dont_write_bytecode: bool,
    pub recursion_limit: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        let prefix = default_prefix();
        Self {
            argv: vec![String::new()],
            path: vec![prefix.join("lib")],
            prefix,
            dont_write_bytecode: false,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl InterpreterConfig {
    /// Settings from `TRACEHOOK_PREFIX`, `TRACEHOOK_PATH` and
    /// `TRACEHOOK_DONTWRITEBYTECODE`
    pub fn from_env() -> Self {
        let prefix = std::env::var_os("TRACEHOOK_PREFIX")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_prefix);
        let mut path: Vec<PathBuf> = std::env::var_os("TRACEHOOK_PATH")
            .map(|value| std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or_default();
        path.push(prefix.join("lib"));
        let dont_write_bytecode = std::env::var("TRACEHOOK_DONTWRITEBYTECODE")
            .map(|v| !v.is_empty() && v != "0")
            .unwrap_or(false);
        Self {
            path,
            prefix,
            dont_write_bytecode,
            ..Default::default()
        }
    }

    /// Directories whose modules belong to the runtime itself
    pub fn install_paths(&self) -> Vec<PathBuf> {
        vec![self.prefix.join("lib")]
    }
}

fn default_prefix() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Frames whose names mark instrumentation wrappers rather than user code
pub fn is_synthetic_frame(name: &str) -> bool {
    name == NAME_TRACE_MODULE_FN || name.starts_with(TRACE_BLOCK_PREFIX)
}

/// Per-frame tracing state of a traced call
struct TraceState {
    tracer: Rc<Tracer>,
    /// Frames still traced below this one, counting this one
    remaining: u32,
    level: usize,
    seen: HashMap<String, String>,
}

struct Frame {
    name: String,
    filename: Rc<str>,
    line: u32,
    env: Option<Rc<Env>>,
    trace: Option<TraceState>,
}

/// Recording state of a deep expression trace
struct ExprTrace {
    frame_depth: usize,
    nesting: usize,
    records: Vec<(usize, String, String)>,
}

/// Where names are read and written while executing a block
#[derive(Clone)]
pub(crate) struct Scope {
    pub module: Rc<ModuleObject>,
    pub locals: Locals,
}

#[derive(Clone)]
pub(crate) enum Locals {
    Module,
    Function { env: Rc<Env>, decls: Rc<LocalScope> },
    Class { ns: Rc<value::Namespace>, env: Option<Rc<Env>> },
}

impl Scope {
    pub fn module(module: Rc<ModuleObject>) -> Self {
        Self {
            module,
            locals: Locals::Module,
        }
    }

    /// Env new closures capture
    pub fn closure(&self) -> Option<Rc<Env>> {
        match &self.locals {
            Locals::Module => None,
            Locals::Function { env, .. } => Some(env.clone()),
            Locals::Class { env, .. } => env.clone(),
        }
    }
}

pub struct Interpreter {
    builtins: Rc<ModuleObject>,
    exc_classes: Vec<Rc<Class>>,
    sys: Rc<ModuleObject>,
    modules: IndexMap<String, Rc<ModuleObject>>,
    path_hooks: Vec<PathHook>,
    path_importer_cache: HashMap<PathBuf, Option<Rc<dyn PathEntryFinder>>>,
    cache: BytecodeCache,
    frames: Vec<Frame>,
    linecache: HashMap<String, Rc<Vec<String>>>,
    stdout: Sink,
    stderr: Sink,
    recursion_limit: usize,
    expr_trace: Option<ExprTrace>,
    /// Containers whose repr is being built, for cycle detection
    repr_active: Vec<usize>,
    /// Exceptions being handled by enclosing `except` blocks, innermost last
    handling: Vec<(Rc<Instance>, Vec<TracebackEntry>)>,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self::with_output(config, io::stdout_sink(), io::stderr_sink())
    }

    /// An interpreter printing to the given streams
    pub fn with_output(config: InterpreterConfig, stdout: Sink, stderr: Sink) -> Self {
        let cache = BytecodeCache::new(!config.dont_write_bytecode);
        let mut interp = Self {
            builtins: ModuleObject::new("builtins"),
            exc_classes: Vec::new(),
            sys: ModuleObject::new("sys"),
            modules: IndexMap::new(),
            path_hooks: default_path_hooks(cache.clone()),
            path_importer_cache: HashMap::new(),
            cache,
            frames: Vec::new(),
            linecache: HashMap::new(),
            stdout,
            stderr,
            recursion_limit: config.recursion_limit,
            expr_trace: None,
            repr_active: Vec::new(),
            handling: Vec::new(),
        };
        interp.exc_classes = builtins::exception_classes();
        builtins::install(&interp.builtins, &interp.exc_classes);
        builtins::init_sys(&interp.sys, &config);
        interp.modules.insert("sys".to_string(), interp.sys.clone());
        interp.modules.insert("__main__".to_string(), ModuleObject::new("__main__"));
        debug!(path = ?config.path, prefix = %config.prefix.display(), "interpreter initialized");
        interp
    }

    pub fn stdout(&self) -> &Sink {
        &self.stdout
    }

    pub fn stderr(&self) -> &Sink {
        &self.stderr
    }

    pub fn bytecode_cache(&self) -> &BytecodeCache {
        &self.cache
    }

    // -- module registry and import hooks --

    pub fn modules(&self) -> &IndexMap<String, Rc<ModuleObject>> {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<Rc<ModuleObject>> {
        self.modules.get(name).cloned()
    }

    pub fn main_module(&self) -> Option<Rc<ModuleObject>> {
        self.module("__main__")
    }

    /// Register `module` under `name`, returning what was there before
    pub fn register_module(&mut self, name: &str, module: Rc<ModuleObject>) -> Option<Rc<ModuleObject>> {
        self.modules.insert(name.to_string(), module)
    }

    pub fn remove_module(&mut self, name: &str) -> Option<Rc<ModuleObject>> {
        self.modules.shift_remove(name)
    }

    pub fn path_hooks(&self) -> &[PathHook] {
        &self.path_hooks
    }

    pub fn path_hooks_mut(&mut self) -> &mut Vec<PathHook> {
        &mut self.path_hooks
    }

    pub fn path_importer_cache(&self) -> &HashMap<PathBuf, Option<Rc<dyn PathEntryFinder>>> {
        &self.path_importer_cache
    }

    pub(crate) fn path_importer_cache_mut(&mut self) -> &mut HashMap<PathBuf, Option<Rc<dyn PathEntryFinder>>> {
        &mut self.path_importer_cache
    }

    pub fn clear_path_importer_cache(&mut self) {
        self.path_importer_cache.clear();
    }

    pub fn sys_module(&self) -> &Rc<ModuleObject> {
        &self.sys
    }

    /// Current `sys.path` entries; non-string entries are skipped
    pub fn sys_path(&self) -> Vec<PathBuf> {
        match self.sys.get("path") {
            Some(Value::List(items)) => items
                .borrow()
                .iter()
                .filter_map(|item| item.as_str().map(PathBuf::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `lib` directories under `sys.prefix` and `sys.base_prefix`
    pub fn install_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for key in ["prefix", "base_prefix"] {
            if let Some(prefix) = self.sys.get(key).as_ref().and_then(Value::as_str) {
                let lib = Path::new(prefix).join("lib");
                if !paths.contains(&lib) {
                    paths.push(lib);
                }
            }
        }
        paths
    }

    pub fn prepend_sys_path(&mut self, dir: &Path) {
        let entry = Value::str(dir.to_string_lossy());
        match self.sys.get("path") {
            Some(Value::List(items)) => items.borrow_mut().insert(0, entry),
            _ => self.sys.set("path", Value::list(vec![entry])),
        }
    }

    /// Replace `sys.argv`, returning the previous value
    pub fn swap_argv(&mut self, argv: Value) -> Value {
        let previous = self.sys.get("argv").unwrap_or(Value::None);
        self.sys.set("argv", argv);
        previous
    }

    // -- execution --

    /// Execute a compiled unit in `module`'s namespace
    pub fn exec_code(&mut self, code: &Code, module: &Rc<ModuleObject>) -> RtResult<()> {
        if let Some(source) = &code.source {
            self.cache_lines(&code.filename, source);
        }
        trace!(filename = %code.filename, module = %module.name, "executing code");
        let frame = Frame {
            name: "<module>".to_string(),
            filename: Rc::from(code.filename.as_str()),
            line: 1,
            env: None,
            trace: None,
        };
        let scope = Scope::module(module.clone());
        self.run_frame(frame, |interp| interp.exec_block(&code.module.body, &scope).map(|_| ()))
    }

    /// Parse, compile and execute `source` in `module`
    pub fn run_source(&mut self, source: &str, filename: &str, module: &Rc<ModuleObject>) -> Result<(), Error> {
        let code = compile(parse_module(source, filename)?, filename)?.with_source(source);
        self.exec_code(&code, module)?;
        Ok(())
    }

    /// Evaluate an expression with `module` as globals
    pub fn eval_expression(&mut self, expr: &Expr, module: &Rc<ModuleObject>) -> RtResult<Value> {
        let scope = Scope::module(module.clone());
        self.eval(expr, &scope)
    }

    /// Evaluate `expr`, reporting every non-literal sub-expression and its
    /// value to `tracer`, innermost first
    pub fn eval_traced_expression(
        &mut self,
        expr: &Expr,
        module: &Rc<ModuleObject>,
        tracer: &Tracer,
    ) -> RtResult<Value> {
        self.expr_trace = Some(ExprTrace {
            frame_depth: self.frames.len(),
            nesting: 0,
            records: Vec::new(),
        });
        let result = self.eval_expression(expr, module);
        if let Some(recorded) = self.expr_trace.take() {
            for (nesting, text, repr) in recorded.records {
                tracer.expression(nesting.saturating_sub(1), &text, &repr);
            }
        }
        result
    }

    pub(crate) fn cache_lines(&mut self, filename: &str, source: &str) {
        let lines = source.lines().map(str::to_string).collect();
        self.linecache.insert(filename.to_string(), Rc::new(lines));
    }

    /// Source text of `filename:line`, if known
    pub fn source_line(&self, filename: &str, line: u32) -> Option<String> {
        let lines = self.linecache.get(filename)?;
        lines.get((line as usize).checked_sub(1)?).cloned()
    }

    fn run_frame<T>(&mut self, frame: Frame, body: impl FnOnce(&mut Self) -> RtResult<T>) -> RtResult<T> {
        if self.frames.len() >= self.recursion_limit {
            return Err(self.error(ExcKind::RecursionError, "maximum recursion depth exceeded"));
        }
        self.frames.push(frame);
        let result = body(self);
        let frame = self.frames.pop();
        match (result, frame) {
            (Err(RuntimeError::Raised(mut exc)), Some(frame)) => {
                exc.traceback.push(TracebackEntry {
                    filename: frame.filename,
                    line: frame.line,
                    name: frame.name,
                });
                Err(RuntimeError::Raised(exc))
            }
            (result, _) => result,
        }
    }

    pub(crate) fn set_line(&mut self, line: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    /// Name of the function executing right now, if any
    pub fn current_frame_name(&self) -> Option<&str> {
        self.frames.last().map(|frame| frame.name.as_str())
    }

    // -- calls --

    pub fn call(&mut self, callee: &Value, args: Args) -> RtResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(func, args, None),
            Value::Traced(traced) => match &traced.func {
                Value::Function(func) => self.call_function(func, args, Some(traced.tracer.clone())),
                other => {
                    let other = other.clone();
                    self.call(&other, args)
                }
            },
            Value::Builtin(builtin) => {
                let builtin = builtin.clone();
                (builtin.func)(self, builtin.receiver.as_ref(), args)
            }
            Value::BoundMethod(method) => {
                let mut args = args;
                args.positional.insert(0, method.receiver.clone());
                let func = method.func.clone();
                self.call(&func, args)
            }
            Value::Class(class) => self.instantiate(class, args),
            Value::Tracer(tracer) => self.apply_tracer(tracer, args),
            other => Err(self.error(
                ExcKind::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    pub fn call_function(&mut self, func: &Rc<Function>, args: Args, tracer: Option<Rc<Tracer>>) -> RtResult<Value> {
        let env = Rc::new(self.bind_arguments(func, args)?);
        let trace = match tracer {
            Some(tracer) => {
                let depth = tracer.depth();
                Some((tracer, depth))
            }
            None => self.inherited_trace(),
        };
        let level = self.frames.iter().filter(|frame| frame.trace.is_some()).count();
        let frame = Frame {
            name: func.name.clone(),
            filename: func.filename.clone(),
            line: func.line,
            env: Some(env.clone()),
            trace: trace.map(|(tracer, remaining)| TraceState {
                tracer,
                remaining,
                level,
                seen: HashMap::new(),
            }),
        };
        let scope = Scope {
            module: func.globals.clone(),
            locals: Locals::Function {
                env,
                decls: func.scope.clone(),
            },
        };
        self.run_frame(frame, |interp| {
            interp.trace_call(func);
            let result = match &func.body {
                FunctionBody::Block(body) => interp.exec_block(body, &scope).map(|flow| match flow {
                    eval::Flow::Return(value) => value,
                    _ => Value::None,
                }),
                FunctionBody::Lambda(expr) => interp.eval(expr, &scope),
            };
            interp.trace_exit(&func.name, &scope, &result);
            result
        })
    }

    fn bind_arguments(&mut self, func: &Function, args: Args) -> RtResult<Env> {
        let env = Env::new(func.scope.locals.iter().cloned(), func.closure.clone());
        let params = &func.params;
        let set = |name: &str, value: Value| {
            if let Some(cell) = env.cells.get(name) {
                *cell.borrow_mut() = Some(value);
            }
        };
        let is_set = |name: &str| env.cells.get(name).is_some_and(|cell| cell.borrow().is_some());

        let given = args.positional.len();
        let mut extra = Vec::new();
        for (index, value) in args.positional.into_iter().enumerate() {
            match params.args.get(index) {
                Some(param) => set(&param.name, value),
                None if params.vararg.is_some() => extra.push(value),
                None => {
                    let expected = params.args.len();
                    return Err(self.error(
                        ExcKind::TypeError,
                        format!(
                            "{}() takes {} positional argument{} but {} {} given",
                            func.name,
                            expected,
                            if expected == 1 { "" } else { "s" },
                            given,
                            if given == 1 { "was" } else { "were" }
                        ),
                    ));
                }
            }
        }
        if let Some(vararg) = &params.vararg {
            set(&vararg.name, Value::tuple(extra));
        }

        let mut kwargs = Dict::new();
        for (name, value) in args.keywords {
            let known = params.args.iter().chain(params.kwonly.iter()).any(|p| p.name == name);
            if known {
                if is_set(&name) {
                    return Err(self.error(
                        ExcKind::TypeError,
                        format!("{}() got multiple values for argument '{}'", func.name, name),
                    ));
                }
                set(&name, value);
            } else if params.kwarg.is_some() {
                kwargs.set_str(&name, value);
            } else {
                return Err(self.error(
                    ExcKind::TypeError,
                    format!("{}() got an unexpected keyword argument '{}'", func.name, name),
                ));
            }
        }
        if let Some(kwarg) = &params.kwarg {
            set(&kwarg.name, Value::dict(kwargs));
        }

        let mut missing = Vec::new();
        for (param, default) in params.args.iter().zip(&func.defaults) {
            if !is_set(&param.name) {
                match default {
                    Some(value) => set(&param.name, value.clone()),
                    None => missing.push(param.name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(self.missing_arguments(&func.name, "positional", &missing));
        }
        for (param, default) in params.kwonly.iter().zip(&func.kw_defaults) {
            if !is_set(&param.name) {
                match default {
                    Some(value) => set(&param.name, value.clone()),
                    None => missing.push(param.name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(self.missing_arguments(&func.name, "keyword-only", &missing));
        }
        Ok(env)
    }

    fn missing_arguments(&self, func: &str, kind: &str, names: &[String]) -> RuntimeError {
        let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
        let list = match quoted.as_slice() {
            [one] => one.clone(),
            [init @ .., last] => format!("{} and {}", init.join(", "), last),
            [] => String::new(),
        };
        self.error(
            ExcKind::TypeError,
            format!(
                "{}() missing {} required {} argument{}: {}",
                func,
                names.len(),
                kind,
                if names.len() == 1 { "" } else { "s" },
                list
            ),
        )
    }

    fn instantiate(&mut self, class: &Rc<Class>, args: Args) -> RtResult<Value> {
        let instance = Rc::new(Instance::new(class.clone()));
        let is_exception = self.is_exception_class(class);
        if is_exception {
            instance
                .dict
                .borrow_mut()
                .insert("args".to_string(), Value::tuple(args.positional.clone()));
        }
        match class.lookup("__init__") {
            Some(init) => {
                let mut args = args;
                args.positional.insert(0, Value::Instance(instance.clone()));
                let result = self.call(&init, args)?;
                if !result.is_none() {
                    return Err(self.error(ExcKind::TypeError, "__init__() should return None"));
                }
            }
            None if !is_exception && (!args.positional.is_empty() || !args.keywords.is_empty()) => {
                return Err(self.error(ExcKind::TypeError, format!("{}() takes no arguments", class.name)));
            }
            None => {}
        }
        Ok(Value::Instance(instance))
    }

    /// `@tracer` applied to a function or a class
    fn apply_tracer(&mut self, tracer: &Rc<Tracer>, args: Args) -> RtResult<Value> {
        let [target] = args.positional.as_slice() else {
            return Err(self.error(ExcKind::TypeError, "tracer takes exactly one argument"));
        };
        match target {
            Value::Function(_) | Value::Traced(_) => Ok(Value::Traced(Rc::new(Traced {
                func: target.clone(),
                tracer: tracer.clone(),
            }))),
            Value::Class(class) => {
                let mut dict = class.dict.borrow_mut();
                for value in dict.values_mut() {
                    if matches!(value, Value::Function(_)) {
                        *value = Value::Traced(Rc::new(Traced {
                            func: value.clone(),
                            tracer: tracer.clone(),
                        }));
                    }
                }
                Ok(target.clone())
            }
            other => Err(self.error(
                ExcKind::TypeError,
                format!("cannot trace '{}' object", other.type_name()),
            )),
        }
    }

    // -- tracing hooks --

    fn inherited_trace(&self) -> Option<(Rc<Tracer>, u32)> {
        let state = self.frames.last()?.trace.as_ref()?;
        (state.remaining > 1).then(|| (state.tracer.clone(), state.remaining - 1))
    }

    fn take_trace(&mut self) -> Option<TraceState> {
        self.frames.last_mut()?.trace.take()
    }

    fn restore_trace(&mut self, state: TraceState) {
        if let Some(frame) = self.frames.last_mut() {
            frame.trace = Some(state);
        }
    }

    fn trace_call(&mut self, func: &Function) {
        let Some(mut state) = self.take_trace() else {
            return;
        };
        state.tracer.call(state.level, &func.name, &func.filename, func.line);
        if let Some(env) = self.frames.last().and_then(|f| f.env.clone()) {
            for param in func.params.names() {
                let value = env.cells.get(param).and_then(|cell| cell.borrow().clone());
                if let Some(value) = value {
                    let repr = self.safe_repr(&value);
                    state.tracer.variable(state.level, param, &repr);
                    state.seen.insert(param.to_string(), repr);
                }
            }
        }
        self.restore_trace(state);
    }

    /// Line event for the statement about to run in the current frame
    pub(crate) fn trace_line(&mut self, scope: &Scope, line: u32) {
        let Some(mut state) = self.take_trace() else {
            return;
        };
        self.report_changes(&mut state, scope);
        let filename = self.frames.last().map(|f| f.filename.clone());
        let text = filename.and_then(|f| self.source_line(&f, line));
        state.tracer.line(state.level, line, text.as_deref());
        self.restore_trace(state);
    }

    fn trace_exit(&mut self, name: &str, scope: &Scope, result: &RtResult<Value>) {
        let Some(mut state) = self.take_trace() else {
            return;
        };
        match result {
            Ok(value) => {
                self.report_changes(&mut state, scope);
                let repr = self.safe_repr(value);
                state.tracer.ret(state.level, name, &repr);
            }
            Err(RuntimeError::Raised(exc)) => {
                state.tracer.exception(state.level, exc.class_name(), &exc.message());
                state.tracer.ended_by_exception(state.level);
            }
            Err(RuntimeError::Consistency(_)) => {}
        }
        self.restore_trace(state);
    }

    fn report_changes(&mut self, state: &mut TraceState, scope: &Scope) {
        let env = self.frames.last().and_then(|f| f.env.clone());
        let mut current: Vec<(String, String)> = Vec::new();
        if let Some(env) = env {
            for (name, value) in env.bound() {
                let repr = self.safe_repr(&value);
                current.push((name, repr));
            }
        }
        for (text, expr) in state.tracer.watch_exprs() {
            if let Ok(value) = self.eval(&expr, scope) {
                let repr = self.safe_repr(&value);
                current.push((text, repr));
            }
        }
        for (name, repr) in current {
            if state.seen.get(&name) != Some(&repr) {
                state.tracer.variable(state.level, &name, &repr);
                state.seen.insert(name, repr);
            }
        }
    }

    fn safe_repr(&mut self, value: &Value) -> String {
        self.repr(value).unwrap_or_else(|_| format!("<{} object>", value.type_name()))
    }

    pub(crate) fn expr_trace_active(&self) -> bool {
        self.expr_trace
            .as_ref()
            .is_some_and(|t| t.frame_depth == self.frames.len())
    }

    pub(crate) fn eval_recorded(&mut self, expr: &Expr, scope: &Scope) -> RtResult<Value> {
        if let Some(t) = self.expr_trace.as_mut() {
            t.nesting += 1;
        }
        let result = self.eval_node(expr, scope);
        let nesting = self.expr_trace.as_ref().map_or(0, |t| t.nesting);
        if let Some(t) = self.expr_trace.as_mut() {
            t.nesting -= 1;
        }
        if let Ok(value) = &result {
            if !expr.is_literal() {
                let text = expr.to_source();
                let repr = self.safe_repr(value);
                if let Some(t) = self.expr_trace.as_mut() {
                    t.records.push((nesting, text, repr));
                }
            }
        }
        result
    }

    // -- exceptions --

    pub fn exc_class(&self, kind: ExcKind) -> Rc<Class> {
        self.exc_classes[kind.index()].clone()
    }

    pub fn is_exception_class(&self, class: &Rc<Class>) -> bool {
        class.is_subclass(&self.exc_class(ExcKind::BaseException))
    }

    /// A fresh builtin exception ready to propagate
    pub fn error(&self, kind: ExcKind, message: impl Into<String>) -> RuntimeError {
        let instance = Instance::new(self.exc_class(kind));
        instance
            .dict
            .borrow_mut()
            .insert("args".to_string(), Value::tuple(vec![Value::str(message.into())]));
        RuntimeError::Raised(Box::new(RaisedException::new(Rc::new(instance))))
    }

    /// Whether `exc` is an instance of builtin `kind`
    pub fn exception_is(&self, exc: &RaisedException, kind: ExcKind) -> bool {
        exc.value.class.is_subclass(&self.exc_class(kind))
    }

    /// Script-visible exception for an import failure
    pub fn import_failure(&self, err: ImportError) -> RuntimeError {
        match err {
            ImportError::NotFound(name) => {
                let error = self.error(ExcKind::ModuleNotFoundError, format!("no module named '{name}'"));
                if let RuntimeError::Raised(exc) = &error {
                    exc.value.dict.borrow_mut().insert("name".to_string(), Value::str(&name));
                }
                error
            }
            ImportError::Parse(parse) => {
                let error = self.error(ExcKind::SyntaxError, parse.message.clone());
                if let RuntimeError::Raised(exc) = &error {
                    let mut dict = exc.value.dict.borrow_mut();
                    dict.insert("filename".to_string(), Value::str(&parse.filename));
                    dict.insert("lineno".to_string(), Value::Int(parse.line as i64));
                    dict.insert("offset".to_string(), Value::Int(parse.col as i64 + 1));
                    dict.insert(
                        "text".to_string(),
                        parse.text.as_deref().map(Value::str).unwrap_or(Value::None),
                    );
                }
                error
            }
            other => self.error(ExcKind::ImportError, other.to_string()),
        }
    }

    /// Exit status requested by a `SystemExit`, printing a non-integer code
    pub fn exit_status(&mut self, exc: &RaisedException) -> Option<i32> {
        if !self.exception_is(exc, ExcKind::SystemExit) {
            return None;
        }
        Some(match exc.args().first() {
            None | Some(Value::None) => 0,
            Some(Value::Int(code)) => *code as i32,
            Some(Value::Bool(flag)) => *flag as i32,
            Some(other) => {
                let text = self.str(other).unwrap_or_default();
                io::emit(&self.stderr, &format!("{text}\n"));
                1
            }
        })
    }

    /// Traceback report, most recent call last, wrapper frames omitted
    pub fn format_exception(&self, exc: &RaisedException) -> String {
        let mut out = String::new();
        if let Some(cause) = exc.cause() {
            let cause = RaisedException::new(cause);
            out.push_str(&cause.summary());
            out.push_str("\n\nThe above exception was the direct cause of the following exception:\n\n");
        }
        let frames: Vec<&TracebackEntry> = exc
            .traceback
            .iter()
            .rev()
            .filter(|entry| !is_synthetic_frame(&entry.name))
            .collect();
        if !frames.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
        }
        for entry in frames {
            out.push_str(&format!(
                "  File \"{}\", line {}, in {}\n",
                entry.filename, entry.line, entry.name
            ));
            if let Some(text) = self.source_line(&entry.filename, entry.line) {
                out.push_str(&format!("    {}\n", text.trim()));
            }
        }
        if self.exception_is(exc, ExcKind::SyntaxError) {
            let dict = exc.value.dict.borrow();
            if let (Some(Value::Str(file)), Some(Value::Int(line))) = (dict.get("filename"), dict.get("lineno")) {
                out.push_str(&format!("  File \"{file}\", line {line}\n"));
                if let Some(Value::Str(text)) = dict.get("text") {
                    out.push_str(&format!("    {}\n", text.trim()));
                }
            }
        }
        out.push_str(&exc.summary());
        out.push('\n');
        out
    }

    /// Print the report for an uncaught exception to stderr
    pub fn print_exception(&self, exc: &RaisedException) {
        io::emit(&self.stderr, &self.format_exception(exc));
    }
}
