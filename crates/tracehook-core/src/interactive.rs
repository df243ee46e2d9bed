//! Cell-by-cell tracing for interactive sessions.
//!
//! Each traced snippet is wrapped into a uniquely named function that
//! declares every name it references `global`, decorated with a
//! `__trace_config(depth=...)` call, and invoked right away. The call's
//! value is the snippet's value, so "value of the last expression" still
//! works. With autotrace on, every cell goes through [`TraceTransformer`],
//! which only traces cells touching visible session state.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::debug;

use crate::analysis::{collect_referenced_names, propagate_missing_locations, wrap_as_callable, TracedUnit};
use crate::ast::*;
use crate::compile::compile;
use crate::error::{InstrumentError, Result};
use crate::instrument::transform::ModuleTransform;
use crate::parser::{parse_expression, parse_module};
use crate::runtime::value::Builtin;
use crate::runtime::{Args, ExcKind, Interpreter, ModuleObject, RtResult, Value};
use crate::tracer::{Tracer, TracerSettings};

/// Namespace binding of the tracer factory snippets are decorated with
pub const NAME_TRACE_CONFIG: &str = "__trace_config";

/// Prefix of the functions snippets are wrapped into
pub const TRACE_BLOCK_PREFIX: &str = "__trace_block_";

/// Tracer settings a session starts with
pub fn session_defaults() -> TracerSettings {
    TracerSettings {
        depth: 2,
        prefix: "┃".to_string(),
        color: true,
        watch: Vec::new(),
    }
}

/// Wrap `module` into `fn_name`, decorated with
/// `__trace_config(depth=<depth>)`
pub fn trace_snippet(module: &Module, fn_name: &str, depth: Option<i64>) -> TracedUnit {
    let names = collect_referenced_names(module);
    let (mut def, call) = wrap_as_callable(fn_name, &module.body, DeclarationKind::Global, Some(&names));

    let depth = Expr::constant(depth.map_or(Constant::None, Constant::Int));
    let mut decorator = Expr::call(
        Expr::name(NAME_TRACE_CONFIG),
        Vec::new(),
        vec![Keyword::new("depth", depth)],
    );
    let (line, col) = def.loc.map_or((1, 0), |loc| (loc.line, loc.col));
    propagate_missing_locations(&mut decorator, line, col, None, None);
    if let Some(func) = def.as_function_def_mut() {
        func.decorators.insert(0, decorator);
    }

    TracedUnit {
        def_unit: Module { body: vec![def] },
        call,
        names,
    }
}

/// Trigger deciding whether a wrapped snippet gets traced
pub type TraceTrigger = Box<dyn Fn(&TracedUnit) -> bool>;

/// Traces whole cells when the trigger accepts them
pub struct TraceTransformer {
    trigger: TraceTrigger,
    counter: Cell<usize>,
}

impl TraceTransformer {
    pub fn new(trigger: TraceTrigger) -> Self {
        Self {
            trigger,
            counter: Cell::new(0),
        }
    }

    /// A transformer tracing every cell
    pub fn always() -> Self {
        Self::new(Box::new(|_| true))
    }

    /// Fresh wrapper function name
    pub fn next_name(&self) -> String {
        let n = self.counter.get() + 1;
        self.counter.set(n);
        format!("{TRACE_BLOCK_PREFIX}{n}")
    }
}

impl ModuleTransform for TraceTransformer {
    fn name(&self) -> &'static str {
        "trace-cell"
    }

    fn transform(&self, module: Module) -> Module {
        let unit = trace_snippet(&module, &self.next_name(), None);
        if !(self.trigger)(&unit) {
            return module;
        }
        definition_then_call(unit)
    }
}

/// `[def, call]` as one module
fn definition_then_call(unit: TracedUnit) -> Module {
    let loc = unit.call.loc;
    let mut run = Stmt::expr(unit.call);
    run.loc = loc;
    let mut body = unit.def_unit.body;
    body.push(run);
    Module { body }
}

/// A change to the session's tracer settings. `clear_watches` applies
/// before `watch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceConfigUpdate {
    pub depth: Option<i64>,
    pub clear_watches: bool,
    pub watch: Vec<String>,
    pub prefix: Option<String>,
    pub color: Option<bool>,
}

/// An interactive session: one interpreter, one `__main__` namespace, and
/// the tracer settings every traced cell is decorated with
pub struct TraceSession {
    interp: Interpreter,
    namespace: Rc<ModuleObject>,
    /// Holds the live settings; `__trace_config` forks it
    template: Rc<Tracer>,
    transformer: TraceTransformer,
    autotrace: bool,
    cells: usize,
}

impl TraceSession {
    pub fn new(interp: Interpreter) -> Self {
        Self::with_settings(interp, session_defaults())
    }

    pub fn with_settings(mut interp: Interpreter, settings: TracerSettings) -> Self {
        let template = Tracer::new(settings, interp.stderr().clone());
        let namespace = match interp.main_module() {
            Some(main) => main,
            None => {
                let main = ModuleObject::new("__main__");
                interp.register_module("__main__", main.clone());
                main
            }
        };
        namespace.set(
            NAME_TRACE_CONFIG,
            Value::Builtin(Rc::new(Builtin::bound(
                NAME_TRACE_CONFIG,
                new_tracer,
                Value::Tracer(template.clone()),
            ))),
        );
        let hidden: BTreeSet<String> = namespace.dict.borrow().keys().cloned().collect();

        let visible_in = namespace.clone();
        let trigger: TraceTrigger = Box::new(move |unit: &TracedUnit| {
            visible_in
                .dict
                .borrow()
                .keys()
                .any(|name| !hidden.contains(name) && unit.names.contains(name))
        });

        Self {
            interp,
            namespace,
            template,
            transformer: TraceTransformer::new(trigger),
            autotrace: false,
            cells: 0,
        }
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.interp
    }

    pub fn namespace(&self) -> &Rc<ModuleObject> {
        &self.namespace
    }

    pub fn settings(&self) -> TracerSettings {
        self.template.settings().clone()
    }

    fn next_filename(&mut self) -> String {
        self.cells += 1;
        format!("<cell-{}>", self.cells)
    }

    /// Run a cell, tracing it when autotrace is on and the cell references
    /// visible names. Returns the value of a trailing expression.
    pub fn run_cell(&mut self, source: &str) -> Result<Value> {
        let filename = self.next_filename();
        let mut module = parse_module(source, &filename)?;
        if self.autotrace {
            module = self.transformer.transform(module);
        }
        self.execute(module, source, &filename)
    }

    /// Run a cell, always traced
    pub fn trace(&mut self, source: &str) -> Result<Value> {
        let filename = self.next_filename();
        let module = parse_module(source, &filename)?;
        let unit = trace_snippet(&module, &self.transformer.next_name(), None);
        self.execute(definition_then_call(unit), source, &filename)
    }

    /// Evaluate an expression, reporting every intermediate value
    pub fn etrace(&mut self, source: &str) -> Result<Value> {
        let expr = parse_expression(source.trim(), "<etrace>")?;
        let tracer = self.template.fork(None);
        let value = self.interp.eval_traced_expression(&expr, &self.namespace, &tracer)?;
        Ok(value)
    }

    /// Apply `update` to the live settings
    pub fn configure(&mut self, update: TraceConfigUpdate) -> std::result::Result<(), InstrumentError> {
        let depth = match update.depth {
            Some(depth) if depth < 1 => return Err(InstrumentError::InvalidDepth(depth)),
            Some(depth) => Some(u32::try_from(depth).map_err(|_| InstrumentError::DepthTooLarge(depth))?),
            None => None,
        };
        self.template.configure(|settings| {
            if let Some(depth) = depth {
                settings.depth = depth;
            }
            if update.clear_watches {
                settings.watch.clear();
            }
            for watch in update.watch {
                settings.add_watch(watch);
            }
            if let Some(prefix) = update.prefix {
                settings.prefix = prefix;
            }
            if let Some(color) = update.color {
                settings.color = color;
            }
        });
        Ok(())
    }

    /// Set autotrace, or with `None` leave it alone. Returns the state.
    pub fn autotrace(&mut self, state: Option<bool>) -> bool {
        if let Some(state) = state {
            debug!(state, "autotrace");
            self.autotrace = state;
        }
        self.autotrace
    }

    /// Human-readable summary of the live settings
    pub fn describe_config(&mut self) -> String {
        let settings = self.settings();
        let watches = if settings.watch.is_empty() {
            "--".to_string()
        } else {
            settings.watch.join(", ")
        };
        let prefix = self
            .interp
            .repr(&Value::str(&settings.prefix))
            .unwrap_or_else(|_| settings.prefix.clone());
        format!(
            "      Call depth: {}\nVariable watches: {}\n   Output prefix: {}\n        Colorize: {}",
            settings.depth,
            watches,
            prefix,
            if settings.color { "on" } else { "off" },
        )
    }

    /// Execute `module` in the session namespace, evaluating a trailing
    /// expression statement separately for its value
    fn execute(&mut self, module: Module, source: &str, filename: &str) -> Result<Value> {
        let mut body = module.body;
        let tail = match body.last() {
            Some(Stmt {
                kind: StmtKind::Expr(_),
                ..
            }) => body.pop(),
            _ => None,
        };
        let code = compile(Module { body }, filename)?.with_source(source);
        self.interp.exec_code(&code, &self.namespace)?;
        match tail {
            Some(Stmt {
                kind: StmtKind::Expr(expr),
                ..
            }) => Ok(self.interp.eval_expression(&expr, &self.namespace)?),
            _ => Ok(Value::None),
        }
    }
}

/// `__trace_config(depth=None)`: a tracer with the session's current
/// settings, optionally at another depth
fn new_tracer(interp: &mut Interpreter, receiver: Option<&Value>, args: Args) -> RtResult<Value> {
    let Some(Value::Tracer(template)) = receiver else {
        return Err(interp.error(ExcKind::TypeError, "tracer factory is not bound to a session"));
    };
    let depth = match args.keyword("depth").or(args.positional.first()) {
        None | Some(Value::None) => None,
        Some(Value::Int(depth)) if *depth < 1 => return Err(interp.error(ExcKind::ValueError, "depth must be >= 1")),
        Some(Value::Int(depth)) => match u32::try_from(*depth) {
            Ok(depth) => Some(depth),
            Err(_) => return Err(interp.error(ExcKind::ValueError, format!("depth {depth} is too large"))),
        },
        Some(other) => {
            return Err(interp.error(
                ExcKind::TypeError,
                format!("depth must be an integer, not '{}'", other.type_name()),
            ))
        }
    };
    Ok(Value::Tracer(template.fork(depth)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{InterpreterConfig, SharedBuffer};
    use pretty_assertions::assert_eq;

    fn session() -> (TraceSession, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let interp = Interpreter::with_output(InterpreterConfig::default(), out.sink(), err.sink());
        let settings = TracerSettings {
            color: false,
            prefix: "T".into(),
            ..session_defaults()
        };
        (TraceSession::with_settings(interp, settings), out, err)
    }

    #[test]
    fn test_trace_snippet_shape() {
        let module = parse_module("y = x + 1\ny\n", "<cell>").unwrap();
        let unit = trace_snippet(&module, "__trace_block_7", Some(3));
        let def = unit.def_unit.body[0].as_function_def().unwrap();
        assert_eq!(def.name, "__trace_block_7");
        assert_eq!(
            def.decorators[0].to_source(),
            format!("{NAME_TRACE_CONFIG}(depth=3)")
        );
        assert!(def.decorators[0].loc.is_some());
        assert_eq!(unit.names, BTreeSet::from(["x".to_string(), "y".to_string()]));
        assert!(matches!(def.body.last().map(|s| &s.kind), Some(StmtKind::Return(Some(_)))));

        let unit = trace_snippet(&module, "f", None);
        let def = unit.def_unit.body[0].as_function_def().unwrap();
        assert_eq!(def.decorators[0].to_source(), format!("{NAME_TRACE_CONFIG}(depth=None)"));
    }

    #[test]
    fn test_transformer_respects_trigger() {
        let module = parse_module("a = 1\n", "<cell>").unwrap();
        let never = TraceTransformer::new(Box::new(|_| false));
        assert_eq!(never.transform(module.clone()), module);

        let always = TraceTransformer::always();
        let traced = always.transform(module);
        assert_eq!(traced.body.len(), 2);
        assert_eq!(
            traced.body[0].as_function_def().map(|def| def.name.as_str()),
            Some("__trace_block_1")
        );
        assert_eq!(always.next_name(), "__trace_block_2");
    }

    #[test]
    fn test_run_cell_returns_last_value() {
        let (mut session, _, err) = session();
        assert!(session.run_cell("x = 20\n").unwrap().is_none());
        let value = session.run_cell("x + 22\n").unwrap();
        assert_eq!(value.as_int(), Some(42));
        assert!(err.contents().is_empty());
    }

    #[test]
    fn test_trace_assigns_globals_and_reports() {
        let (mut session, _, err) = session();
        let value = session.trace("total = 0\nfor i in range(3):\n    total = total + i\ntotal\n").unwrap();
        assert_eq!(value.as_int(), Some(3));
        assert_eq!(session.namespace().get("total").and_then(|v| v.as_int()), Some(3));
        let trace = err.contents();
        assert!(trace.contains("T >>> Call to __trace_block_1"), "{trace}");
        assert!(trace.contains("<<< Return value from __trace_block_1: 3"), "{trace}");
    }

    #[test]
    fn test_cell_lines_are_reported_once() {
        let (mut session, _, err) = session();
        session.run_cell("data = [3, 1, 2]\n").unwrap();
        session.trace("sorted(data)\n").unwrap();
        let trace = err.contents();
        assert_eq!(trace.matches("1 | sorted(data)").count(), 1, "{trace}");
    }

    #[test]
    fn test_autotrace_only_for_visible_names() {
        let (mut session, _, err) = session();
        assert!(!session.autotrace(None));
        assert!(session.autotrace(Some(true)));
        assert!(session.autotrace(None));

        session.run_cell("1 + 1\n").unwrap();
        assert!(err.contents().is_empty());

        // `count` is not visible yet
        session.run_cell("count = 5\n").unwrap();
        assert!(err.contents().is_empty());

        session.run_cell("count + 1\n").unwrap();
        assert!(err.contents().contains(">>> Call to"));
    }

    #[test]
    fn test_configure_and_describe() {
        let (mut session, _, _) = session();
        session
            .configure(TraceConfigUpdate {
                depth: Some(4),
                watch: vec!["a".into(), "b".into()],
                prefix: Some("DBG:".into()),
                color: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            session.describe_config(),
            "      Call depth: 4\nVariable watches: a, b\n   Output prefix: 'DBG:'\n        Colorize: on"
        );

        session
            .configure(TraceConfigUpdate {
                clear_watches: true,
                watch: vec!["c".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(session.settings().watch, ["c"]);
        assert_eq!(
            session.configure(TraceConfigUpdate {
                depth: Some(0),
                ..Default::default()
            }),
            Err(InstrumentError::InvalidDepth(0))
        );
        assert_eq!(
            session.configure(TraceConfigUpdate {
                depth: Some(4_294_967_298),
                ..Default::default()
            }),
            Err(InstrumentError::DepthTooLarge(4_294_967_298))
        );
        assert_eq!(session.settings().depth, 4);
    }

    #[test]
    fn test_trace_config_factory_forks_current_settings() {
        let (mut session, _, _) = session();
        session
            .configure(TraceConfigUpdate {
                prefix: Some(">>".into()),
                ..Default::default()
            })
            .unwrap();
        let tracer = session.run_cell("__trace_config(depth=5)\n").unwrap();
        let Value::Tracer(tracer) = tracer else {
            panic!("expected a tracer");
        };
        assert_eq!(tracer.depth(), 5);
        assert_eq!(tracer.settings().prefix, ">>");
        assert!(session.run_cell("__trace_config(depth=0)\n").is_err());
        assert!(session.run_cell("__trace_config(depth=4294967296)\n").is_err());
    }

    #[test]
    fn test_etrace_reports_subexpressions() {
        let (mut session, _, err) = session();
        session.run_cell("x = 3\n").unwrap();
        let value = session.etrace("x * 2 + 1").unwrap();
        assert_eq!(value.as_int(), Some(7));
        let trace = err.contents();
        assert!(trace.contains("x = 3"), "{trace}");
        assert!(trace.contains("x * 2 = 6"), "{trace}");
    }
}
