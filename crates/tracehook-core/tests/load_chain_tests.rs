use std::fs;
use std::path::Path;
use std::rc::Rc;

use tempfile::tempdir;
use tracehook_core::import::BytecodeCache;
use tracehook_core::instrument::inject_tracer;
use tracehook_core::runtime::SharedBuffer;
use tracehook_core::{
    compile, parse_module, Error, InstrumentationConfig, Interpreter, InterpreterConfig, ModuleObject,
    ProcessInstrumentationContext, TracePolicy, Tracer, TracerSettings,
};

struct Harness {
    interp: Interpreter,
    ctx: ProcessInstrumentationContext,
    out: SharedBuffer,
    trace: SharedBuffer,
}

impl Harness {
    fn new(dir: &Path, policy: TracePolicy) -> Self {
        let out = SharedBuffer::new();
        let trace = SharedBuffer::new();
        let config = InterpreterConfig {
            path: vec![dir.to_path_buf()],
            ..Default::default()
        };
        let mut interp = Interpreter::with_output(config, out.sink(), out.sink());
        let tracer = Tracer::new(TracerSettings::default(), trace.sink());
        let mut ctx = ProcessInstrumentationContext::new(InstrumentationConfig::with_policy(tracer, policy));
        ctx.install(&mut interp).expect("install");
        Self { interp, ctx, out, trace }
    }

    /// Run `source` the way the driver runs a script
    fn run_main(&mut self, source: &str) -> Result<(), Error> {
        let mut module = parse_module(source, "main.py")?;
        self.ctx.transform(&mut module);
        let code = compile(module, "main.py")?.with_source(source);
        let main = ModuleObject::new("__main__");
        let mut guard = self.ctx.enter_main(&mut self.interp, main.clone(), vec!["main.py".into()]);
        inject_tracer(&main, self.ctx.config());
        guard.exec_code(&code, &main)?;
        Ok(())
    }
}

fn write(dir: &Path, name: &str, source: &str) {
    fs::write(dir.join(name), source).expect("write module");
}

#[test]
fn test_imported_functions_are_traced() {
    let dir = tempdir().unwrap();
    write(dir.path(), "lib.py", "def double(n):\n    return n * 2\n");
    let mut h = Harness::new(dir.path(), TracePolicy::default());

    h.run_main("import lib\nprint(lib.double(4))\n").unwrap();

    assert_eq!(h.out.contents(), "8\n");
    let trace = h.trace.contents();
    assert!(trace.contains("DBG: >>> Call to double in File"), "{trace}");
    assert!(trace.contains("n = 4"), "{trace}");
    assert!(trace.contains("return n * 2"), "{trace}");
    assert!(trace.contains("<<< Return value from double: 8"), "{trace}");
}

#[test]
fn test_transitive_imports_share_one_tracer() {
    let dir = tempdir().unwrap();
    write(dir.path(), "inner.py", "def leaf():\n    return 1\n");
    write(dir.path(), "outer.py", "import inner\ndef branch():\n    return inner.leaf() + 1\n");
    let mut h = Harness::new(dir.path(), TracePolicy::default());

    h.run_main("import outer\nouter.branch()\n").unwrap();

    let tracer = h.ctx.tracer().clone();
    for name in ["outer", "inner"] {
        let module = h.interp.module(name).unwrap();
        match module.get(tracehook_core::NAME_TRACE_DECORATOR) {
            Some(tracehook_core::Value::Tracer(bound)) => assert!(Rc::ptr_eq(&bound, &tracer)),
            other => panic!("{name}: unexpected binding {other:?}"),
        }
    }
    let trace = h.trace.contents();
    assert!(trace.contains(">>> Call to branch"), "{trace}");
    assert!(trace.contains(">>> Call to leaf"), "{trace}");
}

#[test]
fn test_methods_follow_policy() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "shapes.py",
        "class Square:\n    def __init__(self, side):\n        self.side = side\n    def area(self):\n        return self.side * self.side\n",
    );
    let script = "import shapes\nprint(shapes.Square(3).area())\n";

    let mut h = Harness::new(dir.path(), TracePolicy::default());
    h.run_main(script).unwrap();
    assert!(h.trace.contents().contains(">>> Call to area"));

    let policy = TracePolicy {
        trace_methods: false,
        ..Default::default()
    };
    let mut h = Harness::new(dir.path(), policy);
    h.run_main(script).unwrap();
    assert_eq!(h.out.contents(), "9\n");
    assert!(h.trace.contents().is_empty());
}

#[test]
fn test_whole_module_tracing_keeps_globals() {
    let dir = tempdir().unwrap();
    write(dir.path(), "settings.py", "limit = 10\nnames = []\nnames.append('a')\n");
    let policy = TracePolicy {
        trace_modules: true,
        ..Default::default()
    };
    let mut h = Harness::new(dir.path(), policy);

    h.run_main("import settings\nprint(settings.limit, settings.names)\n").unwrap();

    assert_eq!(h.out.contents(), "10 ['a']\n");
    let trace = h.trace.contents();
    assert!(trace.contains(">>> Call to __trace-module-main"), "{trace}");
}

#[test]
fn test_ignored_paths_load_uninstrumented() {
    let dir = tempdir().unwrap();
    let vendor = dir.path().join("vendor");
    fs::create_dir(&vendor).unwrap();
    write(&vendor, "quiet.py", "def f():\n    return 1\n");
    let mut h = Harness::new(&vendor, TracePolicy::default());
    h.ctx.config().add_ignore_path(&vendor);

    h.run_main("import quiet\nquiet.f()\n").unwrap();

    assert!(h.trace.contents().is_empty());
    let quiet = h.interp.module("quiet").unwrap();
    assert!(quiet.get(tracehook_core::NAME_TRACE_DECORATOR).is_none());
}

#[test]
fn test_tracebacks_hide_module_wrapper() {
    let dir = tempdir().unwrap();
    write(dir.path(), "boom.py", "raise ValueError('bad config')\n");
    let policy = TracePolicy {
        trace_modules: true,
        ..Default::default()
    };
    let mut h = Harness::new(dir.path(), policy);

    let err = h.run_main("import boom\n").unwrap_err();
    let exc = match err {
        Error::Runtime(tracehook_core::RuntimeError::Raised(exc)) => exc,
        other => panic!("expected a script exception, got {other:?}"),
    };
    let report = h.interp.format_exception(&exc);
    assert!(report.ends_with("ValueError: bad config\n"), "{report}");
    assert!(report.contains("boom.py"), "{report}");
    assert!(!report.contains("__trace-module-main"), "{report}");
    assert!(h.interp.module("boom").is_none());
}

#[test]
fn test_rebinding_the_tracer_is_fatal() {
    let dir = tempdir().unwrap();
    write(dir.path(), "rogue.py", "def f():\n    pass\nglobals_seen = 1\n");
    let mut h = Harness::new(dir.path(), TracePolicy::default());

    // not a valid identifier, so only the host can rebind it
    h.run_main("import rogue\n").unwrap();
    let rogue = h.interp.module("rogue").unwrap();
    let other = Tracer::new(TracerSettings::default(), h.trace.sink());
    rogue.set(tracehook_core::NAME_TRACE_DECORATOR, tracehook_core::Value::Tracer(other));
    let err = tracehook_core::instrument::verify_tracer(&rogue, h.ctx.config()).unwrap_err();
    assert_eq!(err.module, "rogue");
}

#[test]
fn test_rebinding_during_import_is_fatal() {
    let dir = tempdir().unwrap();
    write(dir.path(), "rogue.py", "import rogue\nsetattr(rogue, '__trace-wrap', 1)\n");
    let mut h = Harness::new(dir.path(), TracePolicy::default());

    match h.interp.import_module("rogue") {
        Err(tracehook_core::RuntimeError::Consistency(err)) => {
            assert_eq!(err.module, "rogue");
            assert_eq!(err.binding, tracehook_core::NAME_TRACE_DECORATOR);
        }
        Err(other) => panic!("expected a consistency failure, got {other:?}"),
        Ok(_) => panic!("rebinding the tracer went unnoticed"),
    }
}

#[test]
fn test_cache_written_before_install_is_not_reused() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("lib.py");
    write(dir.path(), "lib.py", "def double(n):\n    return n * 2\n");

    let out = SharedBuffer::new();
    let config = InterpreterConfig {
        path: vec![dir.path().to_path_buf()],
        dont_write_bytecode: false,
        ..Default::default()
    };
    let mut plain = Interpreter::with_output(config, out.sink(), out.sink());
    let lib = plain.import_module("lib").unwrap();
    assert!(matches!(lib.get("double"), Some(tracehook_core::Value::Function(_))));
    let entry = BytecodeCache::cache_path(&source);
    assert!(entry.is_file(), "missing {}", entry.display());

    let mut h = Harness::new(dir.path(), TracePolicy::default());
    let lib = h.interp.import_module("lib").unwrap();
    assert!(matches!(lib.get("double"), Some(tracehook_core::Value::Traced(_))));
}

#[test]
fn test_whole_module_trace_reports_first_line_once() {
    let dir = tempdir().unwrap();
    write(dir.path(), "two.py", "x = 1\nprint(x + 1)\n");
    let policy = TracePolicy {
        trace_modules: true,
        ..Default::default()
    };
    let mut h = Harness::new(dir.path(), policy);

    h.run_main("import two\n").unwrap();

    assert_eq!(h.out.contents(), "2\n");
    let trace = h.trace.contents();
    assert_eq!(trace.matches("1 | x = 1").count(), 1, "{trace}");
    assert_eq!(trace.matches("2 | print(x + 1)").count(), 1, "{trace}");
}
