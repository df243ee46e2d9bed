//! Runs one script or module under instrumentation.
//!
//! The driver builds the process configuration and its tracer, installs the
//! load chain into a fresh interpreter, then runs the target as `__main__`
//! with the same transform the chain applies to imported modules.

use std::fs;
use std::iter;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracehook_core::import::loader::io_reason;
use tracehook_core::instrument::{inject_tracer, verify_tracer};
use tracehook_core::runtime::io::emit;
use tracehook_core::runtime::{ExcKind, Sink};
use tracehook_core::{
    compile, parse_module, ConsistencyError, ImportError, InstrumentationConfig, Interpreter, InterpreterConfig,
    ModuleObject, ParseError, ProcessInstrumentationContext, RuntimeError, ToSource, Tracer, TracerSettings, Value,
};
use tracing::{debug, trace};

use crate::args::{CliOptions, Target};

/// Why a run stopped before the target finished
enum Stop {
    Status(i32),
    Fatal(ConsistencyError),
}

impl From<ConsistencyError> for Stop {
    fn from(err: ConsistencyError) -> Self {
        Stop::Fatal(err)
    }
}

/// The resolved entry point
struct Entry {
    source: String,
    filename: String,
}

/// Run the target described by `options` and return its exit status.
///
/// Script output goes to `stdout`; trace output, tracebacks and diagnostics
/// go to `stderr`. A tracer binding replaced behind the chain's back is not
/// a script error and comes back as `Err`.
pub fn run(options: &CliOptions, stdout: Sink, stderr: Sink, color: bool) -> Result<i32, ConsistencyError> {
    let settings = TracerSettings {
        depth: options.depth,
        prefix: options.prefix.clone(),
        color,
        ..Default::default()
    };
    let tracer = Tracer::new(settings, stderr.clone());
    let config = InstrumentationConfig::with_policy(tracer, options.policy);
    for path in &options.ignore_paths {
        config.add_ignore_path(path);
    }

    let mut interp = Interpreter::with_output(InterpreterConfig::from_env(), stdout, stderr);
    let mut ctx = ProcessInstrumentationContext::new(config);

    let driver = Driver {
        interp: &mut interp,
        ctx: &mut ctx,
        options,
    };
    match driver.run() {
        Ok(status) | Err(Stop::Status(status)) => Ok(status),
        Err(Stop::Fatal(err)) => Err(err),
    }
}

struct Driver<'a> {
    interp: &'a mut Interpreter,
    ctx: &'a mut ProcessInstrumentationContext,
    options: &'a CliOptions,
}

impl Driver<'_> {
    fn run(mut self) -> Result<i32, Stop> {
        let options = self.options;
        let search_dir = match &options.target {
            Target::Script(path) => path.parent().map(Path::to_path_buf).unwrap_or_default(),
            Target::Module(_) => PathBuf::new(),
        };
        self.interp.prepend_sys_path(&search_dir);

        if let Err(err) = self.ctx.install(self.interp) {
            return Err(self.fail(&err.to_string()));
        }

        let entry = match &options.target {
            Target::Script(path) => self.read_script(path)?,
            Target::Module(name) => self.resolve_module(name)?,
        };
        debug!(filename = %entry.filename, args = ?options.args, "running entry point");
        self.execute(entry)
    }

    /// Report a usage-level failure
    fn fail(&self, message: &str) -> Stop {
        emit(self.interp.stderr(), &format!("error: {message}\n"));
        Stop::Status(1)
    }

    fn read_script(&self, path: &Path) -> Result<Entry, Stop> {
        match fs::read_to_string(path) {
            Ok(source) => Ok(Entry {
                source,
                filename: path.to_string_lossy().into_owned(),
            }),
            Err(err) => Err(self.fail(&format!("{}: {}", io_reason(&err), path.display()))),
        }
    }

    fn resolve_module(&mut self, name: &str) -> Result<Entry, Stop> {
        if name.starts_with('.') {
            return Err(self.fail(&ImportError::Relative.to_string()));
        }
        let spec = match self.interp.find_module_spec(name) {
            Ok(Some(spec)) => spec,
            Ok(None) => return Err(self.fail(&ImportError::NotFound(name.to_string()).to_string())),
            Err(RuntimeError::Raised(exc)) if self.interp.exception_is(&exc, ExcKind::ModuleNotFoundError) => {
                return Err(self.fail(&ImportError::NotFound(name.to_string()).to_string()));
            }
            Err(RuntimeError::Raised(exc)) => {
                // a parent package failed while executing
                self.interp.print_exception(&exc);
                return Err(Stop::Status(1));
            }
            Err(RuntimeError::Consistency(err)) => return Err(err.into()),
        };
        let source = match spec.loader.get_source() {
            Ok(Some(source)) => source,
            Ok(None) => return Err(self.fail(&format!("no code object available for '{name}'"))),
            Err(err) => return Err(self.fail(&err.to_string())),
        };
        let filename = spec
            .origin
            .as_ref()
            .map(|origin| origin.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        Ok(Entry { source, filename })
    }

    fn syntax_failure(&self, err: ParseError, source: &str) -> Stop {
        emit(self.interp.stderr(), &err.with_source_line(source).report());
        Stop::Status(1)
    }

    fn execute(self, entry: Entry) -> Result<i32, Stop> {
        let Entry { source, filename } = entry;
        let mut module = parse_module(&source, &filename).map_err(|err| self.syntax_failure(err, &source))?;

        trace!(ast = %serde_json::to_string(&module).unwrap_or_default(), "entry point before transform");
        self.ctx.transform(&mut module);
        trace!(ast = %serde_json::to_string(&module).unwrap_or_default(), "entry point after transform");
        debug!(source = %module.to_source(), "instrumented entry point");

        let code = compile(module, &filename)
            .map_err(|err| self.syntax_failure(err, &source))?
            .with_source(source);

        let main = ModuleObject::new("__main__");
        main.set("__file__", Value::str(&filename));
        let argv = iter::once(filename).chain(self.options.args.iter().cloned()).collect();

        let config = Rc::clone(self.ctx.config());
        let mut guard = self.ctx.enter_main(self.interp, main.clone(), argv);
        inject_tracer(&main, &config);
        let result = guard.exec_code(&code, &main);
        verify_tracer(&main, &config)?;

        match result {
            Ok(()) => Ok(0),
            Err(RuntimeError::Raised(exc)) => match guard.exit_status(&exc) {
                Some(status) => Ok(status),
                None => {
                    guard.print_exception(&exc);
                    Ok(1)
                }
            },
            Err(RuntimeError::Consistency(err)) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{parse_args, Invocation};
    use tempfile::tempdir;
    use tracehook_core::runtime::SharedBuffer;

    struct Outcome {
        status: i32,
        stdout: String,
        stderr: String,
    }

    fn run_args(args: &[&str]) -> Outcome {
        let options = match parse_args(args.iter().map(|a| a.to_string())) {
            Ok(Invocation::Run(options)) => options,
            other => panic!("unexpected {other:?}"),
        };
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let status = run(&options, out.sink(), err.sink(), false).expect("consistent run");
        Outcome {
            status,
            stdout: out.contents(),
            stderr: err.contents(),
        }
    }

    fn script(dir: &Path, name: &str, source: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, source).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_script_runs_with_argv_and_file() {
        let dir = tempdir().unwrap();
        let path = script(
            dir.path(),
            "main.py",
            "import sys\nprint(len(sys.argv), sys.argv[1:])\nprint(__file__ == sys.argv[0])\n",
        );

        let outcome = run_args(&[&path, "a", "-d"]);

        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.stdout, "3 ['a', '-d']\nTrue\n");
        assert_eq!(outcome.stderr, "");
    }

    #[test]
    fn test_main_functions_are_traced() {
        let dir = tempdir().unwrap();
        let path = script(dir.path(), "main.py", "def sq(n):\n    return n * n\nprint(sq(5))\n");

        let outcome = run_args(&["-p", "T", &path]);

        assert_eq!(outcome.stdout, "25\n");
        assert!(outcome.stderr.contains("T >>> Call to sq"), "{}", outcome.stderr);
        assert!(outcome.stderr.contains("<<< Return value from sq: 25"), "{}", outcome.stderr);
    }

    #[test]
    fn test_script_directory_is_importable() {
        let dir = tempdir().unwrap();
        script(dir.path(), "helper.py", "def greet():\n    return 'hi'\n");
        let path = script(dir.path(), "main.py", "import helper\nprint(helper.greet())\n");

        let outcome = run_args(&[&path]);

        assert_eq!(outcome.stdout, "hi\n");
        assert!(outcome.stderr.contains(">>> Call to greet"), "{}", outcome.stderr);
    }

    #[test]
    fn test_exit_statuses() {
        let dir = tempdir().unwrap();
        let exits = script(dir.path(), "exits.py", "import sys\nsys.exit(3)\n");
        let raises = script(dir.path(), "raises.py", "def f():\n    raise KeyError('k')\nf()\n");

        assert_eq!(run_args(&[&exits]).status, 3);

        let outcome = run_args(&["+M", &raises]);
        assert_eq!(outcome.status, 1);
        assert!(outcome.stderr.contains(">>> Call to __trace-module-main"), "{}", outcome.stderr);
        let (_, traceback) = outcome
            .stderr
            .split_once("Traceback (most recent call last):")
            .expect("traceback printed");
        assert!(traceback.contains("in f"), "{traceback}");
        assert!(!traceback.contains("__trace-module-main"), "{traceback}");
        assert!(traceback.ends_with("KeyError: 'k'\n"), "{traceback}");
    }

    #[test]
    fn test_entry_point_failures() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.py");
        let outcome = run_args(&[missing.to_str().unwrap()]);
        assert_eq!(outcome.status, 1);
        assert_eq!(
            outcome.stderr,
            format!("error: no such file or directory: {}\n", missing.display())
        );

        let broken = script(dir.path(), "broken.py", "def f(:\n    pass\n");
        let outcome = run_args(&[&broken]);
        assert_eq!(outcome.status, 1);
        assert!(outcome.stderr.contains("SyntaxError"), "{}", outcome.stderr);

        let outcome = run_args(&["-m", ".relative"]);
        assert_eq!(outcome.stderr, "error: relative module names are not supported\n");
        let outcome = run_args(&["-m", "surely_not_a_module"]);
        assert_eq!(outcome.status, 1);
        assert_eq!(outcome.stderr, "error: no module named 'surely_not_a_module'\n");
    }
}
