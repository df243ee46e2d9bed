// Process-wide instrumentation lifecycle

use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use tracing::debug;

use super::chain::{patch_path_hooks, unpatch_path_hooks};
use super::transform::trace_transform_module;
use super::InstrumentationConfig;
use crate::ast::Module;
use crate::error::InstrumentError;
use crate::runtime::{Interpreter, ModuleObject, Value};
use crate::tracer::Tracer;

/// Owns the shared [`InstrumentationConfig`] and installs the load chain
/// into an interpreter. One per process.
#[derive(Debug)]
pub struct ProcessInstrumentationContext {
    config: Rc<InstrumentationConfig>,
    installed: bool,
}

impl ProcessInstrumentationContext {
    pub fn new(config: InstrumentationConfig) -> Self {
        Self {
            config: Rc::new(config),
            installed: false,
        }
    }

    pub fn config(&self) -> &Rc<InstrumentationConfig> {
        &self.config
    }

    pub fn tracer(&self) -> &Rc<Tracer> {
        self.config.tracer()
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Patch `interp`'s path hooks. Returns the number of hooks patched.
    pub fn install(&mut self, interp: &mut Interpreter) -> Result<usize, InstrumentError> {
        if self.installed {
            return Err(InstrumentError::AlreadyInstalled);
        }
        self.config.set_install_paths(interp.install_paths());
        let patched = patch_path_hooks(interp, &self.config);
        self.installed = true;
        debug!(patched, ignore = ?self.config.ignore_module_paths(), "instrumentation installed");
        Ok(patched)
    }

    pub fn uninstall(&mut self, interp: &mut Interpreter) -> Result<usize, InstrumentError> {
        if !self.installed {
            return Err(InstrumentError::NotInstalled);
        }
        let restored = unpatch_path_hooks(interp);
        self.installed = false;
        Ok(restored)
    }

    /// The transform the load chain applies, for an entry point parsed by
    /// the caller
    pub fn transform(&self, module: &mut Module) {
        trace_transform_module(module, self.config.policy());
    }

    /// Make `main` the `__main__` module and `argv` the script arguments
    /// until the returned guard is dropped
    pub fn enter_main<'a>(
        &self,
        interp: &'a mut Interpreter,
        main: Rc<ModuleObject>,
        argv: Vec<String>,
    ) -> MainModuleGuard<'a> {
        MainModuleGuard::enter(interp, main, argv)
    }
}

/// Restores the previous `__main__` module and `sys.argv` on drop
pub struct MainModuleGuard<'a> {
    interp: &'a mut Interpreter,
    saved_main: Option<Rc<ModuleObject>>,
    saved_argv: Option<Value>,
}

impl<'a> MainModuleGuard<'a> {
    pub fn enter(interp: &'a mut Interpreter, main: Rc<ModuleObject>, argv: Vec<String>) -> Self {
        let saved_main = interp.register_module("__main__", main);
        let argv = Value::list(argv.into_iter().map(Value::str).collect());
        let saved_argv = Some(interp.swap_argv(argv));
        Self {
            interp,
            saved_main,
            saved_argv,
        }
    }
}

impl Deref for MainModuleGuard<'_> {
    type Target = Interpreter;

    fn deref(&self) -> &Interpreter {
        self.interp
    }
}

impl DerefMut for MainModuleGuard<'_> {
    fn deref_mut(&mut self) -> &mut Interpreter {
        self.interp
    }
}

impl Drop for MainModuleGuard<'_> {
    fn drop(&mut self) {
        match self.saved_main.take() {
            Some(previous) => {
                self.interp.register_module("__main__", previous);
            }
            None => {
                self.interp.remove_module("__main__");
            }
        }
        if let Some(argv) = self.saved_argv.take() {
            self.interp.swap_argv(argv);
        }
        debug!("main module restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::FILE_FINDER_HOOK;
    use crate::instrument::{NAME_TRACE_DECORATOR, TRACING_HOOK};
    use crate::parser::parse_module;
    use crate::runtime::{InterpreterConfig, SharedBuffer};
    use crate::tracer::TracerSettings;

    fn context(out: &SharedBuffer) -> ProcessInstrumentationContext {
        let tracer = Tracer::new(TracerSettings::default(), out.sink());
        ProcessInstrumentationContext::new(InstrumentationConfig::new(tracer))
    }

    #[test]
    fn test_install_twice_is_an_error() {
        let out = SharedBuffer::new();
        let mut ctx = context(&out);
        let mut interp = Interpreter::with_output(InterpreterConfig::default(), out.sink(), out.sink());

        assert_eq!(ctx.install(&mut interp), Ok(1));
        assert!(ctx.is_installed());
        assert_eq!(ctx.install(&mut interp), Err(InstrumentError::AlreadyInstalled));
        assert_eq!(interp.path_hooks()[0].name, TRACING_HOOK);

        assert_eq!(ctx.uninstall(&mut interp), Ok(1));
        assert_eq!(interp.path_hooks()[0].name, FILE_FINDER_HOOK);
        assert_eq!(ctx.uninstall(&mut interp), Err(InstrumentError::NotInstalled));
    }

    #[test]
    fn test_install_records_runtime_paths() {
        let out = SharedBuffer::new();
        let mut ctx = context(&out);
        let config = InterpreterConfig {
            prefix: "/opt/tracehook".into(),
            ..Default::default()
        };
        let mut interp = Interpreter::with_output(config, out.sink(), out.sink());
        ctx.install(&mut interp).unwrap();
        assert!(ctx.config().ignores_origin(std::path::Path::new("/opt/tracehook/lib/os.py")));
    }

    #[test]
    fn test_main_guard_restores_main_and_argv() {
        let out = SharedBuffer::new();
        let ctx = context(&out);
        let mut interp = Interpreter::with_output(InterpreterConfig::default(), out.sink(), out.sink());
        let original = interp.main_module().unwrap();

        {
            let script = ModuleObject::new("__main__");
            let mut guard = ctx.enter_main(&mut interp, script.clone(), vec!["prog.py".into(), "-v".into()]);
            assert!(Rc::ptr_eq(&guard.main_module().unwrap(), &script));
            let main = guard.main_module().unwrap();
            guard
                .run_source("import sys\nprint(sys.argv)\n", "prog.py", &main)
                .unwrap();
        }

        assert!(Rc::ptr_eq(&interp.main_module().unwrap(), &original));
        assert_eq!(out.contents(), "['prog.py', '-v']\n");
        let argv = interp.sys_module().get("argv").unwrap();
        assert_eq!(interp.repr(&argv).unwrap(), "['']");
    }

    #[test]
    fn test_transform_uses_the_live_policy() {
        let out = SharedBuffer::new();
        let ctx = context(&out);
        let mut module = parse_module("def f():\n    pass\n", "m.py").unwrap();
        ctx.transform(&mut module);
        let def = module.body[0].as_function_def().unwrap();
        assert_eq!(def.decorators[0].as_name(), Some(NAME_TRACE_DECORATOR));

        let mut policy = ctx.config().policy();
        policy.trace_modules = true;
        ctx.config().set_policy(policy);
        let mut module = parse_module("x = 1\n", "m.py").unwrap();
        ctx.transform(&mut module);
        assert_eq!(module.body.len(), 2);
    }
}
