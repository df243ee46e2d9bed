//! Load-time instrumentation.
//!
//! [`inject::inject_decorator`] decorates function definitions with the
//! tracer binding, [`transform::trace_transform_module`] applies it (and the
//! optional whole-module wrap) to a parsed module, and [`chain`] splices that
//! transform into module resolution. [`context::ProcessInstrumentationContext`]
//! owns the shared configuration and the install/uninstall lifecycle.

pub mod chain;
pub mod context;
pub mod inject;
pub mod transform;

pub use chain::{
    inject_tracer, patch_path_hooks, unpatch_path_hooks, verify_tracer, TracingFinder, TracingSourceLoader,
    TRACING_HOOK,
};
pub use context::{MainModuleGuard, ProcessInstrumentationContext};
pub use inject::{inject_decorator, InjectOptions};
pub use transform::trace_transform_module;

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::tracer::Tracer;

/// Namespace binding instrumented functions are decorated with. Not a valid
/// identifier, so user code cannot collide with it.
pub const NAME_TRACE_DECORATOR: &str = "__trace-wrap";

/// Name of the function a whole module body is wrapped into
pub const NAME_TRACE_MODULE_FN: &str = "__trace-module-main";

/// Which definitions get instrumented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracePolicy {
    pub trace_methods: bool,
    /// Wrap module top-level statements in a traced function
    pub trace_modules: bool,
    pub trace_nested: bool,
}

impl Default for TracePolicy {
    fn default() -> Self {
        Self {
            trace_methods: true,
            trace_modules: false,
            trace_nested: true,
        }
    }
}

/// Process-wide instrumentation settings, shared by every link of the load
/// chain. Holds the one tracer all instrumented code is decorated with.
#[derive(Debug)]
pub struct InstrumentationConfig {
    tracer: Rc<Tracer>,
    policy: Cell<TracePolicy>,
    ignore_module_paths: RefCell<Vec<PathBuf>>,
    install_paths: RefCell<Vec<PathBuf>>,
}

impl InstrumentationConfig {
    pub fn new(tracer: Rc<Tracer>) -> Self {
        Self::with_policy(tracer, TracePolicy::default())
    }

    pub fn with_policy(tracer: Rc<Tracer>, policy: TracePolicy) -> Self {
        Self {
            tracer,
            policy: Cell::new(policy),
            ignore_module_paths: RefCell::new(Vec::new()),
            install_paths: RefCell::new(Vec::new()),
        }
    }

    pub fn tracer(&self) -> &Rc<Tracer> {
        &self.tracer
    }

    pub fn policy(&self) -> TracePolicy {
        self.policy.get()
    }

    pub fn set_policy(&self, policy: TracePolicy) {
        self.policy.set(policy);
    }

    pub fn add_ignore_path(&self, path: impl Into<PathBuf>) {
        self.ignore_module_paths.borrow_mut().push(path.into());
    }

    pub fn ignore_module_paths(&self) -> Vec<PathBuf> {
        self.ignore_module_paths.borrow().clone()
    }

    /// Record the runtime's own module directories; always ignored
    pub fn set_install_paths(&self, paths: Vec<PathBuf>) {
        *self.install_paths.borrow_mut() = paths;
    }

    /// Whether modules loaded from `origin` stay uninstrumented
    pub fn ignores_origin(&self, origin: &Path) -> bool {
        let installed = self.install_paths.borrow();
        let extra = self.ignore_module_paths.borrow();
        installed
            .iter()
            .chain(extra.iter())
            .any(|root| origin.starts_with(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::TracerSettings;

    #[test]
    fn test_ignore_paths_match_by_component() {
        let config = InstrumentationConfig::new(Tracer::stderr(TracerSettings::default()));
        config.set_install_paths(vec![PathBuf::from("/opt/tracehook/lib")]);
        config.add_ignore_path("/home/me/vendor");

        assert!(config.ignores_origin(Path::new("/opt/tracehook/lib/util.py")));
        assert!(config.ignores_origin(Path::new("/home/me/vendor/pkg/__init__.py")));
        assert!(!config.ignores_origin(Path::new("/home/me/vendored.py")));
        assert!(!config.ignores_origin(Path::new("/home/me/project/main.py")));
    }

    #[test]
    fn test_policy_defaults() {
        let policy = TracePolicy::default();
        assert!(policy.trace_methods && policy.trace_nested);
        assert!(!policy.trace_modules);
    }
}
