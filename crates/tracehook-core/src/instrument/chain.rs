// Instrumented module-load chain
//
// hook -> finder -> loader. Each link wraps the default one and only changes
// what it has to: the finder swaps in an instrumenting loader, the loader
// turns the bytecode cache off and rewrites the parsed module before
// compiling it.

use std::fmt;
use std::io;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, trace};

use super::transform::trace_transform_module;
use super::{InstrumentationConfig, NAME_TRACE_DECORATOR};
use crate::compile::{compile, Code};
use crate::error::{CacheError, ConsistencyError, ImportError, ParseError};
use crate::import::loader::exec_source_module;
use crate::import::{
    BytecodeCache, Loader, LoaderKind, ModuleSpec, PathEntryFinder, PathHook, PathStats, SourceData,
    SourceFileLoader, SourceLoader, FILE_FINDER_HOOK,
};
use crate::parser::parse_module;
use crate::runtime::{Interpreter, ModuleObject, RtResult, Value};

/// Name of the hook [`patch_path_hooks`] installs
pub const TRACING_HOOK: &str = "tracing_path_hook";

/// Bind the configured tracer in `module`'s namespace
pub fn inject_tracer(module: &ModuleObject, config: &InstrumentationConfig) {
    module.set(NAME_TRACE_DECORATOR, Value::Tracer(config.tracer().clone()));
}

/// Check that `module` still binds the configured tracer
pub fn verify_tracer(module: &ModuleObject, config: &InstrumentationConfig) -> Result<(), ConsistencyError> {
    match module.get(NAME_TRACE_DECORATOR) {
        Some(Value::Tracer(tracer)) if Rc::ptr_eq(&tracer, config.tracer()) => Ok(()),
        _ => Err(ConsistencyError {
            module: module.name.clone(),
            binding: NAME_TRACE_DECORATOR.to_string(),
        }),
    }
}

/// Source loader that instruments every module it compiles. Never touches
/// the bytecode cache.
pub struct TracingSourceLoader {
    inner: SourceFileLoader,
    config: Rc<InstrumentationConfig>,
}

impl TracingSourceLoader {
    pub fn new(inner: SourceFileLoader, config: Rc<InstrumentationConfig>) -> Self {
        Self { inner, config }
    }
}

impl fmt::Debug for TracingSourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingSourceLoader")
            .field("name", &self.inner.name())
            .field("path", &self.inner.path())
            .finish()
    }
}

impl SourceLoader for TracingSourceLoader {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn bytecode_cache(&self) -> &BytecodeCache {
        self.inner.bytecode_cache()
    }

    fn path_stats(&self, _path: &Path) -> io::Result<PathStats> {
        Err(io::Error::other("unknown stats"))
    }

    fn get_data(&self, path: &Path) -> Result<String, ImportError> {
        self.inner.get_data(path)
    }

    fn source_to_code(&self, data: SourceData, path: &Path) -> Result<Code, ParseError> {
        let filename = path.to_string_lossy();
        let mut module = match data {
            SourceData::Text(text) => parse_module(&text, &filename)?,
            SourceData::Unit(module) => module,
        };
        debug!(name = self.name(), path = %path.display(), "instrumenting module");
        trace!(ast = %serde_json::to_string(&module).unwrap_or_default(), "before transform");
        trace_transform_module(&mut module, self.config.policy());
        trace!(ast = %serde_json::to_string(&module).unwrap_or_default(), "after transform");
        compile(module, &filename)
    }

    fn cache_bytecode(&self, _source_path: &Path, _stats: &PathStats, _code: &Code) -> Result<(), CacheError> {
        Err(CacheError::Disabled)
    }
}

impl Loader for TracingSourceLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::Tracing
    }

    fn exec_module(&self, interp: &mut Interpreter, module: &Rc<ModuleObject>) -> RtResult<()> {
        inject_tracer(module, &self.config);
        exec_source_module(self, interp, module)?;
        verify_tracer(module, &self.config)?;
        Ok(())
    }

    fn get_source(&self) -> Result<Option<String>, ImportError> {
        self.inner.get_source()
    }
}

/// Path entry finder handing instrumenting loaders out for source modules
pub struct TracingFinder {
    inner: Rc<dyn PathEntryFinder>,
    config: Rc<InstrumentationConfig>,
}

impl TracingFinder {
    pub fn new(inner: Rc<dyn PathEntryFinder>, config: Rc<InstrumentationConfig>) -> Self {
        Self { inner, config }
    }
}

impl PathEntryFinder for TracingFinder {
    fn find_spec(&self, fullname: &str) -> Option<ModuleSpec> {
        let mut spec = self.inner.find_spec(fullname)?;
        if spec.loader.kind() != LoaderKind::SourceFile {
            return Some(spec);
        }
        if let Some(origin) = &spec.origin {
            if self.config.ignores_origin(origin) {
                trace!(fullname, origin = %origin.display(), "ignored path, not instrumenting");
                return Some(spec);
            }
        }
        if let Some(source) = spec.loader.as_source_file().cloned() {
            trace!(fullname, "wrapping loader");
            spec.loader = Rc::new(TracingSourceLoader::new(source, self.config.clone()));
        }
        Some(spec)
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }
}

fn tracing_path_hook(inner: PathHook, config: Rc<InstrumentationConfig>) -> PathHook {
    let delegate = inner.clone();
    PathHook::wrapping(TRACING_HOOK, inner, move |path: &Path| {
        let finder = delegate.find(path)?;
        Some(Rc::new(TracingFinder::new(finder, config.clone())) as Rc<dyn PathEntryFinder>)
    })
}

/// Wrap every file-finder hook so the finders it creates instrument what
/// they load. Returns the number of hooks replaced.
pub fn patch_path_hooks(interp: &mut Interpreter, config: &Rc<InstrumentationConfig>) -> usize {
    let mut patched = 0;
    for hook in interp.path_hooks_mut().iter_mut() {
        if hook.name == FILE_FINDER_HOOK {
            *hook = tracing_path_hook(hook.clone(), config.clone());
            patched += 1;
        }
    }
    // Finders created before patching would bypass the chain
    interp.clear_path_importer_cache();
    debug!(patched, "path hooks patched");
    patched
}

/// Undo [`patch_path_hooks`]. Returns the number of hooks restored.
pub fn unpatch_path_hooks(interp: &mut Interpreter) -> usize {
    let mut restored = 0;
    for hook in interp.path_hooks_mut().iter_mut() {
        if hook.name != TRACING_HOOK {
            continue;
        }
        if let Some(inner) = hook.inner.clone() {
            *hook = (*inner).clone();
            restored += 1;
        }
    }
    interp.clear_path_importer_cache();
    debug!(restored, "path hooks restored");
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::FileFinder;
    use crate::runtime::{InterpreterConfig, SharedBuffer};
    use crate::tracer::{Tracer, TracerSettings};
    use std::fs;

    fn config(out: &SharedBuffer) -> Rc<InstrumentationConfig> {
        let tracer = Tracer::new(TracerSettings::default(), out.sink());
        Rc::new(InstrumentationConfig::new(tracer))
    }

    fn interpreter(dir: &Path, out: &SharedBuffer) -> Interpreter {
        let settings = InterpreterConfig {
            path: vec![dir.to_path_buf()],
            ..Default::default()
        };
        Interpreter::with_output(settings, out.sink(), out.sink())
    }

    #[test]
    fn test_finder_wraps_source_loaders_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.py"), "x = 1\n").unwrap();
        let out = SharedBuffer::new();
        let config = config(&out);
        let finder = TracingFinder::new(Rc::new(FileFinder::new(dir.path(), BytecodeCache::new(false))), config.clone());

        let spec = finder.find_spec("lib").unwrap();
        assert_eq!(spec.loader.kind(), LoaderKind::Tracing);
        assert_eq!(finder.path(), dir.path());

        config.add_ignore_path(dir.path());
        assert_eq!(finder.find_spec("lib").unwrap().loader.kind(), LoaderKind::SourceFile);
    }

    #[test]
    fn test_instrumented_import_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.py"), "def double(n):\n    return n * 2\n").unwrap();
        let out = SharedBuffer::new();
        let config = config(&out);
        let mut interp = interpreter(dir.path(), &out);
        assert_eq!(patch_path_hooks(&mut interp, &config), 1);

        let module = interp.import_module("lib").unwrap();
        assert!(matches!(module.get(NAME_TRACE_DECORATOR), Some(Value::Tracer(_))));
        assert!(matches!(module.get("double"), Some(Value::Traced(_))));
        assert!(!BytecodeCache::cache_path(&dir.path().join("lib.py")).exists());
    }

    #[test]
    fn test_unpatch_restores_plain_loading() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.py"), "def f():\n    pass\n").unwrap();
        let out = SharedBuffer::new();
        let config = config(&out);
        let mut interp = interpreter(dir.path(), &out);
        patch_path_hooks(&mut interp, &config);
        assert_eq!(interp.path_hooks()[0].name, TRACING_HOOK);
        assert_eq!(unpatch_path_hooks(&mut interp), 1);
        assert_eq!(interp.path_hooks()[0].name, FILE_FINDER_HOOK);

        let module = interp.import_module("lib").unwrap();
        assert!(module.get(NAME_TRACE_DECORATOR).is_none());
        assert!(matches!(module.get("f"), Some(Value::Function(_))));
    }

    #[test]
    fn test_replacing_the_tracer_binding_is_fatal() {
        let out = SharedBuffer::new();
        let config = config(&out);
        let module = ModuleObject::new("rogue");
        inject_tracer(&module, &config);
        assert!(verify_tracer(&module, &config).is_ok());

        let other = Tracer::new(TracerSettings::default(), out.sink());
        module.set(NAME_TRACE_DECORATOR, Value::Tracer(other));
        let err = verify_tracer(&module, &config).unwrap_err();
        assert_eq!(err.module, "rogue");
        assert_eq!(err.binding, NAME_TRACE_DECORATOR);

        module.remove(NAME_TRACE_DECORATOR);
        assert!(verify_tracer(&module, &config).is_err());
    }

    #[test]
    fn test_library_syntax_error_is_catchable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.py"), "def f(:\n    pass\n").unwrap();
        let out = SharedBuffer::new();
        let config = config(&out);
        let mut interp = interpreter(dir.path(), &out);
        patch_path_hooks(&mut interp, &config);

        let main = interp.main_module().unwrap();
        let script = "try:\n    import broken\nexcept SyntaxError as e:\n    print('caught', e.lineno)\n";
        interp.run_source(script, "main.py", &main).unwrap();
        assert_eq!(out.contents(), "caught 1\n");
        assert!(interp.module("broken").is_none());
        assert_eq!(interp.path_hooks()[0].name, TRACING_HOOK);
    }

    #[test]
    fn test_source_to_code_accepts_parsed_units() {
        let out = SharedBuffer::new();
        let loader = TracingSourceLoader::new(
            SourceFileLoader::new("m", "m.py", BytecodeCache::new(false)),
            config(&out),
        );
        let unit = parse_module("def f():\n    pass\n", "m.py").unwrap();
        let code = loader.source_to_code(SourceData::Unit(unit), Path::new("m.py")).unwrap();
        let def = code.module.body[0].as_function_def().unwrap();
        assert_eq!(def.decorators[0].as_name(), Some(NAME_TRACE_DECORATOR));
        assert!(loader.path_stats(Path::new("m.py")).is_err());
    }
}
