//! Module resolution.
//!
//! Imports go through a classic finder/loader pipeline: the builtin importer
//! first, then one [`PathEntryFinder`] per `sys.path` entry, created by the
//! first path hook that accepts the entry and memoized in the path importer
//! cache. A finder turns a name into a [`ModuleSpec`]; the spec's [`Loader`]
//! executes the module. The instrumentation chain plugs in by replacing the
//! file-finder hook.

pub mod cache;
pub mod finder;
pub mod loader;

pub use cache::{BytecodeCache, PathStats};
pub use finder::{file_finder_hook, FileFinder, ModuleSpec, PathEntryFinder, PathHook, FILE_FINDER_HOOK};
pub use loader::{BuiltinImporter, Loader, LoaderKind, SourceData, SourceFileLoader, SourceLoader};

use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::ImportError;
use crate::runtime::{ExcKind, Interpreter, ModuleObject, RtResult, RuntimeError, Value};

/// The hook list a fresh interpreter starts with
pub fn default_path_hooks(cache: BytecodeCache) -> Vec<PathHook> {
    vec![file_finder_hook(cache)]
}

impl Interpreter {
    /// Import `name` (dotted names import their parents first) and return
    /// the module registered under it
    pub fn import_module(&mut self, name: &str) -> RtResult<Rc<ModuleObject>> {
        if name.starts_with('.') {
            return Err(self.import_failure(ImportError::Relative));
        }
        if let Some(module) = self.module(name) {
            return Ok(module);
        }
        let (search, parent) = match name.rsplit_once('.') {
            Some((parent_name, _)) => {
                let parent = self.import_module(parent_name)?;
                // The parent's own body may have imported us
                if let Some(module) = self.module(name) {
                    return Ok(module);
                }
                let Some(search) = package_path(&parent) else {
                    return Err(self.import_failure(ImportError::NotFound(name.to_string())));
                };
                (Some(search), Some(parent))
            }
            None => (None, None),
        };
        let spec = self
            .find_spec(name, search.as_deref())
            .ok_or_else(|| self.import_failure(ImportError::NotFound(name.to_string())))?;
        let module = self.load_spec(&spec)?;
        if let (Some(parent), Some((_, child))) = (parent, name.rsplit_once('.')) {
            parent.set(child, Value::Module(module.clone()));
        }
        Ok(module)
    }

    /// `from module import name`, falling back to a submodule of a package
    pub fn import_from(&mut self, module: &Rc<ModuleObject>, name: &str) -> RtResult<Value> {
        if let Some(value) = module.get(name) {
            return Ok(value);
        }
        let not_found = || ImportError::NameNotFound {
            name: name.to_string(),
            module: module.name.clone(),
        };
        if package_path(module).is_none() {
            return Err(self.import_failure(not_found()));
        }
        let fullname = format!("{}.{name}", module.name);
        match self.import_module(&fullname) {
            Ok(submodule) => Ok(Value::Module(submodule)),
            Err(RuntimeError::Raised(exc))
                if self.exception_is(&exc, ExcKind::ModuleNotFoundError)
                    && exc.value.dict.borrow().get("name").and_then(Value::as_str) == Some(fullname.as_str()) =>
            {
                Err(self.import_failure(not_found()))
            }
            Err(err) => Err(err),
        }
    }

    /// Resolve `name` without loading it. `search` restricts the lookup to
    /// a package's directories; top-level names also consult the builtin
    /// importer and then `sys.path`.
    pub fn find_spec(&mut self, name: &str, search: Option<&[PathBuf]>) -> Option<ModuleSpec> {
        if search.is_none() && BuiltinImporter::handles(name) {
            return Some(ModuleSpec {
                name: name.to_string(),
                loader: Rc::new(BuiltinImporter),
                origin: None,
                submodule_search_locations: None,
            });
        }
        let entries = match search {
            Some(dirs) => dirs.to_vec(),
            None => self.sys_path(),
        };
        for entry in entries {
            let Some(finder) = self.path_entry_finder(&entry) else {
                continue;
            };
            if let Some(spec) = finder.find_spec(name) {
                debug!(name, ?spec, "resolved module");
                return Some(spec);
            }
        }
        trace!(name, "module not found");
        None
    }

    /// Resolve a possibly dotted name without loading it. Parent packages
    /// are imported, the module itself is not.
    pub fn find_module_spec(&mut self, name: &str) -> RtResult<Option<ModuleSpec>> {
        if name.starts_with('.') {
            return Err(self.import_failure(ImportError::Relative));
        }
        match name.rsplit_once('.') {
            Some((parent_name, _)) => {
                let parent = self.import_module(parent_name)?;
                match package_path(&parent) {
                    Some(search) => Ok(self.find_spec(name, Some(&search))),
                    None => Ok(None),
                }
            }
            None => Ok(self.find_spec(name, None)),
        }
    }

    /// Finder for one `sys.path` entry, memoized per entry
    fn path_entry_finder(&mut self, entry: &Path) -> Option<Rc<dyn PathEntryFinder>> {
        let entry = if entry.as_os_str().is_empty() {
            Path::new(".")
        } else {
            entry
        };
        if let Some(cached) = self.path_importer_cache().get(entry) {
            return cached.clone();
        }
        let finder = self
            .path_hooks()
            .to_vec()
            .iter()
            .find_map(|hook| hook.find(entry));
        trace!(entry = %entry.display(), found = finder.is_some(), "path importer cache fill");
        self.path_importer_cache_mut()
            .insert(entry.to_path_buf(), finder.clone());
        finder
    }

    /// Create, register and execute the module `spec` describes. A module
    /// whose execution fails is removed from the registry again.
    pub fn load_spec(&mut self, spec: &ModuleSpec) -> RtResult<Rc<ModuleObject>> {
        let module = spec
            .loader
            .create_module(self, &spec.name)
            .unwrap_or_else(|| ModuleObject::new(&spec.name));
        if let Some(origin) = &spec.origin {
            module.set("__file__", Value::str(origin.to_string_lossy()));
        }
        if let Some(dirs) = &spec.submodule_search_locations {
            module.set(
                "__path__",
                Value::list(dirs.iter().map(|d| Value::str(d.to_string_lossy())).collect()),
            );
        }
        self.register_module(&spec.name, module.clone());
        debug!(name = %spec.name, loader = ?spec.loader.kind(), "executing module");
        if let Err(err) = spec.loader.exec_module(self, &module) {
            self.remove_module(&spec.name);
            return Err(err);
        }
        Ok(self.module(&spec.name).unwrap_or(module))
    }
}

/// Directories of a package module, `None` for plain modules
fn package_path(module: &ModuleObject) -> Option<Vec<PathBuf>> {
    match module.get("__path__") {
        Some(Value::List(items)) => Some(
            items
                .borrow()
                .iter()
                .filter_map(|item| item.as_str().map(PathBuf::from))
                .collect(),
        ),
        _ => None,
    }
}
