// Path entry finders and the hooks that create them

use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::trace;

use super::cache::BytecodeCache;
use super::loader::{Loader, SourceFileLoader};

/// Name of the default hook creating a [`FileFinder`] for a directory
pub const FILE_FINDER_HOOK: &str = "path_hook_for_file_finder";

/// A resolved module: where it lives and which loader runs it
#[derive(Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub loader: Rc<dyn Loader>,
    pub origin: Option<PathBuf>,
    /// Directories searched for submodules; set for packages only
    pub submodule_search_locations: Option<Vec<PathBuf>>,
}

impl ModuleSpec {
    pub fn is_package(&self) -> bool {
        self.submodule_search_locations.is_some()
    }
}

impl fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("name", &self.name)
            .field("loader", &self.loader.kind())
            .field("origin", &self.origin)
            .field("submodule_search_locations", &self.submodule_search_locations)
            .finish()
    }
}

/// Resolves module names inside one `sys.path` entry
pub trait PathEntryFinder {
    fn find_spec(&self, fullname: &str) -> Option<ModuleSpec>;

    fn path(&self) -> &Path;
}

/// Looks for `<name>.py` or `<name>/__init__.py` in a directory
#[derive(Debug, Clone)]
pub struct FileFinder {
    path: PathBuf,
    cache: BytecodeCache,
}

impl FileFinder {
    pub fn new(path: impl Into<PathBuf>, cache: BytecodeCache) -> Self {
        Self {
            path: path.into(),
            cache,
        }
    }
}

impl PathEntryFinder for FileFinder {
    fn find_spec(&self, fullname: &str) -> Option<ModuleSpec> {
        let tail = fullname.rsplit('.').next().unwrap_or(fullname);
        let package = self.path.join(tail);
        let init = package.join("__init__.py");
        let (origin, search) = if init.is_file() {
            (init, Some(vec![package]))
        } else {
            let file = self.path.join(format!("{tail}.py"));
            if !file.is_file() {
                return None;
            }
            (file, None)
        };
        trace!(fullname, origin = %origin.display(), "file finder hit");
        Some(ModuleSpec {
            name: fullname.to_string(),
            loader: Rc::new(SourceFileLoader::new(fullname, &origin, self.cache.clone())),
            origin: Some(origin),
            submodule_search_locations: search,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

pub type PathHookFn = dyn Fn(&Path) -> Option<Rc<dyn PathEntryFinder>>;

/// A named entry of the interpreter's path hook list
#[derive(Clone)]
pub struct PathHook {
    pub name: String,
    func: Rc<PathHookFn>,
    /// The hook this one wraps, restored when the wrapper is removed
    pub inner: Option<Rc<PathHook>>,
}

impl PathHook {
    pub fn new(name: impl Into<String>, func: impl Fn(&Path) -> Option<Rc<dyn PathEntryFinder>> + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
            inner: None,
        }
    }

    /// A hook wrapping `inner`
    pub fn wrapping(
        name: impl Into<String>,
        inner: PathHook,
        func: impl Fn(&Path) -> Option<Rc<dyn PathEntryFinder>> + 'static,
    ) -> Self {
        Self {
            inner: Some(Rc::new(inner)),
            ..Self::new(name, func)
        }
    }

    /// Finder for `path`, `None` when this hook does not handle it
    pub fn find(&self, path: &Path) -> Option<Rc<dyn PathEntryFinder>> {
        (self.func)(path)
    }
}

impl fmt::Debug for PathHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathHook")
            .field("name", &self.name)
            .field("inner", &self.inner.as_ref().map(|hook| hook.name.clone()))
            .finish()
    }
}

/// Hook producing a [`FileFinder`] for any existing directory
pub fn file_finder_hook(cache: BytecodeCache) -> PathHook {
    PathHook::new(FILE_FINDER_HOOK, move |path: &Path| {
        path.is_dir()
            .then(|| Rc::new(FileFinder::new(path, cache.clone())) as Rc<dyn PathEntryFinder>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::loader::LoaderKind;
    use std::fs;

    #[test]
    fn test_finds_module_and_package() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("single.py"), "").unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("__init__.py"), "").unwrap();
        let finder = FileFinder::new(dir.path(), BytecodeCache::new(false));

        let spec = finder.find_spec("single").unwrap();
        assert!(!spec.is_package());
        assert_eq!(spec.loader.kind(), LoaderKind::SourceFile);
        assert_eq!(spec.origin, Some(dir.path().join("single.py")));

        let spec = finder.find_spec("pkg").unwrap();
        assert!(spec.is_package());
        assert_eq!(spec.submodule_search_locations, Some(vec![dir.path().join("pkg")]));

        assert!(finder.find_spec("missing").is_none());
    }

    #[test]
    fn test_dotted_names_resolve_by_last_component() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("leaf.py"), "").unwrap();
        let finder = FileFinder::new(dir.path(), BytecodeCache::new(false));
        assert_eq!(finder.find_spec("pkg.leaf").unwrap().name, "pkg.leaf");
    }

    #[test]
    fn test_file_finder_hook_rejects_non_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "").unwrap();
        let hook = file_finder_hook(BytecodeCache::new(false));
        assert!(hook.find(dir.path()).is_some());
        assert!(hook.find(&file).is_none());
        assert_eq!(hook.name, FILE_FINDER_HOOK);
    }
}
