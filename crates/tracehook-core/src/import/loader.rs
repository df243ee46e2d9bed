// Loaders: turn a resolved module spec into an executed module

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, trace};

use super::cache::{BytecodeCache, PathStats};
use crate::ast::Module;
use crate::compile::{compile, Code};
use crate::error::{CacheError, ImportError, ParseError};
use crate::parser::parse_module;
use crate::runtime::builtins::{self, BUILTIN_MODULES};
use crate::runtime::{Interpreter, ModuleObject, RtResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    /// Natively implemented module
    Builtin,
    /// Plain source file loader
    SourceFile,
    /// Source loader that instruments what it compiles
    Tracing,
}

pub trait Loader {
    fn kind(&self) -> LoaderKind;

    /// Module object to execute into; `None` lets the import system create
    /// an empty one
    fn create_module(&self, _interp: &Interpreter, _name: &str) -> Option<Rc<ModuleObject>> {
        None
    }

    fn exec_module(&self, interp: &mut Interpreter, module: &Rc<ModuleObject>) -> RtResult<()>;

    /// Source text of the module, when the loader has one
    fn get_source(&self) -> Result<Option<String>, ImportError> {
        Ok(None)
    }

    fn as_source_file(&self) -> Option<&SourceFileLoader> {
        None
    }
}

impl fmt::Debug for dyn Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:?} loader>", self.kind())
    }
}

/// Input to [`SourceLoader::source_to_code`]
#[derive(Debug, Clone)]
pub enum SourceData {
    Text(String),
    /// An already parsed unit
    Unit(Module),
}

/// The source-loader protocol. [`SourceLoader::get_code`] drives the other
/// methods: stats, cache lookup, read, compile, cache store. Implementors
/// change behavior by overriding the individual steps.
pub trait SourceLoader {
    fn name(&self) -> &str;
    fn path(&self) -> &Path;
    fn bytecode_cache(&self) -> &BytecodeCache;

    fn path_stats(&self, path: &Path) -> std::io::Result<PathStats> {
        PathStats::of(path)
    }

    fn get_data(&self, path: &Path) -> Result<String, ImportError> {
        fs::read_to_string(path).map_err(|err| ImportError::Io {
            reason: io_reason(&err),
            path: path.to_path_buf(),
        })
    }

    fn source_to_code(&self, data: SourceData, path: &Path) -> Result<Code, ParseError> {
        let filename = path.to_string_lossy();
        let module = match data {
            SourceData::Text(text) => parse_module(&text, &filename)?,
            SourceData::Unit(module) => module,
        };
        compile(module, &filename)
    }

    fn cache_bytecode(&self, source_path: &Path, stats: &PathStats, code: &Code) -> Result<(), CacheError> {
        self.bytecode_cache().store(source_path, stats, code)
    }

    fn get_code(&self) -> Result<Code, ImportError> {
        let path = self.path();
        let stats = match self.path_stats(path) {
            Ok(stats) => Some(stats),
            Err(err) => {
                trace!(path = %path.display(), %err, "no source stats, bypassing cache");
                None
            }
        };
        if let Some(stats) = &stats {
            match self.bytecode_cache().load(path, stats) {
                Ok(code) => return Ok(code),
                Err(err) => trace!(path = %path.display(), %err, "cache miss"),
            }
        }
        let source = self.get_data(path)?;
        let code = self
            .source_to_code(SourceData::Text(source.clone()), path)
            .map_err(|err| err.with_source_line(&source))?
            .with_source(source);
        if let Some(stats) = &stats {
            if let Err(err) = self.cache_bytecode(path, stats, &code) {
                trace!(path = %path.display(), %err, "compiled unit not cached");
            }
        }
        Ok(code)
    }
}

/// Lowercased OS error text without the `(os error N)` suffix
pub fn io_reason(err: &std::io::Error) -> String {
    let text = match err.kind() {
        std::io::ErrorKind::NotFound => "no such file or directory".to_string(),
        std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => err.to_string(),
    };
    let text = match text.find(" (os error") {
        Some(end) => text[..end].to_string(),
        None => text,
    };
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => text,
    }
}

/// Execute the unit a source loader produces into `module`
pub fn exec_source_module(
    loader: &dyn SourceLoader,
    interp: &mut Interpreter,
    module: &Rc<ModuleObject>,
) -> RtResult<()> {
    let code = loader.get_code().map_err(|err| interp.import_failure(err))?;
    interp.exec_code(&code, module)
}

/// Loads a module from a `.py` file
#[derive(Debug, Clone)]
pub struct SourceFileLoader {
    name: String,
    path: PathBuf,
    cache: BytecodeCache,
}

impl SourceFileLoader {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, cache: BytecodeCache) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            cache,
        }
    }
}

impl SourceLoader for SourceFileLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn bytecode_cache(&self) -> &BytecodeCache {
        &self.cache
    }
}

impl Loader for SourceFileLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::SourceFile
    }

    fn exec_module(&self, interp: &mut Interpreter, module: &Rc<ModuleObject>) -> RtResult<()> {
        debug!(name = %self.name, path = %self.path.display(), "loading source module");
        exec_source_module(self, interp, module)
    }

    fn get_source(&self) -> Result<Option<String>, ImportError> {
        self.get_data(&self.path).map(Some)
    }

    fn as_source_file(&self) -> Option<&SourceFileLoader> {
        Some(self)
    }
}

/// Finder and loader for the natively implemented modules
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinImporter;

impl BuiltinImporter {
    pub fn handles(name: &str) -> bool {
        BUILTIN_MODULES.contains(&name)
    }
}

impl Loader for BuiltinImporter {
    fn kind(&self) -> LoaderKind {
        LoaderKind::Builtin
    }

    fn create_module(&self, interp: &Interpreter, name: &str) -> Option<Rc<ModuleObject>> {
        builtins::create_module(interp, name)
    }

    fn exec_module(&self, _interp: &mut Interpreter, _module: &Rc<ModuleObject>) -> RtResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_reason_is_lowercase_without_os_code() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(io_reason(&err), "no such file or directory");
        let err = std::io::Error::new(std::io::ErrorKind::Other, "Disk on fire");
        assert_eq!(io_reason(&err), "disk on fire");
    }

    #[test]
    fn test_get_code_writes_then_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        fs::write(&path, "x = 1\n").unwrap();
        let loader = SourceFileLoader::new("mod", &path, BytecodeCache::new(true));

        let first = loader.get_code().unwrap();
        assert!(BytecodeCache::cache_path(&path).is_file());
        let second = loader.get_code().unwrap();
        assert_eq!(first, second);
        assert_eq!(second.source.as_deref(), Some("x = 1\n"));
    }

    #[test]
    fn test_get_code_reports_syntax_errors_with_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.py");
        fs::write(&path, "x = = 1\n").unwrap();
        let loader = SourceFileLoader::new("bad", &path, BytecodeCache::new(false));
        match loader.get_code() {
            Err(ImportError::Parse(err)) => {
                assert_eq!(err.line, 1);
                assert_eq!(err.text.as_deref(), Some("x = = 1"));
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let loader = SourceFileLoader::new("gone", "/nonexistent/gone.py", BytecodeCache::new(false));
        let err = loader.get_code().unwrap_err();
        assert_eq!(err.to_string(), "no such file or directory: /nonexistent/gone.py");
    }
}
