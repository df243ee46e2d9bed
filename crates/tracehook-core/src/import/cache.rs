// Compiled-unit cache stored next to module sources

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::compile::Code;
use crate::error::CacheError;

/// Directory created beside a module's source to hold its cache entry
pub const CACHE_DIR: &str = "__tracecache__";
pub const CACHE_SUFFIX: &str = "tcache";

/// Source file stamp an entry is validated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStats {
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
    pub size: u64,
}

impl PathStats {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Self {
            mtime_secs: mtime.as_secs(),
            mtime_nanos: mtime.subsec_nanos(),
            size: metadata.len(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    stats: PathStats,
    code: Code,
}

#[derive(Debug, Clone)]
pub struct BytecodeCache {
    write: bool,
}

impl BytecodeCache {
    pub fn new(write: bool) -> Self {
        Self { write }
    }

    pub fn writes_enabled(&self) -> bool {
        self.write
    }

    /// `dir/__tracecache__/<stem>.tcache` for `dir/<stem>.py`
    pub fn cache_path(source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        source
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(CACHE_DIR)
            .join(format!("{stem}.{CACHE_SUFFIX}"))
    }

    /// The cached unit for `source`, if one exists and matches `stats`
    pub fn load(&self, source: &Path, stats: &PathStats) -> Result<Code, CacheError> {
        let entry_path = Self::cache_path(source);
        let bytes = fs::read(&entry_path)?;
        let entry: CacheEntry = bincode::deserialize(&bytes)?;
        if entry.stats != *stats {
            return Err(CacheError::Stale(entry_path));
        }
        trace!(path = %entry_path.display(), "cache hit");
        Ok(entry.code)
    }

    pub fn store(&self, source: &Path, stats: &PathStats, code: &Code) -> Result<(), CacheError> {
        if !self.write {
            return Err(CacheError::Disabled);
        }
        let entry_path = Self::cache_path(source);
        if let Some(dir) = entry_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let entry = CacheEntry {
            stats: *stats,
            code: code.clone(),
        };
        let bytes = bincode::serialize(&entry)?;
        // Write then rename so a concurrent reader never sees half an entry
        let partial = entry_path.with_extension(format!("{CACHE_SUFFIX}.partial"));
        fs::write(&partial, bytes)?;
        fs::rename(&partial, &entry_path)?;
        debug!(path = %entry_path.display(), "cache entry written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::parser::parse_module;

    fn code_for(source: &str, path: &Path) -> Code {
        let filename = path.to_string_lossy();
        compile(parse_module(source, &filename).unwrap(), &filename)
            .unwrap()
            .with_source(source)
    }

    #[test]
    fn test_cache_path_layout() {
        assert_eq!(
            BytecodeCache::cache_path(Path::new("/lib/pkg/util.py")),
            PathBuf::from("/lib/pkg/__tracecache__/util.tcache")
        );
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("mod.py");
        fs::write(&source, "x = 1\n").unwrap();
        let stats = PathStats::of(&source).unwrap();
        let cache = BytecodeCache::new(true);
        let code = code_for("x = 1\n", &source);

        assert!(cache.load(&source, &stats).is_err());
        cache.store(&source, &stats, &code).unwrap();
        assert_eq!(cache.load(&source, &stats).unwrap(), code);
    }

    #[test]
    fn test_stale_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("mod.py");
        fs::write(&source, "x = 1\n").unwrap();
        let stats = PathStats::of(&source).unwrap();
        let cache = BytecodeCache::new(true);
        cache.store(&source, &stats, &code_for("x = 1\n", &source)).unwrap();

        let changed = PathStats {
            size: stats.size + 1,
            ..stats
        };
        assert!(matches!(cache.load(&source, &changed), Err(CacheError::Stale(_))));
    }

    #[test]
    fn test_disabled_cache_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("mod.py");
        fs::write(&source, "x = 1\n").unwrap();
        let stats = PathStats::of(&source).unwrap();
        let cache = BytecodeCache::new(false);
        let result = cache.store(&source, &stats, &code_for("x = 1\n", &source));
        assert!(matches!(result, Err(CacheError::Disabled)));
        assert!(!dir.path().join(CACHE_DIR).exists());
    }
}
