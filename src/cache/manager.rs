use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cache::entry::{CACHE_FORMAT_VERSION, CacheEntry, CacheFile};
use crate::cache::path::{cache_file, cache_root, ensure_structure, project_id};
use crate::execute::protocol::WorkerResult;
use crate::resolve::ExecutionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    PreviousFailure,
    BodyChanged,
    ReturnTypeChanged,
    StrategyChanged,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreviousFailure => "previous execution failed",
            Self::BodyChanged => "function body changed",
            Self::ReturnTypeChanged => "return type changed",
            Self::StrategyChanged => "cache strategy changed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Valid entry; the synthesised response carries the primary invocation id.
    Hit(WorkerResult),
    Miss,
    Invalidated(InvalidationReason),
    /// Strategy `never`: the cache is not consulted and any old entry is dropped.
    Bypass,
}

impl CacheLookup {
    pub fn needs_execution(&self) -> bool {
        !matches!(self, Self::Hit(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub invalidations: usize,
    pub bypassed: usize,
    pub stored: usize,
}

impl CacheStats {
    pub fn lookups(&self) -> usize {
        self.hits + self.misses + self.invalidations
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

/// Owns every cache entry of one project for the duration of a build.
pub struct CacheManager {
    path: PathBuf,
    project: String,
    entries: BTreeMap<String, CacheEntry>,
    stats: CacheStats,
}

impl CacheManager {
    /// Loads the project's cache, treating unreadable or foreign files as empty.
    pub fn open(root_override: Option<&Path>, project_dir: &Path) -> Result<Self> {
        let root = cache_root(root_override)?;
        let project = project_id(project_dir);
        ensure_structure(&root, &project)?;
        let path = cache_file(&root, &project);

        debug!(path = %path.display(), "cache file");

        let entries = if path.exists() {
            match CacheFile::read_from_yaml(&path) {
                Ok(file) if file.version == CACHE_FORMAT_VERSION => file.entries,
                Ok(file) => {
                    warn!(
                        found = file.version,
                        expected = CACHE_FORMAT_VERSION,
                        "ignoring cache written by another format version"
                    );
                    BTreeMap::new()
                }
                Err(err) => {
                    warn!(path = %path.display(), "ignoring unreadable cache: {err:#}");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            project,
            entries,
            stats: CacheStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn get(&self, cache_key: &str) -> Option<&CacheEntry> {
        self.entries.get(cache_key)
    }

    pub fn lookup(&mut self, request: &ExecutionRequest) -> CacheLookup {
        let function = &request.function;
        let strategy = function.config.cache;
        if !strategy.uses_cache() {
            self.stats.bypassed += 1;
            let dropped = self.entries.remove(&request.cache_key).is_some();
            debug!(key = %request.dedup_key, dropped, "cache bypassed");
            return CacheLookup::Bypass;
        }

        let Some(entry) = self.entries.get(&request.cache_key) else {
            self.stats.misses += 1;
            debug!(key = %request.dedup_key, "cache miss");
            return CacheLookup::Miss;
        };

        let reason = if !entry.success {
            Some(InvalidationReason::PreviousFailure)
        } else if entry.content_hash != function.content_hash {
            Some(InvalidationReason::BodyChanged)
        } else if entry.return_type != function.return_type() {
            Some(InvalidationReason::ReturnTypeChanged)
        } else if entry.persistent != strategy.is_persistent() {
            Some(InvalidationReason::StrategyChanged)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.stats.invalidations += 1;
                self.entries.remove(&request.cache_key);
                info!(key = %request.dedup_key, %reason, "cache entry invalidated");
                CacheLookup::Invalidated(reason)
            }
            None => {
                self.stats.hits += 1;
                debug!(key = %request.dedup_key, "cache hit");
                CacheLookup::Hit(entry.to_result(request.primary_id()))
            }
        }
    }

    /// Records a fresh execution; failures and `never` functions are not kept.
    pub fn store(&mut self, request: &ExecutionRequest, result: &WorkerResult) {
        let strategy = request.function.config.cache;
        if !strategy.uses_cache() || !result.success {
            return;
        }
        let entry = CacheEntry::new(
            request.cache_key.clone(),
            request.function.qualified_name(),
            request.function.content_hash.clone(),
            request.function.return_type(),
            result,
            strategy.is_persistent(),
        );
        self.entries.insert(request.cache_key.clone(), entry);
        self.stats.stored += 1;
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Writes persistent entries back to disk.
    pub fn persist(&self) -> Result<()> {
        let mut file = CacheFile::new(self.project.clone());
        file.entries = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.persistent)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        file.write_to_yaml(&self.path)?;
        debug!(entries = file.entries.len(), "cache persisted");
        Ok(())
    }
}
