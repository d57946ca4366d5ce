//! Verification result storage.
//!
//! Results are keyed by scope (`core` or an app id). Three implementations:
//!
//! - [`MemoryResultStore`]: process-local, for tests and one-shot runs
//! - [`FileResultStore`]: one JSON document on disk, rewritten atomically
//! - [`CachedResultStore`]: memory in front of a durable store; the durable
//!   store stays the source of truth

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::diff::DifferenceReport;
use crate::error::IntegrityError;
use crate::manifest::write_file_atomic;

/// Per-scope store of the last verification result.
pub trait ResultStore: Send + Sync {
    /// Last stored report for `scope`.
    fn get(&self, scope: &str) -> Option<DifferenceReport>;

    /// Replace the report for `scope`.
    fn set(&self, scope: &str, report: &DifferenceReport) -> Result<(), IntegrityError>;

    /// Forget the report for `scope`.
    fn remove(&self, scope: &str) -> Result<(), IntegrityError>;

    /// Every stored report.
    fn all(&self) -> BTreeMap<String, DifferenceReport>;
}

/// In-memory result store.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: RwLock<HashMap<String, DifferenceReport>>,
}

impl MemoryResultStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryResultStore {
    fn get(&self, scope: &str) -> Option<DifferenceReport> {
        self.results
            .read()
            .ok()
            .and_then(|results| results.get(scope).cloned())
    }

    fn set(&self, scope: &str, report: &DifferenceReport) -> Result<(), IntegrityError> {
        let mut results = self.results.write().map_err(|_| lock_poisoned())?;
        results.insert(scope.to_string(), report.clone());
        Ok(())
    }

    fn remove(&self, scope: &str) -> Result<(), IntegrityError> {
        let mut results = self.results.write().map_err(|_| lock_poisoned())?;
        results.remove(scope);
        Ok(())
    }

    fn all(&self) -> BTreeMap<String, DifferenceReport> {
        self.results
            .read()
            .map(|results| {
                results
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn lock_poisoned() -> IntegrityError {
    IntegrityError::Serialization("result store lock poisoned".into())
}

/// On-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedResults {
    /// RFC 3339 time of the last write.
    #[serde(default)]
    updated_at: Option<String>,
    /// Scope → report.
    #[serde(default)]
    results: BTreeMap<String, DifferenceReport>,
}

/// Durable result store backed by a single JSON file.
///
/// Every update is read-modify-write under a mutex and lands on disk via
/// temp file + rename, so readers never see a torn document.
#[derive(Debug)]
pub struct FileResultStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileResultStore {
    /// Create a store persisting to `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing file is an empty document, and so is a
    /// corrupt one; any other read error is returned.
    fn load(&self) -> Result<PersistedResults, IntegrityError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %self.path.display(), "Store: no results file yet");
                return Ok(PersistedResults::default());
            },
            Err(e) => return Err(IntegrityError::io(&self.path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(results) => Ok(results),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "Store: results file is corrupt, ignoring: {}", e
                );
                Ok(PersistedResults::default())
            },
        }
    }

    /// Stored results, or none if the file cannot be read.
    fn load_results(&self) -> BTreeMap<String, DifferenceReport> {
        match self.load() {
            Ok(persisted) => persisted.results,
            Err(e) => {
                warn!("Store: cannot read results: {}", e);
                BTreeMap::new()
            },
        }
    }

    fn update(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, DifferenceReport>),
    ) -> Result<(), IntegrityError> {
        let _guard = self.write_lock.lock().map_err(|_| lock_poisoned())?;
        // An unreadable document must not be replaced by a one-scope document
        let mut persisted = self.load()?;
        apply(&mut persisted.results);
        persisted.updated_at = Some(chrono::Utc::now().to_rfc3339());

        let bytes = serde_json::to_vec_pretty(&persisted)?;
        write_file_atomic(&self.path, &bytes)?;
        debug!(
            path = %self.path.display(),
            scopes = persisted.results.len(),
            "Store: persisted results"
        );
        Ok(())
    }
}

impl ResultStore for FileResultStore {
    fn get(&self, scope: &str) -> Option<DifferenceReport> {
        self.load_results().remove(scope)
    }

    fn set(&self, scope: &str, report: &DifferenceReport) -> Result<(), IntegrityError> {
        self.update(|results| {
            results.insert(scope.to_string(), report.clone());
        })
    }

    fn remove(&self, scope: &str) -> Result<(), IntegrityError> {
        self.update(|results| {
            results.remove(scope);
        })
    }

    fn all(&self) -> BTreeMap<String, DifferenceReport> {
        self.load_results()
    }
}

/// Memory cache over a durable store.
///
/// Reads are served from memory when possible and fall back to the durable
/// store, repopulating the cache. Writes go to the durable store first; the
/// cache is only updated once that succeeds.
///
/// The cache write lock is held across every durable write and every
/// repopulation, so the cache never holds a report the durable store has
/// already replaced.
#[derive(Debug)]
pub struct CachedResultStore<D> {
    cache: RwLock<HashMap<String, DifferenceReport>>,
    durable: D,
}

impl<D: ResultStore> CachedResultStore<D> {
    /// Wrap `durable` with an empty cache.
    pub fn new(durable: D) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            durable,
        }
    }

    /// The durable layer.
    pub fn durable(&self) -> &D {
        &self.durable
    }

    /// Drop every cached entry.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }
}

impl<D: ResultStore> ResultStore for CachedResultStore<D> {
    fn get(&self, scope: &str) -> Option<DifferenceReport> {
        if let Some(report) = self.cache.read().ok().and_then(|c| c.get(scope).cloned()) {
            trace!(scope, "Store: cache hit");
            return Some(report);
        }

        let Ok(mut cache) = self.cache.write() else {
            return self.durable.get(scope);
        };
        // A writer may have filled the entry while we waited for the lock
        if let Some(report) = cache.get(scope) {
            return Some(report.clone());
        }
        let report = self.durable.get(scope)?;
        cache.insert(scope.to_string(), report.clone());
        Some(report)
    }

    fn set(&self, scope: &str, report: &DifferenceReport) -> Result<(), IntegrityError> {
        let mut cache = self.cache.write().map_err(|_| lock_poisoned())?;
        if let Err(e) = self.durable.set(scope, report) {
            cache.remove(scope);
            return Err(e);
        }
        cache.insert(scope.to_string(), report.clone());
        Ok(())
    }

    fn remove(&self, scope: &str) -> Result<(), IntegrityError> {
        let mut cache = self.cache.write().map_err(|_| lock_poisoned())?;
        cache.remove(scope);
        self.durable.remove(scope)
    }

    fn all(&self) -> BTreeMap<String, DifferenceReport> {
        self.durable.all()
    }
}
