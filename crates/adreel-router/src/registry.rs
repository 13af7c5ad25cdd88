//! Engine registry.
//!
//! Readers take a cheap [`Arc`] snapshot and keep using it for the whole
//! routing call; a reload swaps the snapshot atomically, so a concurrent
//! call never sees a half-applied catalog.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use adreel_models::{EngineEntry, EngineId};

use crate::engine::EngineAdapter;
use crate::error::{RegistryResult, RouterError};
use crate::http_adapter::HttpEngineAdapter;

/// Immutable view of the registered engines.
pub struct RegistrySnapshot {
    version: u64,
    entries: Vec<EngineEntry>,
    adapters: HashMap<EngineId, Arc<dyn EngineAdapter>>,
}

impl RegistrySnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[EngineEntry] {
        &self.entries
    }

    pub fn get(&self, engine_id: &str) -> Option<&EngineEntry> {
        self.entries.iter().find(|e| e.id == engine_id)
    }

    pub fn adapter(&self, engine_id: &str) -> Option<Arc<dyn EngineAdapter>> {
        self.adapters.get(engine_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("version", &self.version)
            .field("engines", &self.entries.iter().map(|e| &e.id).collect::<Vec<_>>())
            .finish()
    }
}

/// Shared, hot-swappable engine registry.
///
/// Every mutation builds and installs its snapshot while holding the write
/// lock, so versions only ever grow and concurrent edits are not lost.
pub struct EngineRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EngineRegistry").field(&self.snapshot()).finish()
    }
}

type Engines = Vec<(EngineEntry, Arc<dyn EngineAdapter>)>;

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot {
                version: 0,
                entries: Vec::new(),
                adapters: HashMap::new(),
            })),
        }
    }

    /// Build a registry from `(entry, adapter)` pairs.
    pub fn with_engines(engines: Engines) -> RegistryResult<Self> {
        let registry = Self::new();
        registry.replace(engines)?;
        Ok(registry)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically replace the whole catalog.
    ///
    /// Rejects duplicate ids and leaves the previous snapshot in place.
    pub fn replace(&self, engines: Engines) -> RegistryResult<u64> {
        let mut seen = HashSet::new();
        for (entry, _) in &engines {
            validate_entry(entry)?;
            if !seen.insert(entry.id.clone()) {
                return Err(RouterError::DuplicateEngine(entry.id.clone()));
            }
        }
        Ok(self.swap(|_| Some(engines)).unwrap_or_default())
    }

    /// Register or replace a single engine.
    pub fn upsert(&self, entry: EngineEntry, adapter: Arc<dyn EngineAdapter>) -> RegistryResult<u64> {
        validate_entry(&entry)?;
        let version = self.swap(|current| {
            let mut engines = engines_of(current, |e| e.id != entry.id);
            engines.push((entry, adapter));
            Some(engines)
        });
        Ok(version.unwrap_or_default())
    }

    /// Flip an engine's availability flag. Returns false if unknown.
    pub fn set_available(&self, engine_id: &str, available: bool) -> RegistryResult<bool> {
        let version = self.swap(|current| {
            current.get(engine_id)?;
            let engines: Engines = engines_of(current, |_| true)
                .into_iter()
                .map(|(entry, adapter)| {
                    if entry.id == engine_id {
                        (entry.with_available(available), adapter)
                    } else {
                        (entry, adapter)
                    }
                })
                .collect();
            Some(engines)
        });
        Ok(version.is_some())
    }

    /// Build the next snapshot from the current one under the write lock.
    /// `build` returning `None` leaves the registry untouched.
    fn swap(&self, build: impl FnOnce(&RegistrySnapshot) -> Option<Engines>) -> Option<u64> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let engines = build(&**current)?;
        let version = current.version + 1;

        let mut entries = Vec::with_capacity(engines.len());
        let mut adapters = HashMap::with_capacity(engines.len());
        for (entry, adapter) in engines {
            adapters.insert(entry.id.clone(), adapter);
            entries.push(entry);
        }

        *current = Arc::new(RegistrySnapshot {
            version,
            entries,
            adapters,
        });
        info!(version, engines = current.len(), "Engine registry updated");
        Some(version)
    }

    /// Load the catalog file and swap it in.
    ///
    /// Every entry must carry an `endpoint`; it is served by an
    /// [`HttpEngineAdapter`].
    pub fn load_catalog(&self, path: &str, timeout: Duration) -> RegistryResult<u64> {
        let catalog = EngineCatalog::load(path)?;
        let engines = catalog.into_http_engines(timeout)?;
        self.replace(engines)
    }
}

fn engines_of(snapshot: &RegistrySnapshot, keep: impl Fn(&EngineEntry) -> bool) -> Engines {
    snapshot
        .entries
        .iter()
        .filter(|e| keep(e))
        .filter_map(|e| snapshot.adapter(&e.id).map(|a| (e.clone(), a)))
        .collect()
}

fn validate_entry(entry: &EngineEntry) -> RegistryResult<()> {
    if entry.id.trim().is_empty() {
        return Err(RouterError::invalid_engine(&entry.id, "empty id"));
    }
    if entry.capabilities.is_empty() {
        return Err(RouterError::invalid_engine(&entry.id, "no capabilities"));
    }
    if !(entry.max_duration_sec > 0.0) {
        return Err(RouterError::invalid_engine(
            &entry.id,
            "max_duration_sec must be positive",
        ));
    }
    if entry.priority_score.is_nan() {
        warn!(engine_id = %entry.id, "Engine priority is NaN; it will rank last");
    }
    Ok(())
}

/// Engine catalog as read from a file and environment overrides.
///
/// ```toml
/// [[engines]]
/// id = "cloud-render"
/// capabilities = ["transcode", "overlay-text"]
/// cost_profile = "medium"
/// location = "cloud"
/// max_duration_sec = 120
/// endpoint = "https://render.internal"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineCatalog {
    #[serde(default)]
    pub engines: Vec<EngineEntry>,
}

impl EngineCatalog {
    /// Read the catalog from `path` (any format the `config` crate knows),
    /// overlaid with `ADREEL_ENGINES__*` environment variables.
    pub fn load(path: &str) -> RegistryResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("ADREEL_ENGINES").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Pair every entry with an HTTP adapter.
    pub fn into_http_engines(
        self,
        timeout: Duration,
    ) -> RegistryResult<Vec<(EngineEntry, Arc<dyn EngineAdapter>)>> {
        self.engines
            .into_iter()
            .map(|mut entry| {
                if entry.name.is_empty() {
                    entry.name = entry.id.clone();
                }
                let endpoint = entry
                    .endpoint
                    .clone()
                    .ok_or_else(|| RouterError::invalid_engine(&entry.id, "missing endpoint"))?;
                let adapter = HttpEngineAdapter::new(&entry.id, &endpoint, timeout)?;
                Ok((entry, Arc::new(adapter) as Arc<dyn EngineAdapter>))
            })
            .collect()
    }
}
