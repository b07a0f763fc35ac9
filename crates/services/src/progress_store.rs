use std::sync::Arc;

use reading_core::model::{CompletionMetrics, ProgressMap, ProgressSchema, SectionId};
use storage::repository::KeyValueStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ProgressConfig;
use crate::error::PersistError;

/// Where the map produced by `ProgressStore::load` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Defaults,
    Persisted,
}

/// What `ProgressStore::load` found in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub source: LoadSource,
    pub foreign: Vec<SectionId>,
    pub rejected: Vec<String>,
}

impl LoadReport {
    fn defaults() -> Self {
        Self {
            source: LoadSource::Defaults,
            foreign: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Owns the authoritative progress map and writes it through on every change.
///
/// Storage failures never reach callers: reads fall back to schema defaults,
/// writes keep the in-memory state and log a warning.
pub struct ProgressStore {
    schema: ProgressSchema,
    storage: Arc<dyn KeyValueStore>,
    config: ProgressConfig,
    // Held across the storage write so persisted snapshots follow mutation order.
    map: Mutex<ProgressMap>,
}

impl ProgressStore {
    /// Create a store holding the schema default map. Call `load` to restore
    /// persisted progress.
    #[must_use]
    pub fn new(
        schema: ProgressSchema,
        storage: Arc<dyn KeyValueStore>,
        config: ProgressConfig,
    ) -> Self {
        let map = Mutex::new(schema.default_map());
        Self {
            schema,
            storage,
            config,
            map,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &ProgressSchema {
        &self.schema
    }

    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.config.storage_key
    }

    /// Replace the in-memory map with persisted progress merged over the
    /// schema defaults.
    pub async fn load(&self) -> LoadReport {
        let mut map = self.map.lock().await;
        let (loaded, report) = self.read_persisted().await;
        *map = loaded;
        report
    }

    async fn read_persisted(&self) -> (ProgressMap, LoadReport) {
        let key = self.config.storage_key.as_str();
        let raw = match self.storage.load(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "no persisted progress, using schema defaults");
                return (self.schema.default_map(), LoadReport::defaults());
            }
            Err(err) => {
                warn!(key, error = %err, "progress storage unreadable, using schema defaults");
                return (self.schema.default_map(), LoadReport::defaults());
            }
        };

        let persisted = match ProgressMap::parse_persisted(&raw) {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(key, error = %err, "discarding malformed progress blob");
                return (self.schema.default_map(), LoadReport::defaults());
            }
        };

        let reconciled = ProgressMap::reconcile(&self.schema, persisted, self.config.drift_policy);
        if !reconciled.foreign.is_empty() {
            warn!(
                key,
                schema_version = self.schema.version(),
                policy = ?self.config.drift_policy,
                foreign = ?reconciled.foreign,
                "persisted progress has sections outside the schema"
            );
        }
        if !reconciled.rejected.is_empty() {
            warn!(key, rejected = ?reconciled.rejected, "skipped invalid section keys");
        }

        let report = LoadReport {
            source: LoadSource::Persisted,
            foreign: reconciled.foreign,
            rejected: reconciled.rejected,
        };
        (reconciled.map, report)
    }

    /// Mark a section read. Returns `false` if it already was or is unknown.
    pub async fn complete(&self, id: &SectionId) -> bool {
        let mut map = self.map.lock().await;
        self.apply(&mut map, id, true).await
    }

    /// Mark a section unread. Returns `false` if it already was or is unknown.
    pub async fn uncomplete(&self, id: &SectionId) -> bool {
        let mut map = self.map.lock().await;
        self.apply(&mut map, id, false).await
    }

    /// Flip a section and return its new state.
    pub async fn toggle(&self, id: &SectionId) -> bool {
        let mut map = self.map.lock().await;
        let Some(current) = map.get(id) else {
            warn!(section = %id, "ignoring toggle for unknown section");
            return false;
        };
        self.apply(&mut map, id, !current).await;
        !current
    }

    async fn apply(&self, map: &mut ProgressMap, id: &SectionId, completed: bool) -> bool {
        match map.get(id) {
            None => {
                warn!(section = %id, completed, "ignoring update for unknown section");
                return false;
            }
            Some(current) if current == completed => return false,
            Some(_) => {}
        }

        map.set(id, completed);
        if completed {
            info!(section = %id, "section completed");
        } else {
            info!(section = %id, "section marked unread");
        }
        self.persist(map).await;
        true
    }

    /// Clear every flag and drop the persisted blob.
    pub async fn reset(&self) {
        let mut map = self.map.lock().await;
        let foreign = map.foreign_keys(&self.schema).len();
        map.clear_all();

        let key = self.config.storage_key.as_str();
        match self.storage.remove(key).await {
            Ok(()) => info!(key, foreign, "progress reset"),
            Err(err) => warn!(key, error = %err, "progress reset in memory only"),
        }
    }

    async fn persist(&self, map: &ProgressMap) {
        if let Err(err) = self.try_persist(map).await {
            warn!(
                key = %self.config.storage_key,
                error = %err,
                "failed to persist progress, keeping in-memory state"
            );
        }
    }

    async fn try_persist(&self, map: &ProgressMap) -> Result<(), PersistError> {
        let blob = map.to_json()?;
        self.storage.save(&self.config.storage_key, &blob).await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> ProgressMap {
        self.map.lock().await.clone()
    }

    pub async fn is_completed(&self, id: &SectionId) -> bool {
        self.map.lock().await.is_completed(id)
    }

    pub async fn metrics(&self) -> CompletionMetrics {
        let map = self.map.lock().await;
        CompletionMetrics::compute(&map, &self.schema)
    }

    pub async fn completed_count(&self) -> usize {
        self.metrics().await.completed
    }

    pub async fn percent(&self) -> u8 {
        self.metrics().await.percent
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.schema.len()
    }
}
