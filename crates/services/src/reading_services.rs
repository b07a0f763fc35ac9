use std::sync::Arc;

use reading_core::model::ProgressSchema;
use storage::repository::{KeyValueStore, Storage};
use tokio::runtime::Handle;

use crate::config::{ProgressConfig, TrackerConfig};
use crate::error::ServicesError;
use crate::progress_store::{LoadReport, ProgressStore};
use crate::scroll_tracker::{ScrollTracker, Viewport};

/// Assembles the progress store and scroll tracker over a storage backend.
pub struct ReadingServices {
    store: Arc<ProgressStore>,
    tracker: Arc<ScrollTracker>,
    load_report: LoadReport,
}

/// Options for building `ReadingServices`.
#[derive(Clone, Debug)]
pub struct ReadingServicesBuilder {
    schema: ProgressSchema,
    tracker: TrackerConfig,
    progress: ProgressConfig,
}

impl Default for ReadingServicesBuilder {
    fn default() -> Self {
        Self {
            schema: ProgressSchema::catalog(),
            tracker: TrackerConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl ReadingServicesBuilder {
    /// Catalog schema with configuration read from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            schema: ProgressSchema::catalog(),
            tracker: TrackerConfig::from_env(),
            progress: ProgressConfig::from_env(),
        }
    }

    #[must_use]
    pub fn schema(mut self, schema: ProgressSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Use a custom schema given as raw section keys.
    ///
    /// # Errors
    ///
    /// Returns `ServicesError::Core` if a key is invalid or duplicated.
    pub fn schema_keys<S: AsRef<str>>(
        self,
        version: u32,
        keys: &[S],
    ) -> Result<Self, ServicesError> {
        let schema = ProgressSchema::from_keys(version, keys)?;
        Ok(self.schema(schema))
    }

    #[must_use]
    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker = config;
        self
    }

    #[must_use]
    pub fn progress_config(mut self, config: ProgressConfig) -> Self {
        self.progress = config;
        self
    }

    /// Build over an already opened key-value store and load saved progress.
    ///
    /// Tracker timers run on the runtime this future is polled on.
    pub async fn build(
        self,
        storage: Arc<dyn KeyValueStore>,
        viewport: Arc<dyn Viewport>,
    ) -> ReadingServices {
        let store = Arc::new(ProgressStore::new(self.schema, storage, self.progress));
        let load_report = store.load().await;
        let tracker = Arc::new(ScrollTracker::new(
            Arc::clone(&store),
            viewport,
            self.tracker,
            Handle::current(),
        ));

        ReadingServices {
            store,
            tracker,
            load_report,
        }
    }

    /// Build over volatile in-memory storage.
    pub async fn build_in_memory(self, viewport: Arc<dyn Viewport>) -> ReadingServices {
        let storage = Storage::in_memory();
        self.build(storage.progress, viewport).await
    }

    /// Build backed by `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `ServicesError::Sqlite` if the database cannot be opened or migrated.
    pub async fn build_sqlite(
        self,
        db_url: &str,
        viewport: Arc<dyn Viewport>,
    ) -> Result<ReadingServices, ServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(self.build(storage.progress, viewport).await)
    }
}

impl ReadingServices {
    #[must_use]
    pub fn builder() -> ReadingServicesBuilder {
        ReadingServicesBuilder::default()
    }

    /// Catalog defaults over in-memory storage.
    pub async fn in_memory(viewport: Arc<dyn Viewport>) -> Self {
        Self::builder().build_in_memory(viewport).await
    }

    /// Environment-configured services backed by `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `ServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        viewport: Arc<dyn Viewport>,
    ) -> Result<Self, ServicesError> {
        ReadingServicesBuilder::from_env()
            .build_sqlite(db_url, viewport)
            .await
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<ScrollTracker> {
        Arc::clone(&self.tracker)
    }

    /// What the startup load found in storage.
    #[must_use]
    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }
}
