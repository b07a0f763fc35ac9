//! Shared error types for the services crate.

use thiserror::Error;

use reading_core::model::ProgressError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Failures while writing progress. Logged by the store, never returned.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistError {
    #[error(transparent)]
    Encode(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping reading services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Core(#[from] reading_core::Error),
}
