mod ids;
mod progress;
mod schema;

pub use ids::{SectionId, SectionIdError};
pub use progress::{CompletionMetrics, ProgressError, ProgressMap, Reconciled, SchemaDriftPolicy};
pub use schema::{CATALOG_VERSION, ProgressSchema, SchemaError};
