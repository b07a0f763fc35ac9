#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod scroll;

pub use error::Error;
pub use scroll::{CompletionThresholds, ScrollCheck, ScrollMetrics};
