#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod progress_store;
pub mod reading_services;
pub mod scroll_tracker;

pub use config::{ProgressConfig, TrackerConfig};
pub use error::{PersistError, ServicesError};
pub use progress_store::{LoadReport, LoadSource, ProgressStore};
pub use reading_services::{ReadingServices, ReadingServicesBuilder};
pub use scroll_tracker::{ScrollTracker, TrackerState, Viewport};
