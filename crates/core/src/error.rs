use thiserror::Error;

use crate::model::{ProgressError, SchemaError, SectionIdError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    SectionId(#[from] SectionIdError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
}
