//! Error taxonomy for the validation pipeline, following the same
//! per-subsystem `thiserror` convention as `gridval-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("repository error: {0}")]
    Repository(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}
