use biblink_core::BiblinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("store error: {0}")]
    Store(#[from] BiblinkError),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("invalid ISBN: {0}")]
    InvalidIsbn(String),
}

pub type Result<T> = std::result::Result<T, DedupError>;
