//! # Result Store Errors

use thiserror::Error;

/// Result type for result store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record of {size} bytes exceeds page capacity of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Corrupt frame in page {page} at offset {offset}")]
    Corrupt { page: usize, offset: usize },

    #[error("Record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
