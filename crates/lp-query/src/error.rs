//! # Query Errors

use lp_io::StoreError;
use thiserror::Error;

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Query construction and execution errors
#[derive(Debug, Error)]
pub enum QueryError {
    /// The fragment could not be turned into a stage. Fatal to the query.
    #[error("Invalid query command: {fragment} ({reason})")]
    Malformed { fragment: String, reason: String },

    #[error("Query is already running")]
    AlreadyRunning,

    #[error("Cannot spawn stage worker: {0}")]
    Worker(#[source] std::io::Error),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn malformed(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }

    /// The offending fragment, if this is a construction error.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            Self::Malformed { fragment, .. } => Some(fragment),
            _ => None,
        }
    }
}

/// Log storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record at line {line}: {source}")]
    InvalidRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
