//! # lp-query — The "Pipeline" of LOGPIPE
//!
//! Turns pipe-delimited query text into a chain of stages, drives it from a
//! source worker thread and materializes the output into a paged result set
//! while streaming progress to callbacks.
//!
//! ```text
//! table products | search price > 1 | sort -price | fields name, price
//! ```

pub mod callback;
pub mod chain;
pub mod condition;
pub mod config;
pub mod error;
pub mod query;
pub mod service;
pub mod sink;
pub mod stage;
pub mod stages;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use callback::{CallbackSet, QueryCallback, Timeline, TimelineCallback};
pub use chain::{Fragment, StageContext, StageRegistry};
pub use config::QueryConfig;
pub use error::{QueryError, QueryResult, StorageError};
pub use query::{Query, QueryEnv, QueryStatus};
pub use service::{QueryInfo, QueryService};
pub use sink::ResultSet;
pub use stage::{Stage, StageCore, StageState};
pub use storage::{LogStorage, MemoryStorage, TableRegistry};
