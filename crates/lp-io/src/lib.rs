//! # lp-io — The "Engine" of LOGPIPE
//!
//! Materializes query output. Records are framed into fixed-size,
//! memory-mapped pages and indexed in arrival order, so a result set can be
//! appended to by the pipeline while readers page through it.

pub mod error;
pub mod page;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{BufferedStore, StoreConfig, StoreIter};
