//! # Log Storage
//!
//! The contracts source stages read through: [`LogStorage`] yields records,
//! [`TableRegistry`] answers which tables exist and what they look like.
//!
//! [`MemoryStorage`] implements both over in-memory tables and can load
//! JSON-lines files, one record per line.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use lp_core::{Record, Schema, Value};

use crate::error::StorageError;

/// Record source for scanning stages.
pub trait LogStorage: Send + Sync {
    /// Visit the records of `table` in storage order, skipping the first
    /// `offset` and stopping after `limit` (if any) or when `visitor` breaks.
    ///
    /// Returns the number of records visited.
    fn scan(
        &self,
        table: &str,
        offset: usize,
        limit: Option<usize>,
        visitor: &mut dyn FnMut(Record) -> ControlFlow<()>,
    ) -> Result<usize, StorageError>;
}

/// Table names and schemas.
pub trait TableRegistry: Send + Sync {
    fn exists(&self, table: &str) -> bool;

    fn schema(&self, table: &str) -> Option<Schema>;

    fn tables(&self) -> Vec<String>;
}

/// In-memory tables.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<BTreeMap<String, Vec<Record>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` if it does not exist yet.
    pub fn create_table(&self, table: &str) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(table.to_string()).or_default();
    }

    /// Append records to `table`, creating it if needed.
    pub fn insert(&self, table: &str, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(table.to_string()).or_default().extend(records);
    }

    /// Load a JSON-lines file into `table`. Blank lines are skipped, a line
    /// that is not JSON fails the whole load, and non-object values are kept
    /// under `_raw`.
    pub fn load_jsonl(&self, table: &str, path: &Path) -> Result<usize, StorageError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);

        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line).map_err(|source| {
                StorageError::InvalidRecord {
                    line: idx + 1,
                    source,
                }
            })?;
            match value {
                Value::Object(record) => records.push(record),
                other => {
                    let mut record = Record::new();
                    record.insert("_raw".to_string(), other);
                    records.push(record);
                }
            }
        }

        let count = records.len();
        self.insert(table, records);
        tracing::debug!("Loaded {} records into table {} from {:?}", count, table, path);
        Ok(count)
    }

    /// Number of records in `table`.
    pub fn count(&self, table: &str) -> Option<usize> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).map(Vec::len)
    }
}

impl LogStorage for MemoryStorage {
    fn scan(
        &self,
        table: &str,
        offset: usize,
        limit: Option<usize>,
        visitor: &mut dyn FnMut(Record) -> ControlFlow<()>,
    ) -> Result<usize, StorageError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let records = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let mut visited = 0;
        for record in records
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
        {
            visited += 1;
            if visitor(record.clone()).is_break() {
                break;
            }
        }
        Ok(visited)
    }
}

impl TableRegistry for MemoryStorage {
    fn exists(&self, table: &str) -> bool {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.contains_key(table)
    }

    fn schema(&self, table: &str) -> Option<Schema> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).map(|records| Schema::infer(records.iter()))
    }

    fn tables(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.keys().cloned().collect()
    }
}
