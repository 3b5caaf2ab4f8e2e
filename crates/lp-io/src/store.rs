//! # Buffered Store — Append-Only Paged Result Set
//!
//! Holds the materialized output of one query run. Records are serialized
//! into [`Page`]s and addressed by their arrival index through a slot table.
//!
//! One writer (the pipeline) and any number of readers may use the store at
//! the same time. A record becomes visible only after its frame is fully
//! written, because its slot is published under the same write lock.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lp_core::{window, Record};

use crate::error::{StoreError, StoreResult};
use crate::page::{Page, DEFAULT_PAGE_SIZE};

/// Where and how big result pages are.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Size of every backing page in bytes.
    pub page_size: usize,
    /// Directory for page files (`None` = system temp directory).
    pub dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            dir: None,
        }
    }
}

/// Location of one record.
#[derive(Debug, Clone, Copy)]
struct Slot {
    page: usize,
    offset: usize,
}

struct Inner {
    pages: Vec<Page>,
    slots: Vec<Slot>,
}

pub struct BufferedStore {
    config: StoreConfig,
    inner: RwLock<Inner>,
}

impl BufferedStore {
    /// Create a store and allocate its first page.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let first = Page::create(config.dir.as_deref(), config.page_size)?;
        Ok(Self {
            config,
            inner: RwLock::new(Inner {
                pages: vec![first],
                slots: Vec::new(),
            }),
        })
    }

    /// Append a record. Returns its index.
    pub fn append(&self, record: &Record) -> StoreResult<usize> {
        let payload = serde_json::to_vec(record)?;
        let max = Page::max_payload(self.config.page_size);
        if payload.len() > max {
            return Err(StoreError::RecordTooLarge {
                size: payload.len(),
                max,
            });
        }

        let mut inner = self.write_inner();
        let mut page_idx = inner.pages.len() - 1;
        let offset = match inner.pages[page_idx].append(&payload) {
            Some(offset) => offset,
            None => {
                let mut page = Page::create(self.config.dir.as_deref(), self.config.page_size)?;
                let offset = page.append(&payload).ok_or(StoreError::RecordTooLarge {
                    size: payload.len(),
                    max,
                })?;
                inner.pages.push(page);
                page_idx += 1;
                tracing::debug!("Result store grew to {} pages", inner.pages.len());
                offset
            }
        };

        inner.slots.push(Slot {
            page: page_idx,
            offset,
        });
        Ok(inner.slots.len() - 1)
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.read_inner().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of backing pages currently allocated.
    pub fn page_count(&self) -> usize {
        self.read_inner().pages.len()
    }

    /// The record at `index`, or `None` if it has not been appended yet.
    pub fn get(&self, index: usize) -> StoreResult<Option<Record>> {
        let inner = self.read_inner();
        match inner.slots.get(index) {
            Some(slot) => decode(&inner, *slot).map(Some),
            None => Ok(None),
        }
    }

    /// Records `[offset, offset + limit)`, clipped to what has been appended.
    pub fn read(&self, offset: usize, limit: usize) -> StoreResult<Vec<Record>> {
        let inner = self.read_inner();
        let range = window(inner.slots.len(), offset, limit);
        inner.slots[range]
            .iter()
            .map(|slot| decode(&inner, *slot))
            .collect()
    }

    /// Iterate from the first record.
    ///
    /// The iterator is live: it reads the slot table on every step, so records
    /// appended while iterating are yielded too. It returns `None` once it
    /// catches up with the writer.
    pub fn iter(self: &Arc<Self>) -> StoreIter {
        StoreIter {
            store: Arc::clone(self),
            pos: 0,
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn decode(inner: &Inner, slot: Slot) -> StoreResult<Record> {
    let payload = inner
        .pages
        .get(slot.page)
        .and_then(|page| page.read_at(slot.offset))
        .ok_or(StoreError::Corrupt {
            page: slot.page,
            offset: slot.offset,
        })?;
    Ok(serde_json::from_slice(payload)?)
}

/// Sequential reader over a [`BufferedStore`].
pub struct StoreIter {
    store: Arc<BufferedStore>,
    pos: usize,
}

impl StoreIter {
    /// Index of the next record this iterator will yield.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl Iterator for StoreIter {
    type Item = StoreResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.store.get(self.pos) {
            Ok(Some(record)) => {
                self.pos += 1;
                Some(Ok(record))
            }
            Ok(None) => None,
            Err(e) => {
                self.pos += 1;
                Some(Err(e))
            }
        }
    }
}
