//! # Result Sink
//!
//! The terminal consumer of every query chain. Appends what the last stage
//! emits to a [`BufferedStore`] and, once the eof cascade reaches it, ends
//! and notifies the completion callbacks captured when the run started.

use std::sync::{Arc, Mutex, PoisonError};

use lp_core::Record;
use lp_io::{BufferedStore, StoreIter, StoreResult};

use crate::callback::QueryCallback;
use crate::stage::{Stage, StageCore};

/// Read-only handle to a query's result.
#[derive(Clone)]
pub struct ResultSet {
    store: Arc<BufferedStore>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn get(&self, index: usize) -> StoreResult<Option<Record>> {
        self.store.get(index)
    }

    /// Records `[offset, offset + limit)`, clipped to the current length.
    pub fn read(&self, offset: usize, limit: usize) -> StoreResult<Vec<Record>> {
        self.store.read(offset, limit)
    }

    /// Live iterator from the first record; see [`BufferedStore::iter`].
    pub fn iter(&self) -> StoreIter {
        self.store.iter()
    }
}

struct Subscriber {
    callback: Arc<dyn QueryCallback>,
    page_loaded: bool,
}

pub struct ResultSink {
    core: StageCore,
    store: Arc<BufferedStore>,
    subscribers: Mutex<Vec<Subscriber>>,
    failure: Mutex<Option<String>>,
}

impl ResultSink {
    pub fn new(store: BufferedStore, callbacks: Vec<Arc<dyn QueryCallback>>) -> Self {
        let subscribers = callbacks
            .into_iter()
            .map(|callback| Subscriber {
                callback,
                page_loaded: false,
            })
            .collect();
        Self {
            core: StageCore::new(),
            store: Arc::new(store),
            subscribers: Mutex::new(subscribers),
            failure: Mutex::new(None),
        }
    }

    pub fn result(&self) -> ResultSet {
        ResultSet {
            store: Arc::clone(&self.store),
        }
    }

    /// First append failure, if any.
    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Append under the state lock and return the callbacks whose page just
    /// filled.
    fn append(&self, record: &Record) -> Vec<Arc<dyn QueryCallback>> {
        let len = match self.store.append(record) {
            Ok(index) => index + 1,
            Err(e) => {
                tracing::error!("Cannot append to result store: {}", e);
                let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
                failure.get_or_insert_with(|| e.to_string());
                return Vec::new();
            }
        };

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers
            .iter_mut()
            .filter(|s| !s.page_loaded)
            .filter_map(|s| {
                let (offset, limit) = s.callback.page()?;
                if len >= offset.saturating_add(limit) {
                    s.page_loaded = true;
                    Some(Arc::clone(&s.callback))
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Stage for ResultSink {
    fn name(&self) -> &str {
        "result"
    }

    fn fragment(&self) -> &str {
        "result"
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn push(&self, record: Record) {
        let filled = self
            .core
            .while_running(|| self.append(&record))
            .unwrap_or_default();

        if !filled.is_empty() {
            let result = self.result();
            for callback in filled {
                callback.on_page_loaded(&result);
            }
        }
    }

    fn eof(&self) {
        if !self.core.begin_eof() {
            return;
        }
        self.core.end();

        let subscribers = std::mem::take(
            &mut *self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let result = self.result();
        tracing::debug!(
            "Result sink ended with {} records in {} pages, notifying {} callbacks",
            result.len(),
            self.store.page_count(),
            subscribers.len()
        );

        for subscriber in subscribers {
            if !subscriber.page_loaded && subscriber.callback.page().is_some() {
                subscriber.callback.on_page_loaded(&result);
            }
            subscriber.callback.on_eof(&result);
        }
    }
}
