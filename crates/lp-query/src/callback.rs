//! # Query Callbacks
//!
//! Observers of a running query. Completion observers ([`QueryCallback`])
//! hear about result pages and the end of the run; timeline observers
//! ([`TimelineCallback`]) receive time-bucketed progress from source stages.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::sink::ResultSet;

/// Completion observer.
pub trait QueryCallback: Send + Sync {
    /// The `(offset, limit)` window this observer pages through.
    /// `None` means it only wants [`QueryCallback::on_eof`].
    fn page(&self) -> Option<(usize, usize)> {
        None
    }

    /// Called once, as soon as the result holds `offset + limit` records, or
    /// at the end of the run if it never does.
    fn on_page_loaded(&self, _result: &ResultSet) {}

    /// Called once when the run ends. The result is complete at this point.
    fn on_eof(&self, result: &ResultSet);
}

/// Timeline progress observer.
pub trait TimelineCallback: Send + Sync {
    fn on_timeline(&self, timeline: &Timeline);
}

/// Record counts per time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    /// Bucket width in seconds.
    pub span_secs: i64,
    /// Bucket start (unix seconds) → records seen.
    pub buckets: BTreeMap<i64, u64>,
}

impl Timeline {
    pub fn new(span_secs: i64) -> Self {
        Self {
            span_secs: span_secs.max(1),
            buckets: BTreeMap::new(),
        }
    }

    /// Count one record at unix time `ts`.
    pub fn add(&mut self, ts: i64) {
        let bucket = ts.div_euclid(self.span_secs) * self.span_secs;
        *self.buckets.entry(bucket).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.buckets.values().sum()
    }
}

/// Set of callbacks, deduplicated by identity.
pub struct CallbackSet<T: ?Sized> {
    items: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for CallbackSet<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> CallbackSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `callback`. Returns `false` if it was already registered.
    pub fn register(&self, callback: Arc<T>) -> bool {
        let mut items = self.lock();
        if items.iter().any(|c| same(c, &callback)) {
            return false;
        }
        items.push(callback);
        true
    }

    /// Remove `callback`. Returns `false` if it was not registered.
    pub fn unregister(&self, callback: &Arc<T>) -> bool {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|c| !same(c, callback));
        items.len() != before
    }

    pub fn contains(&self, callback: &Arc<T>) -> bool {
        self.lock().iter().any(|c| same(c, callback))
    }

    /// Current callbacks in registration order; the set is unchanged.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.lock().clone()
    }

    /// Take every callback out in registration order, leaving the set empty.
    pub fn drain(&self) -> Vec<Arc<T>> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<T>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}
