//! Shared fixtures for unit tests.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use lp_core::{Field, FieldKind, Record, Schema, Value};

use crate::callback::{CallbackSet, QueryCallback, Timeline, TimelineCallback};
use crate::chain::StageContext;
use crate::config::QueryConfig;
use crate::sink::ResultSet;
use crate::stage::{Stage, StageCore};
use crate::error::StorageError;
use crate::storage::{LogStorage, MemoryStorage, TableRegistry};

pub fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

pub fn products() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert(
        "products",
        [
            serde_json::json!({ "_time": "2024-01-01T00:00:00Z", "name": "pen", "price": 2, "stock": 10 }),
            serde_json::json!({ "_time": "2024-01-01T00:00:10Z", "name": "ink", "price": 5.5, "stock": 0 }),
            serde_json::json!({ "_time": "2024-01-01T00:00:59Z", "name": "cap", "price": 1, "stock": 3 }),
        ]
        .into_iter()
        .map(rec),
    );
    storage
}

pub fn context() -> StageContext {
    let storage = products();
    StageContext {
        storage: storage.clone(),
        tables: storage,
        timeline: Arc::new(CallbackSet::new()),
        config: Arc::new(QueryConfig::default()),
    }
}

/// Poll `done` every few milliseconds until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !done() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

/// A `ticks` table of `{ "n": i }` records, produced one per `delay`.
/// Endless unless `fail_after` is set, in which case the scan fails with an
/// I/O error once that many records were visited.
pub struct TickStorage {
    delay: Duration,
    fail_after: Option<usize>,
}

impl TickStorage {
    pub fn endless(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail_after: None,
        })
    }

    pub fn failing_after(records: usize) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            fail_after: Some(records),
        })
    }
}

impl LogStorage for TickStorage {
    fn scan(
        &self,
        table: &str,
        offset: usize,
        limit: Option<usize>,
        visitor: &mut dyn FnMut(Record) -> ControlFlow<()>,
    ) -> Result<usize, StorageError> {
        if table != "ticks" {
            return Err(StorageError::TableNotFound(table.to_string()));
        }
        let mut visited = 0;
        for n in offset.. {
            if limit.is_some_and(|l| visited >= l) {
                break;
            }
            if self.fail_after.is_some_and(|f| visited >= f) {
                return Err(StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")));
            }
            thread::sleep(self.delay);
            visited += 1;
            if visitor(rec(serde_json::json!({ "n": n }))).is_break() {
                break;
            }
        }
        Ok(visited)
    }
}

impl TableRegistry for TickStorage {
    fn exists(&self, table: &str) -> bool {
        table == "ticks"
    }

    fn schema(&self, table: &str) -> Option<Schema> {
        self.exists(table)
            .then(|| Schema::new(vec![Field::new("n", FieldKind::Integer)]))
    }

    fn tables(&self) -> Vec<String> {
        vec!["ticks".to_string()]
    }
}

/// Wait on `cond` until `done` holds or `timeout` passes.
fn wait_until<T>(lock: &Mutex<T>, cond: &Condvar, timeout: Duration, done: impl Fn(&T) -> bool) -> bool {
    let guard = lock.lock().unwrap();
    let (guard, _) = cond.wait_timeout_while(guard, timeout, |v| !done(v)).unwrap();
    done(&guard)
}

/// Terminal stage that remembers what it received.
#[derive(Default)]
pub struct Collector {
    core: StageCore,
    records: Mutex<Vec<Record>>,
    eofs: Mutex<usize>,
    eof_signal: Condvar,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    /// Number of eof calls received, including repeated ones.
    pub fn eof_count(&self) -> usize {
        *self.eofs.lock().unwrap()
    }

    pub fn wait_eof(&self, timeout: Duration) -> bool {
        wait_until(&self.eofs, &self.eof_signal, timeout, |n| *n > 0)
    }
}

impl Stage for Collector {
    fn name(&self) -> &str {
        "collect"
    }

    fn fragment(&self) -> &str {
        "collect"
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn process(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }

    fn eof(&self) {
        if self.core.begin_eof() {
            self.core.end();
        }
        *self.eofs.lock().unwrap() += 1;
        self.eof_signal.notify_all();
    }
}

/// Completion callback that records the result length at each notification.
#[derive(Default)]
pub struct Probe {
    label: Option<(&'static str, Arc<Mutex<Vec<&'static str>>>)>,
    page: Option<(usize, usize)>,
    pages: Mutex<Vec<usize>>,
    eofs: Mutex<Vec<usize>>,
    eof_signal: Condvar,
    calls: AtomicUsize,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `name` to `order` on eof.
    pub fn named(name: &'static str, order: Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            label: Some((name, order)),
            ..Self::default()
        }
    }

    pub fn paged(offset: usize, limit: usize) -> Self {
        Self {
            page: Some((offset, limit)),
            ..Self::default()
        }
    }

    pub fn page_lengths(&self) -> Vec<usize> {
        self.pages.lock().unwrap().clone()
    }

    pub fn eof_lengths(&self) -> Vec<usize> {
        self.eofs.lock().unwrap().clone()
    }

    /// Total callback invocations of either kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn wait_eof(&self, timeout: Duration) -> bool {
        wait_until(&self.eofs, &self.eof_signal, timeout, |v| !v.is_empty())
    }
}

impl QueryCallback for Probe {
    fn page(&self) -> Option<(usize, usize)> {
        self.page
    }

    fn on_page_loaded(&self, result: &ResultSet) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages.lock().unwrap().push(result.len());
    }

    fn on_eof(&self, result: &ResultSet) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((name, order)) = &self.label {
            order.lock().unwrap().push(name);
        }
        self.eofs.lock().unwrap().push(result.len());
        self.eof_signal.notify_all();
    }
}

#[derive(Default)]
pub struct TimelineProbe {
    seen: Mutex<Vec<Timeline>>,
}

impl TimelineProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Timeline> {
        self.seen.lock().unwrap().last().cloned()
    }
}

impl TimelineCallback for TimelineProbe {
    fn on_timeline(&self, timeline: &Timeline) {
        self.seen.lock().unwrap().push(timeline.clone());
    }
}
