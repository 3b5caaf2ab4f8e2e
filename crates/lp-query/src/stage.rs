//! # Stage — One Step of a Query Chain
//!
//! Every pipe-separated command becomes a [`Stage`]. A stage receives
//! records from its upstream through [`Stage::push`], forwards what it
//! produces to its single downstream (`next`) and moves through
//! [`StageState`]:
//!
//! ```text
//! Waiting ──start/init──▶ Running ──eof──▶ Eof ──flushed──▶ End
//! ```
//!
//! The shared bookkeeping (state, `next`, input schema) lives in
//! [`StageCore`], which concrete stages embed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use lp_core::{Record, Schema};
use serde::Serialize;

use crate::error::{QueryError, QueryResult};

/// Lifecycle of a stage (and of the result sink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Built, not started.
    Waiting,
    /// Accepting and emitting records.
    Running,
    /// No more input; flushing.
    Eof,
    /// Terminal.
    End,
}

/// State, downstream link, input schema and failure shared by every stage.
pub struct StageCore {
    state: Mutex<StageState>,
    next: RwLock<Option<Arc<dyn Stage>>>,
    input_schema: RwLock<Option<Schema>>,
    failure: Mutex<Option<String>>,
}

impl Default for StageCore {
    fn default() -> Self {
        Self {
            state: Mutex::new(StageState::Waiting),
            next: RwLock::new(None),
            input_schema: RwLock::new(None),
            failure: Mutex::new(None),
        }
    }
}

impl StageCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StageState {
        *self.lock_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == StageState::Running
    }

    /// `Waiting → Running`.
    pub fn begin(&self) -> QueryResult<()> {
        let mut state = self.lock_state();
        if *state != StageState::Waiting {
            return Err(QueryError::AlreadyRunning);
        }
        *state = StageState::Running;
        Ok(())
    }

    /// Enter `Eof` from `Waiting` or `Running`.
    ///
    /// Returns `false` if the stage already saw eof; only the caller that
    /// gets `true` may flush and cascade.
    pub fn begin_eof(&self) -> bool {
        let mut state = self.lock_state();
        match *state {
            StageState::Waiting | StageState::Running => {
                *state = StageState::Eof;
                true
            }
            StageState::Eof | StageState::End => false,
        }
    }

    pub fn end(&self) {
        *self.lock_state() = StageState::End;
    }

    /// Run `f` only while `Running`, holding the state lock so no eof
    /// transition can interleave with it.
    pub fn while_running<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.lock_state();
        if *state != StageState::Running {
            return None;
        }
        let out = f();
        drop(state);
        Some(out)
    }

    pub fn next(&self) -> Option<Arc<dyn Stage>> {
        self.next
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_next(&self, next: Arc<dyn Stage>) {
        *self.next.write().unwrap_or_else(PoisonError::into_inner) = Some(next);
    }

    /// Output schema of the upstream stage; `None` for a source stage.
    pub fn input_schema(&self) -> Option<Schema> {
        self.input_schema
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_input_schema(&self, schema: Schema) {
        *self
            .input_schema
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(schema);
    }

    /// Record why this stage could not finish its input. The first reason
    /// is kept.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        failure.get_or_insert_with(|| reason.into());
    }

    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forward a record downstream.
    pub fn emit(&self, record: Record) {
        if let Some(next) = self.next() {
            next.push(record);
        }
    }

    /// Forward eof downstream.
    pub fn emit_eof(&self) {
        if let Some(next) = self.next() {
            next.eof();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A processing step in a query chain.
///
/// Stages are shared between the query (which owns the chain) and the worker
/// that drives it, so every method takes `&self`.
pub trait Stage: Send + Sync {
    /// Command name, e.g. `table`.
    fn name(&self) -> &str;

    /// The query-text fragment this stage was built from.
    fn fragment(&self) -> &str;

    fn core(&self) -> &StageCore;

    /// Whether this stage produces records on its own once started.
    fn is_source(&self) -> bool {
        false
    }

    /// Schema of the records this stage emits. Pass-through by default.
    fn output_schema(&self) -> Schema {
        self.core().input_schema().unwrap_or_default()
    }

    /// Prepare for a run. Non-source stages start accepting pushes here.
    fn init(&self) -> QueryResult<()> {
        if self.is_source() {
            Ok(())
        } else {
            self.core().begin()
        }
    }

    /// `Waiting → Running`; a source stage begins producing.
    fn start(self: Arc<Self>) -> QueryResult<()> {
        self.core().begin()
    }

    /// Accept one record from upstream. Dropped unless `Running`.
    fn push(&self, record: Record) {
        if self.core().is_running() {
            self.process(record);
        }
    }

    /// Handle one accepted record. Forwards it unchanged by default.
    fn process(&self, record: Record) {
        self.core().emit(record);
    }

    /// Emit anything held back until the end of input.
    fn flush(&self) {}

    /// Drop stage-local resources.
    fn release(&self) {}

    /// End of input, natural or forced. Only the first call has an effect.
    fn eof(&self) {
        if !self.core().begin_eof() {
            return;
        }
        tracing::debug!("Stage eof: {}", self.fragment());
        self.flush();
        self.core().emit_eof();
        self.release();
        self.core().end();
    }
}
