//! # Query — The Facade
//!
//! A [`Query`] owns the stage chain built from its text, the result sink
//! attached when it runs, and the two callback registries.
//!
//! ```text
//! new(text) ──▶ chain built, linked, typed      (Malformed on any bad fragment)
//! run()     ──▶ sink attached, callbacks drained, stages init, head started
//! cancel()  ──▶ forced eof, tail to head
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use lp_core::Record;
use lp_io::{BufferedStore, StoreConfig};
use serde::Serialize;

use crate::callback::{CallbackSet, QueryCallback, TimelineCallback};
use crate::chain::{build_chain, propagate_schemas, StageContext, StageRegistry};
use crate::config::QueryConfig;
use crate::error::{QueryError, QueryResult};
use crate::sink::{ResultSet, ResultSink};
use crate::stage::{Stage, StageState};
use crate::storage::{LogStorage, TableRegistry};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a query is built against.
#[derive(Clone)]
pub struct QueryEnv {
    pub storage: Arc<dyn LogStorage>,
    pub tables: Arc<dyn TableRegistry>,
    pub stages: Arc<StageRegistry>,
    pub config: Arc<QueryConfig>,
}

impl QueryEnv {
    /// An environment with the built-in stages and default configuration.
    pub fn new<S>(storage: Arc<S>) -> Self
    where
        S: LogStorage + TableRegistry + 'static,
    {
        Self {
            storage: storage.clone(),
            tables: storage,
            stages: Arc::new(StageRegistry::default()),
            config: Arc::new(QueryConfig::default()),
        }
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum QueryStatus {
    /// Not started.
    Idle,
    Running,
    /// Completed or cancelled.
    Ended,
    /// The run could not produce a result.
    Failed(String),
}

pub struct Query {
    id: u64,
    text: String,
    stages: Vec<Arc<dyn Stage>>,
    sink: RwLock<Option<Arc<ResultSink>>>,
    query_callbacks: CallbackSet<dyn QueryCallback>,
    timeline_callbacks: Arc<CallbackSet<dyn TimelineCallback>>,
    store_config: StoreConfig,
    failure: Mutex<Option<String>>,
    run_lock: Mutex<RunPhase>,
}

/// Who got to the chain first: `run` or `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Idle,
    Claimed,
    Cancelled,
}

impl Query {
    /// Build the chain for `text`. Fails with [`QueryError::Malformed`] naming
    /// the first fragment that cannot become a stage.
    pub fn new(text: &str, env: &QueryEnv) -> QueryResult<Self> {
        let timeline_callbacks = Arc::new(CallbackSet::new());
        let ctx = StageContext {
            storage: Arc::clone(&env.storage),
            tables: Arc::clone(&env.tables),
            timeline: Arc::clone(&timeline_callbacks),
            config: Arc::clone(&env.config),
        };
        let stages = build_chain(text, &env.stages, &ctx)?;

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Built query {} with {} stages", id, stages.len());

        Ok(Self {
            id,
            text: text.to_string(),
            stages,
            sink: RwLock::new(None),
            query_callbacks: CallbackSet::new(),
            timeline_callbacks,
            store_config: env.config.store.store_config(),
            failure: Mutex::new(None),
            run_lock: Mutex::new(RunPhase::Idle),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn query_string(&self) -> &str {
        &self.text
    }

    /// The stages in pipe order.
    pub fn commands(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Attach a result sink and start the head stage.
    ///
    /// A query with no stages does nothing. A query that already ran or was
    /// cancelled fails with [`QueryError::AlreadyRunning`]. If the result
    /// store cannot be allocated the failure is logged, the chain is ended
    /// and [`Query::status`] reports it.
    pub fn run(&self) -> QueryResult<()> {
        let (Some(head), Some(tail)) = (self.stages.first(), self.stages.last()) else {
            return Ok(());
        };

        let mut phase = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != RunPhase::Idle || head.core().state() != StageState::Waiting {
            return Err(QueryError::AlreadyRunning);
        }
        *phase = RunPhase::Claimed;

        let store = match BufferedStore::open(self.store_config.clone()) {
            Ok(store) => store,
            Err(e) => {
                drop(phase);
                tracing::error!("Query {}: cannot allocate result store: {}", self.id, e);
                self.fail(e.to_string());
                self.end_stages();
                return Ok(());
            }
        };

        propagate_schemas(&self.stages);
        let sink = Arc::new(ResultSink::new(store, self.query_callbacks.drain()));
        sink.core().set_input_schema(tail.output_schema());
        tail.core().set_next(sink.clone());
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&sink));

        let ready = sink
            .init()
            .and_then(|()| self.stages.iter().try_for_each(|stage| stage.init()));
        // Cancel waits for the sink to be linked; callbacks fire outside the lock.
        drop(phase);

        if let Err(e) = ready {
            tracing::error!("Query {}: cannot initialize stages: {}", self.id, e);
            self.fail(e.to_string());
            self.end_stages();
            sink.eof();
            return Err(e);
        }

        tracing::info!("Running query {}: {}", self.id, self.text);
        match Arc::clone(head).start() {
            Ok(()) => Ok(()),
            Err(QueryError::AlreadyRunning) => {
                tracing::debug!("Query {} was cancelled before its source started", self.id);
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                self.end_stages();
                Err(e)
            }
        }
    }

    /// Force eof on every stage that has not ended, tail to head.
    ///
    /// A query cancelled before it runs can no longer run. A cancel that
    /// races [`Query::run`] waits until the result sink is attached, so the
    /// sink always sees the end of the chain.
    pub fn cancel(&self) {
        {
            let mut phase = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if *phase == RunPhase::Idle {
                *phase = RunPhase::Cancelled;
            }
        }
        if self.end_stages() {
            tracing::info!("Cancelled query {}", self.id);
        }
    }

    /// Returns whether any stage had not ended yet.
    fn end_stages(&self) -> bool {
        let mut ended = false;
        for stage in self.stages.iter().rev() {
            if stage.core().state() != StageState::End {
                stage.eof();
                ended = true;
            }
        }
        ended
    }

    fn fail(&self, reason: String) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        failure.get_or_insert(reason);
    }

    pub fn is_end(&self) -> bool {
        let Some(head) = self.stages.first() else {
            return true;
        };
        match self.sink() {
            Some(sink) => sink.core().state() == StageState::End,
            None => head.core().state() == StageState::End,
        }
    }

    pub fn status(&self) -> QueryStatus {
        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return QueryStatus::Failed(reason);
        }
        if let Some(reason) = self.stages.iter().find_map(|s| s.core().failure()) {
            return QueryStatus::Failed(reason);
        }
        match self.sink() {
            Some(sink) => match sink.failure() {
                Some(reason) => QueryStatus::Failed(reason),
                None if sink.core().state() == StageState::End => QueryStatus::Ended,
                None => QueryStatus::Running,
            },
            None if self.is_end() => QueryStatus::Ended,
            None => QueryStatus::Idle,
        }
    }

    /// Live handle to the full result, once [`Query::run`] attached a sink.
    pub fn result(&self) -> Option<ResultSet> {
        self.sink().map(|sink| sink.result())
    }

    /// Records `[offset, offset + limit)` of the result; empty before a run.
    pub fn result_page(&self, offset: usize, limit: usize) -> QueryResult<Vec<Record>> {
        match self.result() {
            Some(result) => Ok(result.read(offset, limit)?),
            None => Ok(Vec::new()),
        }
    }

    /// Returns `false` if `callback` was already registered.
    pub fn register_query_callback(&self, callback: Arc<dyn QueryCallback>) -> bool {
        self.query_callbacks.register(callback)
    }

    pub fn unregister_query_callback(&self, callback: &Arc<dyn QueryCallback>) -> bool {
        self.query_callbacks.unregister(callback)
    }

    pub fn register_timeline_callback(&self, callback: Arc<dyn TimelineCallback>) -> bool {
        self.timeline_callbacks.register(callback)
    }

    pub fn unregister_timeline_callback(&self, callback: &Arc<dyn TimelineCallback>) -> bool {
        self.timeline_callbacks.unregister(callback)
    }

    pub fn timeline_callbacks(&self) -> Vec<Arc<dyn TimelineCallback>> {
        self.timeline_callbacks.snapshot()
    }

    fn sink(&self) -> Option<Arc<ResultSink>> {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.cancel();
    }
}
