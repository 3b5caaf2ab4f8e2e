//! # `table` — Storage Scan
//!
//! The source of a query. `start` spawns a worker thread that scans the
//! table and pushes every record down the chain; all downstream stages run
//! on that thread. Progress is reported to timeline observers as record
//! counts per time bucket.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;

use chrono::DateTime;
use lp_core::{Record, Schema, Value, TIME_FIELD};

use crate::callback::{CallbackSet, Timeline, TimelineCallback};
use crate::chain::{Fragment, StageContext};
use crate::config::TimelineSettings;
use crate::error::{QueryError, QueryResult};
use crate::stage::{Stage, StageCore};
use crate::storage::LogStorage;

use super::{take_options, usize_option};

pub struct TableStage {
    core: StageCore,
    fragment: String,
    table: String,
    offset: usize,
    limit: Option<usize>,
    schema: Schema,
    storage: Arc<dyn LogStorage>,
    timeline: Arc<CallbackSet<dyn TimelineCallback>>,
    settings: TimelineSettings,
}

pub fn create(fragment: &Fragment, ctx: &StageContext) -> QueryResult<Arc<dyn Stage>> {
    let (options, rest) = take_options(&fragment.args);
    if let Some(key) = options
        .keys()
        .find(|k| k.as_str() != "offset" && k.as_str() != "limit")
    {
        return Err(fragment.malformed(format!("unknown option '{}'", key)));
    }

    let table = match rest.as_slice() {
        [name] => name.to_string(),
        [] => return Err(fragment.malformed("missing table name")),
        _ => return Err(fragment.malformed("expected a single table name")),
    };
    let schema = ctx
        .tables
        .schema(&table)
        .ok_or_else(|| fragment.malformed(format!("table '{}' not found", table)))?;

    Ok(Arc::new(TableStage {
        core: StageCore::new(),
        fragment: fragment.text.clone(),
        offset: usize_option(fragment, &options, "offset")?.unwrap_or(0),
        limit: usize_option(fragment, &options, "limit")?,
        table,
        schema,
        storage: Arc::clone(&ctx.storage),
        timeline: Arc::clone(&ctx.timeline),
        settings: ctx.config.timeline.clone(),
    }))
}

impl TableStage {
    fn scan(&self) {
        let mut timeline = Timeline::new(self.settings.span_secs);
        let flush_every = self.settings.flush_every.max(1);
        let mut since_report = 0;

        let result = self
            .storage
            .scan(&self.table, self.offset, self.limit, &mut |record| {
                if !self.core.is_running() {
                    return ControlFlow::Break(());
                }
                if let Some(ts) = event_time(&record) {
                    timeline.add(ts);
                }
                self.core.emit(record);

                since_report += 1;
                if since_report >= flush_every {
                    self.report(&timeline);
                    since_report = 0;
                }
                ControlFlow::Continue(())
            });

        match result {
            Ok(count) => tracing::debug!("Scanned {} records from table {}", count, self.table),
            Err(e) => {
                tracing::error!("Scan of table {} failed: {}", self.table, e);
                self.core.fail(format!("scan of table {} failed: {}", self.table, e));
            }
        }

        // Still running means the scan ran out of input rather than being
        // cancelled.
        if self.core.is_running() {
            self.report(&timeline);
        }
        self.eof();
    }

    fn report(&self, timeline: &Timeline) {
        for callback in self.timeline.snapshot() {
            callback.on_timeline(timeline);
        }
    }
}

impl Stage for TableStage {
    fn name(&self) -> &str {
        "table"
    }

    fn fragment(&self) -> &str {
        &self.fragment
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn is_source(&self) -> bool {
        true
    }

    fn output_schema(&self) -> Schema {
        self.schema.clone()
    }

    fn start(self: Arc<Self>) -> QueryResult<()> {
        self.core.begin()?;

        let stage = Arc::clone(&self);
        let spawned = thread::Builder::new()
            .name(format!("lp-table-{}", self.table))
            .spawn(move || stage.scan());

        if let Err(e) = spawned {
            self.core.fail(format!("cannot spawn scan of table {}: {}", self.table, e));
            self.eof();
            return Err(QueryError::Worker(e));
        }
        Ok(())
    }
}

/// Unix seconds of a record's `_time`: RFC 3339 text or epoch milliseconds.
fn event_time(record: &Record) -> Option<i64> {
    match record.get(TIME_FIELD)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp()),
        Value::Number(n) => n.as_i64().map(|ms| ms.div_euclid(1000)),
        _ => None,
    }
}
