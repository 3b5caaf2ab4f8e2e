//! # `search` — Filter
//!
//! Keeps records that satisfy every condition. See [`crate::condition`].

use std::sync::Arc;

use lp_core::Record;

use crate::chain::{Fragment, StageContext};
use crate::condition::{parse_conditions, Condition};
use crate::error::QueryResult;
use crate::stage::{Stage, StageCore};

pub struct SearchStage {
    core: StageCore,
    fragment: String,
    conditions: Vec<Condition>,
}

pub fn create(fragment: &Fragment, _ctx: &StageContext) -> QueryResult<Arc<dyn Stage>> {
    if fragment.args.is_empty() {
        return Err(fragment.malformed("no conditions given"));
    }
    let conditions = parse_conditions(&fragment.args).map_err(|e| fragment.malformed(e))?;

    Ok(Arc::new(SearchStage {
        core: StageCore::new(),
        fragment: fragment.text.clone(),
        conditions,
    }))
}

impl Stage for SearchStage {
    fn name(&self) -> &str {
        "search"
    }

    fn fragment(&self) -> &str {
        &self.fragment
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn process(&self, record: Record) {
        if self.conditions.iter().all(|c| c.matches(&record)) {
            self.core.emit(record);
        }
    }
}
