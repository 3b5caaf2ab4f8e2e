//! # `rename` — Field Renaming
//!
//! `rename a as b, c as d`. Records without `a` pass unchanged.

use std::sync::Arc;

use lp_core::{Record, Schema};

use crate::chain::{Fragment, StageContext};
use crate::error::QueryResult;
use crate::stage::{Stage, StageCore};

pub struct RenameStage {
    core: StageCore,
    fragment: String,
    pairs: Vec<(String, String)>,
}

pub fn create(fragment: &Fragment, _ctx: &StageContext) -> QueryResult<Arc<dyn Stage>> {
    if fragment.args.is_empty() {
        return Err(fragment.malformed("expected 'rename <from> as <to>'"));
    }

    let mut pairs = Vec::new();
    for part in fragment.args.split(',') {
        let tokens: Vec<&str> = part.split_whitespace().collect();
        match tokens.as_slice() {
            [from, kw, to] if kw.eq_ignore_ascii_case("as") => {
                pairs.push((from.to_string(), to.to_string()));
            }
            _ => {
                return Err(fragment.malformed(format!(
                    "expected '<from> as <to>', got '{}'",
                    part.trim()
                )))
            }
        }
    }

    Ok(Arc::new(RenameStage {
        core: StageCore::new(),
        fragment: fragment.text.clone(),
        pairs,
    }))
}

impl Stage for RenameStage {
    fn name(&self) -> &str {
        "rename"
    }

    fn fragment(&self) -> &str {
        &self.fragment
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn output_schema(&self) -> Schema {
        let input = self.core.input_schema().unwrap_or_default();
        self.pairs
            .iter()
            .fold(input, |schema, (from, to)| schema.rename(from, to))
    }

    fn process(&self, mut record: Record) {
        for (from, to) in &self.pairs {
            if let Some(value) = record.remove(from) {
                record.insert(to.clone(), value);
            }
        }
        self.core.emit(record);
    }
}
