//! # `fields` — Projection
//!
//! `fields a, b` keeps only `a` and `b`; `fields - a, b` drops them.

use std::sync::Arc;

use lp_core::{Record, Schema};

use crate::chain::{Fragment, StageContext};
use crate::error::QueryResult;
use crate::stage::{Stage, StageCore};

use super::parse_field_list;

pub struct FieldsStage {
    core: StageCore,
    fragment: String,
    fields: Vec<String>,
    exclude: bool,
}

pub fn create(fragment: &Fragment, _ctx: &StageContext) -> QueryResult<Arc<dyn Stage>> {
    let (exclude, list) = match fragment.args.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, fragment.args.as_str()),
    };
    let fields = parse_field_list(list);
    if fields.is_empty() {
        return Err(fragment.malformed("no fields given"));
    }

    Ok(Arc::new(FieldsStage {
        core: StageCore::new(),
        fragment: fragment.text.clone(),
        fields,
        exclude,
    }))
}

impl Stage for FieldsStage {
    fn name(&self) -> &str {
        "fields"
    }

    fn fragment(&self) -> &str {
        &self.fragment
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn output_schema(&self) -> Schema {
        let input = self.core.input_schema().unwrap_or_default();
        if self.exclude {
            input.without(&self.fields)
        } else {
            input.project(&self.fields)
        }
    }

    fn process(&self, mut record: Record) {
        if self.exclude {
            for field in &self.fields {
                record.remove(field);
            }
            self.core.emit(record);
        } else {
            let projected: Record = self
                .fields
                .iter()
                .filter_map(|f| record.remove(f).map(|v| (f.clone(), v)))
                .collect();
            self.core.emit(projected);
        }
    }
}
