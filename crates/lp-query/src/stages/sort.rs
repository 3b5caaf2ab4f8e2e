//! # `sort` — Ordering
//!
//! `sort [limit=N] [-]a, [+]b` buffers every record until eof, then emits
//! them ordered by the keys (`-` descending). The sort is stable and
//! records missing a key come after those that have it.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use lp_core::Record;

use crate::chain::{Fragment, StageContext};
use crate::condition::{compare_values, extract_field};
use crate::error::QueryResult;
use crate::stage::{Stage, StageCore};

use super::{parse_field_list, take_options, usize_option};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SortKey {
    field: String,
    descending: bool,
}

pub struct SortStage {
    core: StageCore,
    fragment: String,
    keys: Vec<SortKey>,
    limit: Option<usize>,
    buffer: Mutex<Vec<Record>>,
}

pub fn create(fragment: &Fragment, _ctx: &StageContext) -> QueryResult<Arc<dyn Stage>> {
    let (options, rest) = take_options(&fragment.args);
    if let Some(key) = options.keys().find(|k| k.as_str() != "limit") {
        return Err(fragment.malformed(format!("unknown option '{}'", key)));
    }

    let keys: Vec<SortKey> = parse_field_list(&rest.join(" "))
        .into_iter()
        .map(|token| match token.strip_prefix('-') {
            Some(field) => SortKey {
                field: field.to_string(),
                descending: true,
            },
            None => SortKey {
                field: token.trim_start_matches('+').to_string(),
                descending: false,
            },
        })
        .collect();

    if keys.is_empty() {
        return Err(fragment.malformed("no sort fields given"));
    }
    if keys.iter().any(|k| k.field.is_empty()) {
        return Err(fragment.malformed("empty sort field"));
    }

    Ok(Arc::new(SortStage {
        core: StageCore::new(),
        fragment: fragment.text.clone(),
        limit: usize_option(fragment, &options, "limit")?,
        keys,
        buffer: Mutex::new(Vec::new()),
    }))
}

impl SortStage {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.keys {
            let (x, y) = (extract_field(a, &key.field), extract_field(b, &key.field));
            let ord = compare_values(x, y);
            // Missing values stay last in either direction.
            let ord = if key.descending && x.is_some() && y.is_some() {
                ord.reverse()
            } else {
                ord
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl Stage for SortStage {
    fn name(&self) -> &str {
        "sort"
    }

    fn fragment(&self) -> &str {
        &self.fragment
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn process(&self, record: Record) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    fn flush(&self) {
        let mut records =
            std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        records.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        tracing::debug!("Sorted {} records", records.len());
        for record in records {
            self.core.emit(record);
        }
    }

    fn release(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, rec, Collector};
    use serde_json::json;

    fn sorted(args: &str, input: Vec<serde_json::Value>) -> Vec<Record> {
        let stage = create(&Fragment::parse(&format!("sort {}", args)), &context()).unwrap();
        let collector = Arc::new(Collector::new());
        stage.core().set_next(collector.clone());
        collector.init().unwrap();
        stage.init().unwrap();

        for value in input {
            stage.push(rec(value));
        }
        assert!(collector.records().is_empty());
        stage.eof();
        assert_eq!(collector.eof_count(), 1);
        collector.records()
    }

    #[test]
    fn test_ascending() {
        let out = sorted(
            "price",
            vec![json!({ "price": 3 }), json!({ "price": 1.5 }), json!({ "price": 2 })],
        );
        let prices: Vec<_> = out.iter().map(|r| r["price"].clone()).collect();
        assert_eq!(prices, vec![json!(1.5), json!(2), json!(3)]);
    }

    #[test]
    fn test_descending_then_ascending() {
        let out = sorted(
            "-group, name",
            vec![
                json!({ "group": 1, "name": "b" }),
                json!({ "group": 2, "name": "z" }),
                json!({ "group": 1, "name": "a" }),
            ],
        );
        assert_eq!(
            out,
            vec![
                rec(json!({ "group": 2, "name": "z" })),
                rec(json!({ "group": 1, "name": "a" })),
                rec(json!({ "group": 1, "name": "b" })),
            ]
        );
    }

    #[test]
    fn test_missing_sorts_last_and_limit() {
        let out = sorted(
            "limit=2 n",
            vec![json!({}), json!({ "n": 5 }), json!({ "n": 1 })],
        );
        assert_eq!(out, vec![rec(json!({ "n": 1 })), rec(json!({ "n": 5 }))]);
    }

    #[test]
    fn test_malformed() {
        let ctx = context();
        assert!(create(&Fragment::parse("sort"), &ctx).is_err());
        assert!(create(&Fragment::parse("sort -"), &ctx).is_err());
        assert!(create(&Fragment::parse("sort limit=x a"), &ctx).is_err());
        assert!(create(&Fragment::parse("sort top=3 a"), &ctx).is_err());
    }
}
