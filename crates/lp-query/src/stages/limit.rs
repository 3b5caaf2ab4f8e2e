//! # `limit` — Row Window
//!
//! `limit N` passes the first `N` records; `limit M N` skips `M` first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lp_core::Record;

use crate::chain::{Fragment, StageContext};
use crate::error::QueryResult;
use crate::stage::{Stage, StageCore};

pub struct LimitStage {
    core: StageCore,
    fragment: String,
    offset: usize,
    count: usize,
    seen: AtomicUsize,
}

pub fn create(fragment: &Fragment, _ctx: &StageContext) -> QueryResult<Arc<dyn Stage>> {
    let numbers = fragment
        .args
        .split_whitespace()
        .map(|token| {
            token
                .parse::<usize>()
                .map_err(|_| fragment.malformed(format!("'{}' is not a row count", token)))
        })
        .collect::<QueryResult<Vec<_>>>()?;

    let (offset, count) = match numbers.as_slice() {
        [count] => (0, *count),
        [offset, count] => (*offset, *count),
        [] => return Err(fragment.malformed("missing row count")),
        _ => return Err(fragment.malformed("expected 'limit [offset] count'")),
    };

    Ok(Arc::new(LimitStage {
        core: StageCore::new(),
        fragment: fragment.text.clone(),
        offset,
        count,
        seen: AtomicUsize::new(0),
    }))
}

impl Stage for LimitStage {
    fn name(&self) -> &str {
        "limit"
    }

    fn fragment(&self) -> &str {
        &self.fragment
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn process(&self, record: Record) {
        let index = self.seen.fetch_add(1, Ordering::Relaxed);
        if index >= self.offset && index - self.offset < self.count {
            self.core.emit(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, rec, Collector};
    use serde_json::json;

    fn run(args: &str, n: usize) -> Vec<Record> {
        let stage = create(&Fragment::parse(&format!("limit {}", args)), &context()).unwrap();
        let collector = Arc::new(Collector::new());
        stage.core().set_next(collector.clone());
        collector.init().unwrap();
        stage.init().unwrap();
        for i in 0..n {
            stage.push(rec(json!({ "n": i })));
        }
        collector.records()
    }

    #[test]
    fn test_count() {
        let out = run("2", 5);
        assert_eq!(out, vec![rec(json!({ "n": 0 })), rec(json!({ "n": 1 }))]);
    }

    #[test]
    fn test_offset_and_count() {
        let out = run("3 10", 5);
        assert_eq!(out, vec![rec(json!({ "n": 3 })), rec(json!({ "n": 4 }))]);
        assert!(run("0", 3).is_empty());
    }

    #[test]
    fn test_malformed() {
        let ctx = context();
        let err = create(&Fragment::parse("limit lots"), &ctx).err().unwrap();
        assert_eq!(err.fragment(), Some("limit lots"));
        assert!(create(&Fragment::parse("limit"), &ctx).is_err());
        assert!(create(&Fragment::parse("limit 1 2 3"), &ctx).is_err());
        assert!(create(&Fragment::parse("limit -1"), &ctx).is_err());
    }
}
