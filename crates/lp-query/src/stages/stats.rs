//! # `stats` — Aggregation
//!
//! ```text
//! stats count, sum(bytes) as total, avg(latency) by host, status
//! ```
//!
//! Supported functions: `count`, `sum`, `avg`, `min`, `max`. Without `by`
//! there is a single group (emitted even for empty input); with `by`, one
//! record per distinct key in first-seen order. Results are emitted at eof.
//! Non-numeric values are ignored by `sum` and `avg`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use lp_core::{Field, FieldKind, Record, Schema, Value};

use crate::chain::{Fragment, StageContext};
use crate::condition::{compare_values, extract_field};
use crate::error::QueryResult;
use crate::stage::{Stage, StageCore};

use super::parse_field_list;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Aggregate {
    func: AggFn,
    field: Option<String>,
    alias: String,
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    numeric: u64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn add(&mut self, value: Option<&Value>) {
        self.count += 1;
        let Some(value) = value else { return };
        if value.is_null() {
            return;
        }
        if let Some(n) = value.as_f64() {
            self.sum += n;
            self.numeric += 1;
        }
        if self
            .min
            .as_ref()
            .map_or(true, |m| compare_values(Some(value), Some(m)) == Ordering::Less)
        {
            self.min = Some(value.clone());
        }
        if self
            .max
            .as_ref()
            .map_or(true, |m| compare_values(Some(value), Some(m)) == Ordering::Greater)
        {
            self.max = Some(value.clone());
        }
    }

    fn result(&self, func: AggFn) -> Value {
        match func {
            AggFn::Count => Value::from(self.count),
            AggFn::Sum => Value::from(self.sum),
            AggFn::Avg if self.numeric > 0 => Value::from(self.sum / self.numeric as f64),
            AggFn::Avg => Value::Null,
            AggFn::Min => self.min.clone().unwrap_or(Value::Null),
            AggFn::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

#[derive(Default)]
struct Groups {
    index: HashMap<String, usize>,
    entries: Vec<(Vec<Value>, Vec<Accumulator>)>,
}

pub struct StatsStage {
    core: StageCore,
    fragment: String,
    aggregates: Vec<Aggregate>,
    by: Vec<String>,
    groups: Mutex<Groups>,
}

pub fn create(fragment: &Fragment, _ctx: &StageContext) -> QueryResult<Arc<dyn Stage>> {
    let (aggs, by) = split_by(&fragment.args);
    let by = by.map(parse_field_list).unwrap_or_default();
    if aggs.trim().is_empty() {
        return Err(fragment.malformed("no aggregates given"));
    }

    let aggregates = aggs
        .split(',')
        .map(|part| parse_aggregate(part.trim()).map_err(|reason| fragment.malformed(reason)))
        .collect::<QueryResult<Vec<_>>>()?;

    Ok(Arc::new(StatsStage {
        core: StageCore::new(),
        fragment: fragment.text.clone(),
        aggregates,
        by,
        groups: Mutex::new(Groups::default()),
    }))
}

/// Split `aggs by fields` on a case-insensitive ` by `.
fn split_by(args: &str) -> (&str, Option<&str>) {
    match args.to_ascii_lowercase().find(" by ") {
        Some(pos) => (&args[..pos], Some(&args[pos + 4..])),
        None => (args, None),
    }
}

fn parse_aggregate(s: &str) -> Result<Aggregate, String> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    let (expr, alias) = match tokens.as_slice() {
        [expr] => (*expr, None),
        [expr, kw, alias] if kw.eq_ignore_ascii_case("as") => (*expr, Some(*alias)),
        [] => return Err("empty aggregate".to_string()),
        _ => return Err(format!("cannot parse aggregate '{}'", s)),
    };

    let (name, field) = match expr.split_once('(') {
        Some((name, rest)) => {
            let field = rest
                .strip_suffix(')')
                .ok_or_else(|| format!("unclosed '(' in '{}'", expr))?
                .trim();
            (name, (!field.is_empty()).then(|| field.to_string()))
        }
        None => (expr, None),
    };

    let func = match name.to_ascii_lowercase().as_str() {
        "count" => AggFn::Count,
        "sum" => AggFn::Sum,
        "avg" => AggFn::Avg,
        "min" => AggFn::Min,
        "max" => AggFn::Max,
        other => return Err(format!("unknown aggregate function '{}'", other)),
    };
    if func != AggFn::Count && field.is_none() {
        return Err(format!("'{}' needs a field", name));
    }

    Ok(Aggregate {
        func,
        alias: alias.map(String::from).unwrap_or_else(|| expr.to_string()),
        field,
    })
}

impl StatsStage {
    fn emit_groups(&self, groups: Groups) {
        let mut entries = groups.entries;
        if entries.is_empty() && self.by.is_empty() {
            entries.push((Vec::new(), vec![Accumulator::default(); self.aggregates.len()]));
        }

        for (key, accs) in entries {
            let mut record = Record::new();
            for (name, value) in self.by.iter().zip(key) {
                record.insert(name.clone(), value);
            }
            for (agg, acc) in self.aggregates.iter().zip(&accs) {
                record.insert(agg.alias.clone(), acc.result(agg.func));
            }
            self.core.emit(record);
        }
    }
}

impl Stage for StatsStage {
    fn name(&self) -> &str {
        "stats"
    }

    fn fragment(&self) -> &str {
        &self.fragment
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn output_schema(&self) -> Schema {
        let input = self.core.input_schema().unwrap_or_default();
        let mut fields = input.project(&self.by).fields().to_vec();
        for agg in &self.aggregates {
            let kind = match agg.func {
                AggFn::Count => FieldKind::Integer,
                AggFn::Sum | AggFn::Avg => FieldKind::Double,
                AggFn::Min | AggFn::Max => agg
                    .field
                    .as_deref()
                    .and_then(|f| input.field(f))
                    .map_or(FieldKind::Any, |f| f.kind),
            };
            fields.push(Field::new(agg.alias.clone(), kind));
        }
        Schema::new(fields)
    }

    fn process(&self, record: Record) {
        let key: Vec<Value> = self
            .by
            .iter()
            .map(|f| extract_field(&record, f).cloned().unwrap_or(Value::Null))
            .collect();
        let key_text = serde_json::to_string(&key).unwrap_or_default();

        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = match groups.index.get(&key_text) {
            Some(&idx) => idx,
            None => {
                let idx = groups.entries.len();
                groups.entries.push((
                    key,
                    vec![Accumulator::default(); self.aggregates.len()],
                ));
                groups.index.insert(key_text, idx);
                idx
            }
        };

        let accs = &mut groups.entries[idx].1;
        for (agg, acc) in self.aggregates.iter().zip(accs.iter_mut()) {
            acc.add(agg.field.as_deref().and_then(|f| extract_field(&record, f)));
        }
    }

    fn flush(&self) {
        let groups = std::mem::take(&mut *self.groups.lock().unwrap_or_else(PoisonError::into_inner));
        self.emit_groups(groups);
    }
}
