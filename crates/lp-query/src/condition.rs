//! # Field Conditions
//!
//! Parses and evaluates `field <op> value` comparisons joined by `and`, as
//! used by the `search` command:
//!
//! ```text
//! status >= 500 and method = "POST" and path startswith "/api"
//! ```

use std::cmp::Ordering;

use lp_core::{Record, Value};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    Matches,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
    /// Compiled pattern for [`CompareOp::Matches`].
    pattern: Option<Regex>,
}

impl Condition {
    /// Whether `record` satisfies this condition. A missing field never does.
    pub fn matches(&self, record: &Record) -> bool {
        match extract_field(record, &self.field) {
            Some(value) => self.compare(value),
            None => false,
        }
    }

    fn compare(&self, a: &Value) -> bool {
        let b = &self.value;
        match self.op {
            CompareOp::Eq => values_equal(a, b),
            CompareOp::Neq => !values_equal(a, b),
            CompareOp::Gt => numeric_cmp(a, b) == Some(Ordering::Greater),
            CompareOp::Gte => matches!(numeric_cmp(a, b), Some(Ordering::Greater | Ordering::Equal)),
            CompareOp::Lt => numeric_cmp(a, b) == Some(Ordering::Less),
            CompareOp::Lte => matches!(numeric_cmp(a, b), Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Contains => value_to_string(a).contains(&value_to_string(b)),
            CompareOp::StartsWith => value_to_string(a).starts_with(&value_to_string(b)),
            CompareOp::Matches => self
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(&value_to_string(a))),
        }
    }
}

/// Parse `cond [and cond ...]`.
pub fn parse_conditions(s: &str) -> Result<Vec<Condition>, String> {
    let mut conditions = Vec::new();

    let lower = s.trim().to_ascii_lowercase();
    if lower == "and" || lower.starts_with("and ") || lower.ends_with(" and") {
        return Err("dangling 'and'".to_string());
    }

    for part in split_and(s) {
        let part = part.trim();
        if part.is_empty() {
            return Err("empty condition".to_string());
        }

        // Whichever operator appears first splits the condition, so a
        // keyword comparison may carry `=` or `<` in its value.
        let symbolic = find_symbolic(part);
        let keyword = find_keyword(part);
        let (field, op, value) = match (symbolic, keyword) {
            (Some((pos, op, len)), Some((kw_pos, _, _))) if pos < kw_pos => {
                (&part[..pos], op, &part[pos + len..])
            }
            (Some((pos, op, len)), None) => (&part[..pos], op, &part[pos + len..]),
            (_, Some((pos, op, len))) => (&part[..pos], op, &part[pos + len..]),
            (None, None) => return Err(format!("cannot parse condition '{}'", part)),
        };

        let field = field.trim();
        if field.is_empty() {
            return Err(format!("missing field in condition '{}'", part));
        }
        let value_str = value.trim().trim_matches('"').trim_matches('\'');

        let pattern = if op == CompareOp::Matches {
            let re = Regex::new(value_str)
                .map_err(|e| format!("invalid pattern '{}': {}", value_str, e))?;
            Some(re)
        } else {
            None
        };

        conditions.push(Condition {
            field: field.to_string(),
            op,
            value: parse_value(value_str),
            pattern,
        });
    }

    Ok(conditions)
}

/// Earliest symbolic operator as `(position, op, width)`. Two-character
/// operators win over their one-character prefix.
fn find_symbolic(s: &str) -> Option<(usize, CompareOp, usize)> {
    let bytes = s.as_bytes();
    for (pos, &b) in bytes.iter().enumerate() {
        let eq_follows = bytes.get(pos + 1) == Some(&b'=');
        let found = match (b, eq_follows) {
            (b'>', true) => Some((CompareOp::Gte, 2)),
            (b'<', true) => Some((CompareOp::Lte, 2)),
            (b'!', true) => Some((CompareOp::Neq, 2)),
            (b'>', false) => Some((CompareOp::Gt, 1)),
            (b'<', false) => Some((CompareOp::Lt, 1)),
            (b'=', _) => Some((CompareOp::Eq, 1)),
            _ => None,
        };
        if let Some((op, width)) = found {
            return Some((pos, op, width));
        }
    }
    None
}

/// Earliest keyword operator (case-insensitive) as `(position, op, width)`.
fn find_keyword(s: &str) -> Option<(usize, CompareOp, usize)> {
    const KEYWORDS: [(&str, CompareOp); 3] = [
        (" contains ", CompareOp::Contains),
        (" startswith ", CompareOp::StartsWith),
        (" matches ", CompareOp::Matches),
    ];
    let lower = s.to_ascii_lowercase();
    KEYWORDS
        .iter()
        .filter_map(|(keyword, op)| lower.find(keyword).map(|pos| (pos, *op, keyword.len())))
        .min_by_key(|(pos, _, _)| *pos)
}

fn split_and(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let lower = s.to_ascii_lowercase();
    let pattern = " and ";
    let mut last = 0;

    while let Some(pos) = lower[last..].find(pattern) {
        let absolute = last + pos;
        parts.push(&s[last..absolute]);
        last = absolute + pattern.len();
    }
    parts.push(&s[last..]);
    parts
}

/// Typed literal from query text.
pub fn parse_value(s: &str) -> Value {
    if let Ok(n) = s.parse::<i64>() {
        Value::Number(n.into())
    } else if let Ok(n) = s.parse::<f64>() {
        serde_json::json!(n)
    } else if s == "true" {
        Value::Bool(true)
    } else if s == "false" {
        Value::Bool(false)
    } else if s == "null" {
        Value::Null
    } else {
        Value::String(s.to_string())
    }
}

/// Look up `field`, falling back to a JSON pointer for dotted paths
/// (`http.status` → `/http/status`).
pub fn extract_field<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(field) {
        return Some(value);
    }
    let (head, rest) = field.split_once('.')?;
    let pointer = format!("/{}", rest.replace('.', "/"));
    record.get(head)?.pointer(&pointer)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(an), Some(bn)) = (value_to_f64(a), value_to_f64(b)) {
        return (an - bn).abs() < f64::EPSILON;
    }
    value_to_string(a) == value_to_string(b)
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    let an = value_to_f64(a)?;
    let bn = value_to_f64(b)?;
    an.partial_cmp(&bn)
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Total order used by `sort` and `stats`: numbers numerically, then
/// strings, then booleans, then everything else. Missing sorts last.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        Value::Array(_) | Value::Object(_) => 3,
        Value::Null => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::rec;
    use serde_json::json;

    #[test]
    fn test_single_condition() {
        let conds = parse_conditions("amount > 100").unwrap();
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].field, "amount");
        assert_eq!(conds[0].op, CompareOp::Gt);
        assert_eq!(conds[0].value, json!(100));
    }

    #[test]
    fn test_and_is_case_insensitive() {
        let conds = parse_conditions("status >= 500 AND method = \"POST\"").unwrap();
        assert_eq!(conds.len(), 2);
        assert_eq!(conds[0].op, CompareOp::Gte);
        assert_eq!(conds[1].op, CompareOp::Eq);
        assert_eq!(conds[1].value, json!("POST"));
    }

    #[test]
    fn test_keyword_operators() {
        let conds =
            parse_conditions("path startswith \"/api\" and agent contains bot and host matches ^web-\\d+$")
                .unwrap();
        assert_eq!(conds[0].op, CompareOp::StartsWith);
        assert_eq!(conds[1].op, CompareOp::Contains);
        assert_eq!(conds[2].op, CompareOp::Matches);
    }

    #[test]
    fn test_first_operator_wins() {
        let conds = parse_conditions("msg contains a=b").unwrap();
        assert_eq!(conds[0].field, "msg");
        assert_eq!(conds[0].op, CompareOp::Contains);
        assert_eq!(conds[0].value, json!("a=b"));

        let conds = parse_conditions("query matches ^x<=\\d").unwrap();
        assert_eq!(conds[0].op, CompareOp::Matches);

        let conds = parse_conditions("title = war contains peace").unwrap();
        assert_eq!(conds[0].op, CompareOp::Eq);
        assert_eq!(conds[0].value, json!("war contains peace"));

        let conds = parse_conditions("x >= 3").unwrap();
        assert_eq!(conds[0].op, CompareOp::Gte);
        assert_eq!(conds[0].value, json!(3));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_conditions("just words").is_err());
        assert!(parse_conditions("= 3").is_err());
        assert!(parse_conditions("a = 1 and").is_err());
        assert!(parse_conditions("host matches (").is_err());
    }

    #[test]
    fn test_evaluate() {
        let r = rec(json!({ "status": 503, "path": "/api/v1", "host": "web-12", "code": "42" }));
        let check = |s: &str| parse_conditions(s).unwrap().iter().all(|c| c.matches(&r));

        assert!(check("status >= 500"));
        assert!(check("status != 200"));
        assert!(!check("status < 500"));
        assert!(check("path startswith /api"));
        assert!(check("host matches ^web-\\d+$"));
        assert!(check("code = 42"));
        assert!(!check("missing = 1"));
    }

    #[test]
    fn test_dotted_field() {
        let r = rec(json!({ "http": { "status": 404 } }));
        let conds = parse_conditions("http.status = 404").unwrap();
        assert!(conds[0].matches(&r));
    }

    #[test]
    fn test_compare_values_order() {
        let (one, two, s) = (json!(1), json!(2.5), json!("a"));
        assert_eq!(compare_values(Some(&one), Some(&two)), Ordering::Less);
        assert_eq!(compare_values(Some(&s), Some(&one)), Ordering::Greater);
        assert_eq!(compare_values(None, Some(&one)), Ordering::Greater);
    }
}
