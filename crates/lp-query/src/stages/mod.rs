//! # Built-in Commands
//!
//! | Command  | Syntax                                        |
//! |----------|-----------------------------------------------|
//! | `table`  | `table [offset=N] [limit=N] <name>`           |
//! | `fields` | `fields [-] a, b, ...`                        |
//! | `search` | `search <cond> [and <cond> ...]`              |
//! | `sort`   | `sort [limit=N] [-]field, ...`                |
//! | `limit`  | `limit [offset] <count>`                      |
//! | `rename` | `rename <from> as <to>`                       |
//! | `stats`  | `stats <agg>[, <agg> ...] [by field, ...]`    |

pub mod fields;
pub mod limit;
pub mod rename;
pub mod search;
pub mod sort;
pub mod stats;
pub mod table;

use std::collections::HashMap;

use crate::chain::{Fragment, StageRegistry};
use crate::error::QueryResult;

pub fn register_builtins(registry: &StageRegistry) {
    registry.register("table", table::create);
    registry.register("fields", fields::create);
    registry.register("search", search::create);
    registry.register("sort", sort::create);
    registry.register("limit", limit::create);
    registry.register("rename", rename::create);
    registry.register("stats", stats::create);
}

/// Split `a, b c` into names.
pub(crate) fn parse_field_list(args: &str) -> Vec<String> {
    args.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Separate `key=value` options from the remaining whitespace tokens.
pub(crate) fn take_options(args: &str) -> (HashMap<String, String>, Vec<&str>) {
    let mut options = HashMap::new();
    let mut rest = Vec::new();
    for token in args.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() && key.chars().all(char::is_alphanumeric) => {
                options.insert(key.to_ascii_lowercase(), value.to_string());
            }
            _ => rest.push(token),
        }
    }
    (options, rest)
}

/// Parse a numeric option, naming the fragment on failure.
pub(crate) fn usize_option(
    fragment: &Fragment,
    options: &HashMap<String, String>,
    key: &str,
) -> QueryResult<Option<usize>> {
    match options.get(key) {
        Some(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| fragment.malformed(format!("invalid {} '{}'", key, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_list() {
        assert_eq!(parse_field_list("a, b  c,d"), vec!["a", "b", "c", "d"]);
        assert!(parse_field_list(" , ").is_empty());
    }

    #[test]
    fn test_take_options() {
        let (options, rest) = take_options("offset=5 Limit=10 web -x=1");
        assert_eq!(options.get("offset").map(String::as_str), Some("5"));
        assert_eq!(options.get("limit").map(String::as_str), Some("10"));
        assert_eq!(rest, vec!["web", "-x=1"]);
    }

    #[test]
    fn test_builtins_registered() {
        let registry = StageRegistry::empty();
        register_builtins(&registry);
        assert_eq!(
            registry.names(),
            vec!["fields", "limit", "rename", "search", "sort", "stats", "table"]
        );
    }
}
