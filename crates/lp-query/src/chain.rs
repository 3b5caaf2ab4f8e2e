//! # Query Chain Builder
//!
//! Turns query text into a linked chain of stages:
//!
//! 1. split the text on `|` (outside quotes) into [`Fragment`]s,
//! 2. build every stage through the factory registered for its command name,
//! 3. link `stage[i].next = stage[i + 1]`,
//! 4. hand each stage its predecessor's output schema.
//!
//! Any failure rejects the whole query; no partial chain is returned.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::callback::{CallbackSet, TimelineCallback};
use crate::config::QueryConfig;
use crate::error::{QueryError, QueryResult};
use crate::stage::Stage;
use crate::storage::{LogStorage, TableRegistry};

/// One pipe-separated command of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// The trimmed command text.
    pub text: String,
    /// First whitespace-delimited token.
    pub name: String,
    /// Everything after the name, trimmed.
    pub args: String,
}

impl Fragment {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (name, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        Self {
            text: text.to_string(),
            name: name.to_string(),
            args: args.trim().to_string(),
        }
    }

    /// A [`QueryError::Malformed`] naming this fragment.
    pub fn malformed(&self, reason: impl Into<String>) -> QueryError {
        QueryError::malformed(self.text.clone(), reason)
    }
}

/// What a stage factory gets to build a stage with.
#[derive(Clone)]
pub struct StageContext {
    pub storage: Arc<dyn LogStorage>,
    pub tables: Arc<dyn TableRegistry>,
    /// Timeline observers of the query being built.
    pub timeline: Arc<CallbackSet<dyn TimelineCallback>>,
    pub config: Arc<QueryConfig>,
}

/// Builds a stage from its fragment.
pub type StageFactory =
    Arc<dyn Fn(&Fragment, &StageContext) -> QueryResult<Arc<dyn Stage>> + Send + Sync>;

/// Command name → stage factory.
pub struct StageRegistry {
    factories: RwLock<HashMap<String, StageFactory>>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl StageRegistry {
    /// A registry with no commands.
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in commands.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        crate::stages::register_builtins(&registry);
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&Fragment, &StageContext) -> QueryResult<Arc<dyn Stage>> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create(&self, fragment: &Fragment, ctx: &StageContext) -> QueryResult<Arc<dyn Stage>> {
        let factory = {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            factories.get(&fragment.name).cloned()
        };
        match factory {
            Some(factory) => factory(fragment, ctx),
            None => Err(fragment.malformed(format!("unknown command '{}'", fragment.name))),
        }
    }
}

/// Split query text into fragments. Blank text has no fragments; a blank
/// fragment anywhere else is an error.
pub fn split_query(query: &str) -> QueryResult<Vec<Fragment>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    split_pipes(query)
        .into_iter()
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                Err(QueryError::malformed(part, "empty command"))
            } else {
                Ok(Fragment::parse(part))
            }
        })
        .collect()
}

/// Split on `|`, ignoring pipes inside single or double quotes.
fn split_pipes(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '|') => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Build, link and type-check the chain for `query`.
pub fn build_chain(
    query: &str,
    registry: &StageRegistry,
    ctx: &StageContext,
) -> QueryResult<Vec<Arc<dyn Stage>>> {
    let fragments = split_query(query)?;

    let stages = fragments
        .iter()
        .map(|fragment| registry.create(fragment, ctx))
        .collect::<QueryResult<Vec<_>>>()?;

    if let Some(head) = stages.first() {
        if !head.is_source() {
            return Err(QueryError::malformed(
                head.fragment(),
                "first command must read from a data source",
            ));
        }
    }

    link(&stages);
    propagate_schemas(&stages);
    Ok(stages)
}

/// `stage[i].next = stage[i + 1]`.
pub fn link(stages: &[Arc<dyn Stage>]) {
    for pair in stages.windows(2) {
        pair[0].core().set_next(Arc::clone(&pair[1]));
    }
}

/// `stage[i].input_schema = stage[i - 1].output_schema`, head to tail.
pub fn propagate_schemas(stages: &[Arc<dyn Stage>]) {
    for i in 1..stages.len() {
        let schema = stages[i - 1].output_schema();
        stages[i].core().set_input_schema(schema);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;

    #[test]
    fn test_fragment_parse() {
        let f = Fragment::parse("  fields   name, price ");
        assert_eq!(f.text, "fields   name, price");
        assert_eq!(f.name, "fields");
        assert_eq!(f.args, "name, price");

        let bare = Fragment::parse("sort");
        assert_eq!(bare.name, "sort");
        assert_eq!(bare.args, "");
    }

    #[test]
    fn test_split_query() {
        let fragments = split_query("table products | fields name, price").unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text, "table products");
        assert_eq!(fragments[1].text, "fields name, price");
    }

    #[test]
    fn test_split_blank_is_empty() {
        assert!(split_query("").unwrap().is_empty());
        assert!(split_query("   \t ").unwrap().is_empty());
    }

    #[test]
    fn test_split_rejects_empty_fragment() {
        assert!(split_query("table a || fields b").is_err());
        assert!(split_query("table a |").is_err());
        assert!(split_query("| table a").is_err());
    }

    #[test]
    fn test_split_respects_quotes() {
        let fragments = split_query(r#"table web | search msg contains "a|b""#).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].args, r#"msg contains "a|b""#);
    }

    #[test]
    fn test_unknown_command_names_fragment() {
        let ctx = context();
        let err = build_chain("unknown_stage xyz", &StageRegistry::default(), &ctx)
            .err()
            .unwrap();
        assert_eq!(err.fragment(), Some("unknown_stage xyz"));
    }

    #[test]
    fn test_chain_links_and_schemas() {
        let ctx = context();
        let stages = build_chain(
            "table products | fields name, price | rename price as cost | sort -cost",
            &StageRegistry::default(),
            &ctx,
        )
        .unwrap();

        assert_eq!(stages.len(), 4);
        assert!(stages[0].core().input_schema().is_none());
        for i in 1..stages.len() {
            assert_eq!(
                stages[i].core().input_schema(),
                Some(stages[i - 1].output_schema())
            );
            let next = stages[i - 1].core().next().unwrap();
            assert!(std::ptr::eq(
                Arc::as_ptr(&next).cast::<()>(),
                Arc::as_ptr(&stages[i]).cast::<()>()
            ));
        }
        assert!(stages[3].core().next().is_none());

        let tail = stages[3].output_schema();
        let names: Vec<&str> = tail.names().collect();
        assert_eq!(names, vec!["name", "cost"]);
    }

    #[test]
    fn test_head_must_be_source() {
        let ctx = context();
        let err = build_chain("fields name", &StageRegistry::default(), &ctx)
            .err()
            .unwrap();
        assert_eq!(err.fragment(), Some("fields name"));
    }

    #[test]
    fn test_bad_arguments_fail_whole_query() {
        let ctx = context();
        let err = build_chain(
            "table products | limit lots",
            &StageRegistry::default(),
            &ctx,
        )
        .err()
        .unwrap();
        assert_eq!(err.fragment(), Some("limit lots"));
    }

    #[test]
    fn test_custom_factory() {
        use crate::stage::StageCore;

        struct Echo {
            core: StageCore,
            text: String,
        }
        impl Stage for Echo {
            fn name(&self) -> &str {
                "echo"
            }
            fn fragment(&self) -> &str {
                &self.text
            }
            fn core(&self) -> &StageCore {
                &self.core
            }
        }

        let registry = StageRegistry::default();
        registry.register("echo", |fragment, _ctx| {
            Ok(Arc::new(Echo {
                core: StageCore::new(),
                text: fragment.text.clone(),
            }) as Arc<dyn Stage>)
        });
        assert!(registry.contains("echo"));
        assert!(registry.names().contains(&"echo".to_string()));

        let stages = build_chain("table products | echo hi", &registry, &context()).unwrap();
        assert_eq!(stages[1].fragment(), "echo hi");
        assert_eq!(stages[1].output_schema(), stages[0].output_schema());
    }
}
