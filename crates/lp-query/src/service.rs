//! # Query Service
//!
//! Thread-safe manager for the queries of one process. Queries are created
//! against a shared [`QueryEnv`] and stay addressable by id until removed.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::chain::StageRegistry;
use crate::error::QueryResult;
use crate::query::{Query, QueryEnv, QueryStatus};

/// Summary of one managed query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryInfo {
    pub id: u64,
    pub query: String,
    pub status: QueryStatus,
    pub stages: Vec<String>,
    /// Records in the result so far, once running.
    pub records: Option<usize>,
}

impl QueryInfo {
    fn of(query: &Query) -> Self {
        Self {
            id: query.id(),
            query: query.query_string().to_string(),
            status: query.status(),
            stages: query
                .commands()
                .iter()
                .map(|s| s.fragment().to_string())
                .collect(),
            records: query.result().map(|r| r.len()),
        }
    }
}

pub struct QueryService {
    env: QueryEnv,
    queries: RwLock<BTreeMap<u64, Arc<Query>>>,
}

impl QueryService {
    pub fn new(env: QueryEnv) -> Self {
        Self {
            env,
            queries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a query and keep it. The query is not started.
    pub fn create(&self, text: &str) -> QueryResult<Arc<Query>> {
        let query = Arc::new(Query::new(text, &self.env)?);
        let mut queries = self.queries.write().unwrap_or_else(PoisonError::into_inner);
        queries.insert(query.id(), Arc::clone(&query));
        Ok(query)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Query>> {
        let queries = self.queries.read().unwrap_or_else(PoisonError::into_inner);
        queries.get(&id).cloned()
    }

    /// All managed queries, oldest first.
    pub fn list(&self) -> Vec<QueryInfo> {
        let queries = self.queries.read().unwrap_or_else(PoisonError::into_inner);
        queries.values().map(|q| QueryInfo::of(q)).collect()
    }

    /// Cancel and forget a query.
    pub fn remove(&self, id: u64) -> Option<Arc<Query>> {
        let query = {
            let mut queries = self.queries.write().unwrap_or_else(PoisonError::into_inner);
            queries.remove(&id)
        };
        if let Some(q) = &query {
            q.cancel();
            tracing::debug!("Removed query {}", id);
        }
        query
    }

    /// Where custom stages are registered.
    pub fn stage_registry(&self) -> &StageRegistry {
        &self.env.stages
    }

    pub fn env(&self) -> &QueryEnv {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{products, Probe};
    use std::time::Duration;

    fn service() -> QueryService {
        QueryService::new(QueryEnv::new(products()))
    }

    #[test]
    fn test_create_get_list() {
        let service = service();
        let a = service.create("table products").unwrap();
        let b = service.create("table products | limit 1").unwrap();

        assert!(Arc::ptr_eq(&service.get(a.id()).unwrap(), &a));
        let list = service.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, a.id());
        assert_eq!(list[1].stages, vec!["table products", "limit 1"]);
        assert_eq!(list[1].status, QueryStatus::Idle);
        assert_eq!(list[1].records, None);
        assert!(service.get(b.id() + 1000).is_none());
    }

    #[test]
    fn test_malformed_is_not_kept() {
        let service = service();
        assert!(service.create("table nope").is_err());
        assert!(service.list().is_empty());
    }

    #[test]
    fn test_remove_cancels() {
        let service = service();
        let query = service.create("table products").unwrap();
        let removed = service.remove(query.id()).unwrap();
        assert!(removed.is_end());
        assert!(service.get(query.id()).is_none());
        assert!(service.remove(query.id()).is_none());
    }

    #[test]
    fn test_list_reports_records() {
        let service = service();
        let query = service.create("table products").unwrap();
        let probe = Arc::new(Probe::new());
        query.register_query_callback(probe.clone());
        query.run().unwrap();
        assert!(probe.wait_eof(Duration::from_secs(5)));

        let info = &service.list()[0];
        assert_eq!(info.records, Some(3));
        assert_eq!(info.status, QueryStatus::Ended);
    }

    #[test]
    fn test_custom_stage_via_registry() {
        let service = service();
        service
            .stage_registry()
            .register("head", crate::stages::limit::create);
        assert!(service.create("table products | head 2").is_ok());
    }
}
