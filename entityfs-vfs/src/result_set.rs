//! A result set is either the full entity listing of a namespace (`All`)
//! or the output of a parsed query (`Query`). Both support the same
//! `all`/`shard`/`link`/`list` presentation forms (`spec.md` §4.5), so they
//! share this one streaming/membership interface instead of duplicating
//! the four-form logic per kind.

use entityfs_core::cancel::CancellationToken;
use entityfs_storage::{Clause, ClauseKind, StorageEngine, StorageResult};

#[derive(Clone)]
pub enum ResultSet {
    All {
        namespace: String,
    },
    Query {
        namespace: String,
        clauses: Vec<Clause>,
        query_id: u64,
    },
}

impl ResultSet {
    pub fn namespace(&self) -> &str {
        match self {
            ResultSet::All { namespace } => namespace,
            ResultSet::Query { namespace, .. } => namespace,
        }
    }

    /// Stream every matching entity id, checking `cancel` between rows.
    pub fn stream(
        &self,
        engine: &StorageEngine,
        cancel: &CancellationToken,
        sink: impl FnMut(String) -> StorageResult<()>,
    ) -> StorageResult<()> {
        match self {
            ResultSet::All { namespace } => engine.stream_all(namespace, cancel, sink),
            ResultSet::Query {
                namespace, clauses, ..
            } => engine.stream_query(namespace, clauses, cancel, sink),
        }
    }

    /// Membership check used by a `Lookup` under a result-set form that
    /// missed the query-membership cache: for `All`, existence in the
    /// namespace; for `Query`, a verification query restricted to this one
    /// entity (`spec.md` §4.5 "query instance").
    pub fn contains(&self, engine: &StorageEngine, entity_id: &str) -> StorageResult<bool> {
        match self {
            ResultSet::All { namespace } => match engine.get_entity(namespace, entity_id) {
                Ok(_) => Ok(true),
                Err(entityfs_storage::StorageError::NotFound { .. }) => Ok(false),
                Err(e) => Err(e),
            },
            ResultSet::Query {
                namespace, clauses, ..
            } => engine.query_contains_entity(namespace, clauses, entity_id),
        }
    }

    /// Query id for the membership cache key; `All` has no query instance,
    /// so it uses a fixed sentinel (namespace-scoped, never collides with a
    /// real minted id since those start at 1).
    pub fn cache_query_id(&self) -> u64 {
        match self {
            ResultSet::All { .. } => 0,
            ResultSet::Query { query_id, .. } => *query_id,
        }
    }

    pub fn restricted_to_shard(&self, h1: &str, h2: Option<&str>) -> Self {
        let shard_clause = Clause {
            negated: false,
            kind: ClauseKind::EntityInShard(h1.to_string(), h2.map(str::to_string)),
        };
        match self {
            ResultSet::All { namespace } => ResultSet::Query {
                namespace: namespace.clone(),
                clauses: vec![shard_clause],
                query_id: 0,
            },
            ResultSet::Query {
                namespace,
                clauses,
                query_id,
            } => {
                let mut clauses = clauses.clone();
                clauses.push(shard_clause);
                ResultSet::Query {
                    namespace: namespace.clone(),
                    clauses,
                    query_id: *query_id,
                }
            }
        }
    }
}
