//! The three process-wide (here: per-composer-instance) LRU caches
//! described in `spec.md` §4.5: file contents, file attributes, and query
//! membership. Backed by `moka::sync::Cache`, bounded by entry count.

use moka::sync::Cache;

use entityfs_core::constants::{
    DEFAULT_ATTR_CACHE_CAPACITY, DEFAULT_CONTENT_CACHE_CAPACITY, DEFAULT_QUERY_CACHE_CAPACITY,
};

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AttrKey {
    pub namespace: String,
    pub entity_id: String,
    pub filename: String,
}

/// A cached attribute result. `Absent` records a negative lookup so
/// repeated `stat`s of a missing file are cheap (`spec.md` §4.5).
#[derive(Clone)]
pub enum AttrEntry {
    Present { size: u64, directory: bool },
    Absent,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub namespace: String,
    pub entity_id: String,
    pub filename: String,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct QueryMembershipKey {
    pub namespace: String,
    pub query_id: u64,
    pub entity_id: String,
}

pub struct VfsCaches {
    content: Cache<ContentKey, Vec<u8>>,
    attr: Cache<AttrKey, AttrEntry>,
    query_membership: Cache<QueryMembershipKey, bool>,
}

impl VfsCaches {
    pub fn new(content_capacity: u64, attr_capacity: u64, query_capacity: u64) -> Self {
        Self {
            content: Cache::new(content_capacity),
            attr: Cache::new(attr_capacity),
            query_membership: Cache::new(query_capacity),
        }
    }

    pub fn content_get(&self, key: &ContentKey) -> Option<Vec<u8>> {
        self.content.get(key)
    }

    pub fn content_put(&self, key: ContentKey, value: Vec<u8>) {
        self.content.insert(key, value);
    }

    pub fn attr_get(&self, key: &AttrKey) -> Option<AttrEntry> {
        self.attr.get(key)
    }

    pub fn attr_put(&self, key: AttrKey, value: AttrEntry) {
        self.attr.insert(key, value);
    }

    pub fn query_membership_get(&self, key: &QueryMembershipKey) -> Option<bool> {
        self.query_membership.get(key)
    }

    pub fn query_membership_put(&self, key: QueryMembershipKey, value: bool) {
        self.query_membership.insert(key, value);
    }

    /// Evict the content and attribute entries for `(ns, entity_id,
    /// filename)` on write/delete/mkdir, per `spec.md` §4.5 invalidation.
    pub fn invalidate(&self, namespace: &str, entity_id: &str, filename: &str) {
        self.content.invalidate(&ContentKey {
            namespace: namespace.to_string(),
            entity_id: entity_id.to_string(),
            filename: filename.to_string(),
        });
        self.attr.invalidate(&AttrKey {
            namespace: namespace.to_string(),
            entity_id: entity_id.to_string(),
            filename: filename.to_string(),
        });
    }
}

impl Default for VfsCaches {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONTENT_CACHE_CAPACITY,
            DEFAULT_ATTR_CACHE_CAPACITY,
            DEFAULT_QUERY_CACHE_CAPACITY,
        )
    }
}
