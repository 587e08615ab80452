//! The filesystem composer (`spec.md` §4.5): assembles the service tree,
//! namespace tree, entities tree, and query tree over a single
//! `StorageEngine`, and owns the content/attribute/query-membership
//! caches. Path resolution is stateless per call rather than a
//! materialized node graph — entries are derived from the engine on
//! every lookup, consistent with the "rows are the source of truth"
//! model of `spec.md` §3.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use regex::Regex;

use entityfs_core::cancel::CancellationToken;
use entityfs_core::config::Config;
use entityfs_storage::{query, DeletionType, StorageEngine, StorageError, WriteRequest};

use crate::atomic_file::{AtomicFile, AtomicFileHandle, OpenFlags};
use crate::cache::{AttrEntry, AttrKey, ContentKey, QueryMembershipKey, VfsCaches};
use crate::entity_dir;
use crate::error::{VfsError, VfsResult};
use crate::node::{Attr, DirEntry, DirEntryType, NodeType};
use crate::result_set::ResultSet;

const RESULT_FORMS: &[&str] = &["all", "shard", "link", "list"];

/// Where a path resolves to, before the caller decides which operation to
/// perform on it.
enum Target {
    Root,
    Service,
    ServiceStats,
    ServiceLeaf(String),
    NamespaceRoot,
    NamespaceDir(String),
    ResultSetRoot(ResultSet),
    ResultSetForm {
        result_set: ResultSet,
        form: &'static str,
    },
    ResultSetAllEntity {
        result_set: ResultSet,
        entity_id: String,
        sub_path: Vec<String>,
    },
    ResultSetShardLevel1 {
        result_set: ResultSet,
        h1: String,
    },
    ResultSetShardLevel2 {
        result_set: ResultSet,
        h1: String,
        h2: String,
    },
    ResultSetShardEntity {
        result_set: ResultSet,
        h1: String,
        h2: String,
        entity_id: String,
        sub_path: Vec<String>,
    },
    ResultSetLink {
        result_set: ResultSet,
        entity_id: String,
    },
    ResultSetList(ResultSet),
}

pub enum OpenHandle {
    Atomic(AtomicFileHandle),
    Bytes(Vec<u8>),
}

impl std::fmt::Debug for OpenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenHandle::Atomic(_) => f.debug_tuple("Atomic").finish(),
            OpenHandle::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
        }
    }
}

impl OpenHandle {
    pub fn read(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        match self {
            OpenHandle::Atomic(h) => h.read(offset, len),
            OpenHandle::Bytes(data) => {
                let offset = offset as usize;
                if offset >= data.len() {
                    return Ok(Vec::new());
                }
                let end = (offset + len).min(data.len());
                Ok(data[offset..end].to_vec())
            }
        }
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> VfsResult<usize> {
        match self {
            OpenHandle::Atomic(h) => h.write(offset, data),
            OpenHandle::Bytes(_) => Err(VfsError::NotAFile("read-only stream".to_string())),
        }
    }

    pub fn flush(&self) -> VfsResult<()> {
        match self {
            OpenHandle::Atomic(h) => h.flush(),
            OpenHandle::Bytes(_) => Ok(()),
        }
    }

    pub fn release(self, flush_on_release: bool) -> VfsResult<()> {
        match self {
            OpenHandle::Atomic(h) => h.release(flush_on_release),
            OpenHandle::Bytes(_) => Ok(()),
        }
    }
}

pub struct Composer {
    engine: Arc<StorageEngine>,
    config: Config,
    caches: Arc<VfsCaches>,
    service: crate::service::ServiceTree,
    forbidden: Vec<Regex>,
    next_query_id: AtomicU64,
    query_ids: Mutex<HashMap<String, u64>>,
    on_change: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Composer {
    pub fn new(engine: Arc<StorageEngine>, config: Config, database_path: String) -> VfsResult<Self> {
        Self::with_change_notifier(engine, config, database_path, None)
    }

    /// `on_change` fires on every committed write or delete under
    /// `entities/`/`namespace/…/entities/`, independent of the per-attribute
    /// cache invalidation — the hook the change watcher (`spec.md` §4.6)
    /// attaches to.
    pub fn with_change_notifier(
        engine: Arc<StorageEngine>,
        config: Config,
        database_path: String,
        on_change: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> VfsResult<Self> {
        let forbidden = config
            .forbidden_filename_patterns
            .iter()
            .map(|p| Regex::new(p).expect("validated at config load"))
            .collect();
        Ok(Self {
            caches: Arc::new(VfsCaches::new(
                config.content_cache_capacity,
                config.attr_cache_capacity,
                config.query_cache_capacity,
            )),
            service: crate::service::ServiceTree::new(engine.clone(), database_path),
            engine,
            config,
            forbidden,
            next_query_id: AtomicU64::new(1),
            query_ids: Mutex::new(HashMap::new()),
            on_change,
        })
    }

    fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden.iter().any(|re| re.is_match(name))
    }

    fn query_id_for(&self, namespace: &str, querystring: &str) -> u64 {
        let key = format!("{namespace}\0{querystring}");
        let mut ids = self.query_ids.lock().unwrap_or_else(|p| p.into_inner());
        *ids.entry(key)
            .or_insert_with(|| self.next_query_id.fetch_add(1, Ordering::Relaxed))
    }

    fn result_set_for(&self, namespace: &str, querystring: &str) -> VfsResult<ResultSet> {
        if querystring.is_empty() {
            return Ok(ResultSet::All {
                namespace: namespace.to_string(),
            });
        }
        let clauses = query::parse(querystring).map_err(StorageError::from)?;
        Ok(ResultSet::Query {
            namespace: namespace.to_string(),
            clauses,
            query_id: self.query_id_for(namespace, querystring),
        })
    }

    /// Classify a mount-relative path (components, no leading/trailing
    /// empties) into a `Target`.
    fn classify(&self, path: &[String]) -> VfsResult<Target> {
        match path {
            [] => Ok(Target::Root),
            [head, ..] if head == "service" => self.classify_service(&path[1..]),
            [head, ..] if head == "namespace" => self.classify_namespace(&path[1..]),
            [head, rest @ ..] if head == "entities" => {
                let result_set = ResultSet::All {
                    namespace: String::new(),
                };
                self.classify_result_set(result_set, rest)
            }
            [head, rest @ ..] if head == "query" => {
                let (qs, rest) = rest.split_first().ok_or_else(|| {
                    VfsError::NotFound("query/ requires a querystring component".to_string())
                })?;
                let result_set = self.result_set_for("", qs)?;
                self.classify_result_set(result_set, rest)
            }
            _ => Err(VfsError::NotFound(path.join("/"))),
        }
    }

    fn classify_service(&self, rest: &[String]) -> VfsResult<Target> {
        match rest {
            [] => Ok(Target::Service),
            [name] if name == "stats" => Ok(Target::ServiceStats),
            [stats, leaf] if stats == "stats" => Ok(Target::ServiceLeaf(leaf.clone())),
            [leaf] if self.service.has_leaf(leaf) => Ok(Target::ServiceLeaf(leaf.clone())),
            _ => Err(VfsError::NotFound(rest.join("/"))),
        }
    }

    fn classify_namespace(&self, rest: &[String]) -> VfsResult<Target> {
        match rest {
            [] => Ok(Target::NamespaceRoot),
            [ns] => Ok(Target::NamespaceDir(ns.clone())),
            [ns, head, tail @ ..] if head == "entities" => {
                let result_set = ResultSet::All {
                    namespace: ns.clone(),
                };
                self.classify_result_set(result_set, tail)
            }
            [ns, head, tail @ ..] if head == "query" => {
                let (qs, tail) = tail.split_first().ok_or_else(|| {
                    VfsError::NotFound("query/ requires a querystring component".to_string())
                })?;
                let result_set = self.result_set_for(ns, qs)?;
                self.classify_result_set(result_set, tail)
            }
            _ => Err(VfsError::NotFound(rest.join("/"))),
        }
    }

    fn classify_result_set(&self, result_set: ResultSet, rest: &[String]) -> VfsResult<Target> {
        match rest {
            [] => Ok(Target::ResultSetRoot(result_set)),
            [form] if form == "list" => Ok(Target::ResultSetList(result_set)),
            [form] if RESULT_FORMS.contains(&form.as_str()) => Ok(Target::ResultSetForm {
                result_set,
                form: RESULT_FORMS.iter().find(|f| **f == form.as_str()).copied().unwrap(),
            }),
            [form, entity_id, sub @ ..] if form == "all" => Ok(Target::ResultSetAllEntity {
                result_set,
                entity_id: entity_id.clone(),
                sub_path: sub.to_vec(),
            }),
            [form, entity_id] if form == "link" => Ok(Target::ResultSetLink {
                result_set,
                entity_id: entity_id.clone(),
            }),
            [form, h1] if form == "shard" => Ok(Target::ResultSetShardLevel1 {
                result_set,
                h1: h1.clone(),
            }),
            [form, h1, h2] if form == "shard" => Ok(Target::ResultSetShardLevel2 {
                result_set,
                h1: h1.clone(),
                h2: h2.clone(),
            }),
            [form, h1, h2, entity_id, sub @ ..] if form == "shard" => {
                Ok(Target::ResultSetShardEntity {
                    result_set,
                    h1: h1.clone(),
                    h2: h2.clone(),
                    entity_id: entity_id.clone(),
                    sub_path: sub.to_vec(),
                })
            }
            _ => Err(VfsError::NotFound(rest.join("/"))),
        }
    }

    // ---- node capabilities ----

    pub fn attr(&self, path: &[String]) -> VfsResult<Attr> {
        match self.classify(path)? {
            Target::Root
            | Target::Service
            | Target::ServiceStats
            | Target::NamespaceRoot
            | Target::NamespaceDir(_)
            | Target::ResultSetRoot(_)
            | Target::ResultSetShardLevel1 { .. }
            | Target::ResultSetShardLevel2 { .. } => Ok(Attr {
                size: 0,
                kind: NodeType::Directory,
            }),
            Target::ResultSetForm { form: "list", .. } => Ok(Attr {
                size: 0,
                kind: NodeType::StaticFile,
            }),
            Target::ResultSetForm { .. } => Ok(Attr {
                size: 0,
                kind: NodeType::Directory,
            }),
            Target::ServiceLeaf(leaf) => {
                let bytes = self
                    .service
                    .read_leaf(&leaf)
                    .ok_or_else(|| VfsError::NotFound(leaf.clone()))?;
                Ok(Attr {
                    size: bytes.len() as u64,
                    kind: NodeType::StaticFile,
                })
            }
            Target::ResultSetAllEntity {
                result_set,
                entity_id,
                sub_path,
            } => {
                self.check_query_membership(&result_set, &entity_id)?;
                self.attr_entity(result_set.namespace(), &entity_id, &sub_path)
            }
            Target::ResultSetShardEntity {
                result_set,
                entity_id,
                sub_path,
                ..
            } => {
                self.check_query_membership(&result_set, &entity_id)?;
                self.attr_entity(result_set.namespace(), &entity_id, &sub_path)
            }
            Target::ResultSetLink { .. } => Ok(Attr {
                size: 0,
                kind: NodeType::Symlink,
            }),
            Target::ResultSetList(_) => Ok(Attr {
                size: 0,
                kind: NodeType::StaticFile,
            }),
        }
    }

    /// Verifies `entity_id` is actually a member of `result_set` before a
    /// direct `…/all/<entity>/…` or `…/shard/<s1>/<s2>/<entity>/…` access
    /// reaches it — `readdir_result_set`/`readdir_shard_level` only ever
    /// list matching entities, so a direct path must be held to the same
    /// standard rather than reaching straight into the engine. `All` has no
    /// clauses to fail, so it short-circuits (existence is checked by the
    /// caller's own `get_entity`/equivalent downstream).
    fn check_query_membership(&self, result_set: &ResultSet, entity_id: &str) -> VfsResult<()> {
        if matches!(result_set, ResultSet::All { .. }) {
            return Ok(());
        }
        let key = QueryMembershipKey {
            namespace: result_set.namespace().to_string(),
            query_id: result_set.cache_query_id(),
            entity_id: entity_id.to_string(),
        };
        if let Some(member) = self.caches.query_membership_get(&key) {
            return if member {
                Ok(())
            } else {
                Err(VfsError::NotFound(entity_id.to_string()))
            };
        }
        let member = result_set.contains(&self.engine, entity_id)?;
        self.caches.query_membership_put(key, member);
        if member {
            Ok(())
        } else {
            Err(VfsError::NotFound(entity_id.to_string()))
        }
    }

    fn attr_entity(&self, namespace: &str, entity_id: &str, sub_path: &[String]) -> VfsResult<Attr> {
        let key = AttrKey {
            namespace: namespace.to_string(),
            entity_id: entity_id.to_string(),
            filename: sub_path.join("/"),
        };
        if let Some(cached) = self.caches.attr_get(&key) {
            return match cached {
                AttrEntry::Present { size, directory } => Ok(Attr {
                    size,
                    kind: if directory {
                        NodeType::Directory
                    } else {
                        NodeType::File
                    },
                }),
                AttrEntry::Absent => Err(VfsError::NotFound(sub_path.join("/"))),
            };
        }

        let headers = match self.engine.get_entity(namespace, entity_id) {
            Ok(h) => h,
            Err(StorageError::NotFound { .. }) => {
                self.caches.attr_put(key, AttrEntry::Absent);
                return Err(VfsError::NotFound(entity_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if sub_path.is_empty() {
            return Ok(Attr {
                size: 0,
                kind: NodeType::Directory,
            });
        }

        match entity_dir::find(&headers, sub_path) {
            Some(header) => {
                let attr_entry = AttrEntry::Present {
                    size: header.data_length as u64,
                    directory: header.directory,
                };
                self.caches.attr_put(key, attr_entry);
                Ok(Attr {
                    size: header.data_length as u64,
                    kind: if header.directory {
                        NodeType::Directory
                    } else {
                        NodeType::File
                    },
                })
            }
            None => {
                self.caches.attr_put(key, AttrEntry::Absent);
                Err(VfsError::NotFound(sub_path.join("/")))
            }
        }
    }

    pub fn readdir(&self, path: &[String], cancel: &CancellationToken) -> VfsResult<Vec<DirEntry>> {
        match self.classify(path)? {
            Target::Root => Ok(vec![
                dir("service"),
                dir("namespace"),
                dir("entities"),
                dir("query"),
            ]),
            Target::Service => Ok(self
                .service
                .leaf_names()
                .map(file)
                .chain(std::iter::once(dir("stats")))
                .collect()),
            Target::ServiceStats => Ok(vec![file("heap_bytes")]),
            Target::NamespaceRoot => {
                let namespaces = self.engine.list_namespaces().map_err(VfsError::from)?;
                Ok(namespaces
                    .into_iter()
                    .filter(|n| !n.is_empty())
                    .map(|n| dir(&n))
                    .collect())
            }
            Target::NamespaceDir(_) => Ok(vec![dir("entities"), dir("query")]),
            Target::ResultSetRoot(_) => Ok(RESULT_FORMS
                .iter()
                .map(|f| if *f == "list" { file(f) } else { dir(f) })
                .collect()),
            Target::ResultSetForm { result_set, form } if form == "all" => {
                self.readdir_result_set(&result_set, cancel, DirEntryType::Directory)
            }
            Target::ResultSetForm { result_set, form } if form == "link" => {
                self.readdir_result_set(&result_set, cancel, DirEntryType::Symlink)
            }
            Target::ResultSetForm { result_set, form } if form == "shard" => {
                self.readdir_shard_level(&result_set, None, cancel)
            }
            Target::ResultSetForm { .. } => Err(VfsError::NotADirectory(path.join("/"))),
            Target::ResultSetShardLevel1 { result_set, h1 } => {
                self.readdir_shard_level(&result_set, Some(&h1), cancel)
            }
            Target::ResultSetShardLevel2 { result_set, h1, h2 } => {
                let restricted = result_set.restricted_to_shard(&h1, Some(&h2));
                self.readdir_result_set(&restricted, cancel, DirEntryType::Directory)
            }
            Target::ResultSetAllEntity {
                result_set,
                entity_id,
                sub_path,
            } => {
                self.check_query_membership(&result_set, &entity_id)?;
                self.readdir_entity(result_set.namespace(), &entity_id, &sub_path)
            }
            Target::ResultSetShardEntity {
                result_set,
                entity_id,
                sub_path,
                ..
            } => {
                self.check_query_membership(&result_set, &entity_id)?;
                self.readdir_entity(result_set.namespace(), &entity_id, &sub_path)
            }
            Target::ServiceLeaf(_) | Target::ResultSetLink { .. } | Target::ResultSetList(_) => {
                Err(VfsError::NotADirectory(path.join("/")))
            }
        }
    }

    fn readdir_result_set(
        &self,
        result_set: &ResultSet,
        cancel: &CancellationToken,
        kind: DirEntryType,
    ) -> VfsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let result = result_set.stream(&self.engine, cancel, |entity_id| {
            entries.push(DirEntry {
                name: entity_id,
                kind,
            });
            Ok(())
        });
        match result {
            Ok(()) => Ok(entries),
            Err(StorageError::Cancelled) => Ok(entries),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the distinct shard bucket directly under `h1` (or the distinct
    /// first-level buckets when `h1` is `None`), derived by streaming the
    /// result set and deriving each entity's shard (`spec.md` §4.5
    /// "Sharding subtree").
    fn readdir_shard_level(
        &self,
        result_set: &ResultSet,
        h1: Option<&str>,
        cancel: &CancellationToken,
    ) -> VfsResult<Vec<DirEntry>> {
        let restricted = match h1 {
            Some(h1) => result_set.restricted_to_shard(h1, None),
            None => result_set.clone(),
        };
        let mut seen = std::collections::HashSet::new();
        let mut entries = Vec::new();
        let result = restricted.stream(&self.engine, cancel, |entity_id| {
            let shard = self.engine.shard_for(&entity_id);
            let bucket = if h1.is_some() {
                shard.level2
            } else {
                shard.level1
            };
            if seen.insert(bucket.clone()) {
                entries.push(DirEntry {
                    name: bucket,
                    kind: DirEntryType::Directory,
                });
            }
            Ok(())
        });
        match result {
            Ok(()) | Err(StorageError::Cancelled) => Ok(entries),
            Err(e) => Err(e.into()),
        }
    }

    fn readdir_entity(
        &self,
        namespace: &str,
        entity_id: &str,
        sub_path: &[String],
    ) -> VfsResult<Vec<DirEntry>> {
        let headers = self.engine.get_entity(namespace, entity_id)?;
        if !sub_path.is_empty() && entity_dir::find(&headers, sub_path).is_none() {
            return Err(VfsError::NotFound(sub_path.join("/")));
        }
        Ok(entity_dir::children(&headers, sub_path)
            .into_iter()
            .map(|e| DirEntry {
                name: e.name,
                kind: match e.kind {
                    entity_dir::EntryKind::File => DirEntryType::File,
                    entity_dir::EntryKind::Directory => DirEntryType::Directory,
                },
            })
            .collect())
    }

    pub fn readlink(&self, path: &[String]) -> VfsResult<String> {
        match self.classify(path)? {
            Target::ResultSetLink {
                result_set,
                entity_id,
            } => {
                let shard = self.engine.shard_for(&entity_id);
                let ns_prefix = if result_set.namespace().is_empty() {
                    String::new()
                } else {
                    format!("/namespace/{}", result_set.namespace())
                };
                Ok(format!(
                    "{ns_prefix}/entities/shard/{}/{}/{}",
                    shard.level1, shard.level2, entity_id
                ))
            }
            _ => Err(VfsError::NotAFile(path.join("/"))),
        }
    }

    pub fn open_file(&self, path: &[String], flags: OpenFlags) -> VfsResult<OpenHandle> {
        match self.classify(path)? {
            Target::ServiceLeaf(leaf) => {
                let bytes = self
                    .service
                    .read_leaf(&leaf)
                    .ok_or_else(|| VfsError::NotFound(leaf))?;
                Ok(OpenHandle::Bytes(bytes))
            }
            Target::ResultSetList(result_set) => {
                let cancel = CancellationToken::new();
                let mut lines = Vec::new();
                let ns_prefix = if result_set.namespace().is_empty() {
                    String::new()
                } else {
                    format!("/namespace/{}", result_set.namespace())
                };
                result_set.stream(&self.engine, &cancel, |entity_id| {
                    let shard = self.engine.shard_for(&entity_id);
                    lines.push(format!(
                        "{ns_prefix}/entities/shard/{}/{}/{}\n",
                        shard.level1, shard.level2, entity_id
                    ));
                    Ok(())
                })?;
                Ok(OpenHandle::Bytes(lines.concat().into_bytes()))
            }
            Target::ResultSetAllEntity {
                result_set,
                entity_id,
                sub_path,
            } => {
                self.check_query_membership(&result_set, &entity_id)?;
                self.open_attribute(result_set.namespace(), &entity_id, &sub_path, flags)
            }
            Target::ResultSetShardEntity {
                result_set,
                entity_id,
                sub_path,
                ..
            } => {
                self.check_query_membership(&result_set, &entity_id)?;
                self.open_attribute(result_set.namespace(), &entity_id, &sub_path, flags)
            }
            _ => Err(VfsError::NotAFile(path.join("/"))),
        }
    }

    fn open_attribute(
        &self,
        namespace: &str,
        entity_id: &str,
        sub_path: &[String],
        flags: OpenFlags,
    ) -> VfsResult<OpenHandle> {
        let name = sub_path
            .last()
            .ok_or_else(|| VfsError::NotAFile(entity_id.to_string()))?;
        if self.is_forbidden(name) {
            return Err(VfsError::ForbiddenName(name.clone()));
        }
        let filename = sub_path.join("/");
        let namespace = namespace.to_string();
        let entity_id_owned = entity_id.to_string();
        let filename_for_hook = filename.clone();
        let namespace_for_hook = namespace.clone();
        let entity_for_hook = entity_id_owned.clone();
        let caches = self.caches.clone();
        let on_change = self.on_change.clone();
        let file = AtomicFile::new(
            self.engine.clone(),
            namespace,
            entity_id_owned,
            filename,
            self.config.max_file_size,
            move || {
                caches.invalidate(&namespace_for_hook, &entity_for_hook, &filename_for_hook);
                if let Some(on_change) = &on_change {
                    on_change();
                }
            },
        );
        Ok(OpenHandle::Atomic(file.open(flags)))
    }

    pub fn mkdir(&self, path: &[String]) -> VfsResult<()> {
        match self.classify(path)? {
            Target::ResultSetAllEntity {
                result_set,
                entity_id,
                sub_path,
            } if sub_path.is_empty() => self.create_entity_directory(result_set.namespace(), &entity_id),
            Target::ResultSetAllEntity {
                result_set,
                entity_id,
                sub_path,
            } => self.write_entity_row(result_set.namespace(), &entity_id, &sub_path, true, DeletionType::None),
            Target::ResultSetShardEntity {
                result_set,
                entity_id,
                sub_path,
                ..
            } if sub_path.is_empty() => self.create_entity_directory(result_set.namespace(), &entity_id),
            Target::ResultSetShardEntity {
                result_set,
                entity_id,
                sub_path,
                ..
            } => self.write_entity_row(result_set.namespace(), &entity_id, &sub_path, true, DeletionType::None),
            _ => Err(VfsError::NotADirectory(path.join("/"))),
        }
    }

    pub fn create_entity_directory(&self, namespace: &str, entity_id: &str) -> VfsResult<()> {
        // An entity with no attributes yet is created implicitly by its
        // first write; this materializes an empty directory row at the
        // entity's own root so `mkdir entities/all/<E>` works standalone.
        self.write_entity_row(namespace, entity_id, &[], true, DeletionType::None)
    }

    fn write_entity_row(
        &self,
        namespace: &str,
        entity_id: &str,
        sub_path: &[String],
        directory: bool,
        deletion_type: DeletionType,
    ) -> VfsResult<()> {
        let filename = sub_path.join("/");
        if let Some(name) = sub_path.last() {
            if self.is_forbidden(name) {
                return Err(VfsError::ForbiddenName(name.clone()));
            }
        }
        self.engine.write_or_delete(WriteRequest {
            namespace,
            entity_id,
            filename: &filename,
            old_revision: "",
            tombstone: false,
            data: &[],
            authorship_metadata: None,
            directory,
            deletion_type,
        })?;
        self.caches.invalidate(namespace, entity_id, &filename);
        self.notify_change();
        Ok(())
    }

    fn notify_change(&self) {
        if let Some(on_change) = &self.on_change {
            on_change();
        }
    }

    pub fn remove(&self, path: &[String], is_dir: bool) -> VfsResult<()> {
        match self.classify(path)? {
            Target::ResultSetAllEntity {
                result_set,
                entity_id,
                sub_path,
            } if !sub_path.is_empty() => self.remove_entity_row(result_set.namespace(), &entity_id, &sub_path, is_dir),
            Target::ResultSetShardEntity {
                result_set,
                entity_id,
                sub_path,
                ..
            } if !sub_path.is_empty() => self.remove_entity_row(result_set.namespace(), &entity_id, &sub_path, is_dir),
            _ => Err(VfsError::NotFound(path.join("/"))),
        }
    }

    fn remove_entity_row(&self, namespace: &str, entity_id: &str, sub_path: &[String], is_dir: bool) -> VfsResult<()> {
        let filename = sub_path.join("/");
        self.engine.write_or_delete(WriteRequest {
            namespace,
            entity_id,
            filename: &filename,
            old_revision: "",
            tombstone: true,
            data: &[],
            authorship_metadata: None,
            directory: is_dir,
            deletion_type: DeletionType::Any,
        })?;
        self.caches.invalidate(namespace, entity_id, &filename);
        self.notify_change();
        Ok(())
    }
}

fn dir(name: &str) -> DirEntry {
    DirEntry {
        name: name.to_string(),
        kind: DirEntryType::Directory,
    }
}

fn file(name: &str) -> DirEntry {
    DirEntry {
        name: name.to_string(),
        kind: DirEntryType::File,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composer() -> Composer {
        let engine = Arc::new(StorageEngine::open_in_memory().unwrap());
        Composer::new(engine, Config::default(), ":memory:".to_string()).unwrap()
    }

    fn p(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn root_lists_four_subtrees() {
        let composer = composer();
        let cancel = CancellationToken::new();
        let mut names: Vec<String> = composer
            .readdir(&[], &cancel)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["entities", "namespace", "query", "service"]);
    }

    #[test]
    fn write_then_read_through_entities_all() {
        let composer = composer();
        let path = p(&["entities", "all", "homer", "religion"]);
        let handle = composer.open_file(&path, OpenFlags::default()).unwrap();
        handle.write(0, b"Pastafarian").unwrap();
        handle.flush().unwrap();
        handle.release(false).unwrap();

        let handle = composer.open_file(&path, OpenFlags::default()).unwrap();
        assert_eq!(handle.read(0, 100).unwrap(), b"Pastafarian");
    }

    #[test]
    fn query_by_existence_matches_attribute_name() {
        let composer = composer();
        let write_path = p(&["entities", "all", "homer", "religion"]);
        let handle = composer.open_file(&write_path, OpenFlags::default()).unwrap();
        handle.write(0, b"Pastafarian").unwrap();
        handle.flush().unwrap();
        handle.release(false).unwrap();

        let cancel = CancellationToken::new();
        let query_path = p(&["query", "religion", "all"]);
        let entries = composer.readdir(&query_path, &cancel).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "homer");
    }

    #[test]
    fn entities_link_resolves_to_shard_path() {
        let composer = composer();
        let write_path = p(&["entities", "all", "homer", "religion"]);
        let handle = composer.open_file(&write_path, OpenFlags::default()).unwrap();
        handle.write(0, b"x").unwrap();
        handle.flush().unwrap();
        handle.release(false).unwrap();

        let link_path = p(&["entities", "link", "homer"]);
        let target = composer.readlink(&link_path).unwrap();
        assert!(target.starts_with("/entities/shard/"));
        assert!(target.ends_with("/homer"));
    }

    #[test]
    fn forbidden_filename_is_refused() {
        let composer = composer();
        let path = p(&["entities", "all", "homer", ".DS_Store"]);
        let err = composer.open_file(&path, OpenFlags::default()).unwrap_err();
        assert!(matches!(err, VfsError::ForbiddenName(_)));
    }

    #[test]
    fn mkdir_bare_entity_root_creates_empty_directory() {
        let composer = composer();
        let path = p(&["entities", "all", "marge"]);
        composer.mkdir(&path).unwrap();
        let attr = composer.attr(&path).unwrap();
        assert_eq!(attr.kind, NodeType::Directory);
        let cancel = CancellationToken::new();
        assert!(composer.readdir(&path, &cancel).unwrap().is_empty());
    }

    #[test]
    fn list_form_emits_shard_paths_for_query_matches() {
        let composer = composer();
        let write_path = p(&["entities", "all", "homer", "religion"]);
        let handle = composer.open_file(&write_path, OpenFlags::default()).unwrap();
        handle.write(0, b"Pastafarian").unwrap();
        handle.flush().unwrap();
        handle.release(false).unwrap();

        let list_path = p(&["query", "religion", "list"]);
        let handle = composer.open_file(&list_path, OpenFlags::default()).unwrap();
        let body = String::from_utf8(handle.read(0, 4096).unwrap()).unwrap();
        assert!(body.contains("/entities/shard/"));
        assert!(body.trim_end().ends_with("/homer"));
    }

    #[test]
    fn mkdir_then_rmdir_then_write_file_succeeds() {
        let composer = composer();
        let dir_path = p(&["entities", "all", "homer", "d"]);
        composer.mkdir(&dir_path).unwrap();
        composer.remove(&dir_path, true).unwrap();

        let handle = composer.open_file(&dir_path, OpenFlags::default()).unwrap();
        handle.write(0, b"x").unwrap();
        handle.flush().unwrap();
        handle.release(false).unwrap();
        let handle = composer.open_file(&dir_path, OpenFlags::default()).unwrap();
        assert_eq!(handle.read(0, 10).unwrap(), b"x");
    }

    #[test]
    fn direct_entity_access_under_a_non_matching_query_is_refused() {
        let composer = composer();
        let homer_religion = p(&["entities", "all", "homer", "religion"]);
        let handle = composer.open_file(&homer_religion, OpenFlags::default()).unwrap();
        handle.write(0, b"Pastafarian").unwrap();
        handle.flush().unwrap();
        handle.release(false).unwrap();

        let bart_hobby = p(&["entities", "all", "bart", "hobby"]);
        let handle = composer.open_file(&bart_hobby, OpenFlags::default()).unwrap();
        handle.write(0, b"skateboarding").unwrap();
        handle.flush().unwrap();
        handle.release(false).unwrap();

        // "bart" has no "religion" attribute, so it is not a member of the
        // "religion" result set even though it exists in the namespace.
        let bart_under_religion = p(&["query", "religion", "all", "bart", "hobby"]);
        assert!(matches!(
            composer.attr(&bart_under_religion).unwrap_err(),
            VfsError::NotFound(_)
        ));
        assert!(matches!(
            composer.open_file(&bart_under_religion, OpenFlags::default()).unwrap_err(),
            VfsError::NotFound(_)
        ));
        let cancel = CancellationToken::new();
        assert!(matches!(
            composer.readdir(&bart_under_religion, &cancel).unwrap_err(),
            VfsError::NotFound(_)
        ));

        // "homer" does have it, so the same shape of path succeeds.
        let homer_under_religion = p(&["query", "religion", "all", "homer", "religion"]);
        assert_eq!(composer.attr(&homer_under_religion).unwrap().kind, NodeType::File);
    }

    #[test]
    fn shard_entity_mkdir_and_remove_mirror_all_entity() {
        let engine = Arc::new(StorageEngine::open_in_memory().unwrap());
        let composer = Composer::new(engine.clone(), Config::default(), ":memory:".to_string()).unwrap();
        let shard = engine.shard_for("homer");
        let dir_path = p(&["entities", "shard", &shard.level1, &shard.level2, "homer", "d"]);

        composer.mkdir(&dir_path).unwrap();
        let attr = composer.attr(&dir_path).unwrap();
        assert_eq!(attr.kind, NodeType::Directory);

        composer.remove(&dir_path, true).unwrap();
        assert!(matches!(composer.attr(&dir_path).unwrap_err(), VfsError::NotFound(_)));
    }
}
