//! `StorageEngine` — owns the connection pool, runs schema upgrades on
//! open, and implements the write/read/streaming surface of `spec.md` §4.3.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use entityfs_core::cancel::CancellationToken;
use entityfs_core::validate::{is_valid_attribute_path, is_valid_entity_id};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{StorageError, StorageResult};
use crate::pool::ConnectionPool;
use crate::query::{self, Clause};
use crate::row::{ActiveRow, DeletionType, FileContents, FileHeader};
use crate::schema;
use crate::shard::{self, Shard, ShardKey};
use crate::whitespace;

const SCHEMA_NAME: &str = "entityfs";

/// A single write/delete request, per `spec.md` §4.3 "Write path".
pub struct WriteRequest<'a> {
    pub namespace: &'a str,
    pub entity_id: &'a str,
    pub filename: &'a str,
    /// Empty string means "no optimistic-concurrency check".
    pub old_revision: &'a str,
    pub tombstone: bool,
    pub data: &'a [u8],
    pub authorship_metadata: Option<&'a [u8]>,
    pub directory: bool,
    pub deletion_type: DeletionType,
}

/// Aggregate counters returned by `get_database_metadata`.
#[derive(Debug, Clone, Default)]
pub struct DatabaseMetadata {
    pub last_changed_unix_nano: i64,
    pub totals: Option<DatabaseTotals>,
    pub shard_key: Option<[u8; shard::SHARD_KEY_LEN]>,
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseTotals {
    pub total_rows: i64,
    pub active_rows: i64,
    pub total_stored_bytes: i64,
}

pub struct StorageEngine {
    pool: ConnectionPool,
    shard_key: ShardKey,
}

impl StorageEngine {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let pool = ConnectionPool::open(path)?;
        Self::from_pool(pool)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let pool = ConnectionPool::open_in_memory()?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: ConnectionPool) -> StorageResult<Self> {
        pool.with_writer(|conn| schema::open(conn, SCHEMA_NAME))?;
        let shard_key = pool.with_writer(load_or_create_shard_key)?;
        Ok(Self { pool, shard_key })
    }

    pub fn shard_key(&self) -> &ShardKey {
        &self.shard_key
    }

    pub fn shard_for(&self, entity_id: &str) -> Shard {
        shard::shard(&self.shard_key, entity_id)
    }

    /// `spec.md` §4.3 "Write path", steps 1-10.
    pub fn write_or_delete(&self, req: WriteRequest<'_>) -> StorageResult<FileHeader> {
        if !is_valid_entity_id(req.entity_id) {
            return Err(StorageError::InvalidArgument(format!(
                "invalid entity id: {:?}",
                req.entity_id
            )));
        }
        if !is_valid_attribute_path(req.filename) {
            return Err(StorageError::InvalidArgument(format!(
                "invalid filename: {:?}",
                req.filename
            )));
        }
        if req.directory && !req.data.is_empty() {
            return Err(StorageError::InvalidArgument(
                "directory rows must have empty data".to_string(),
            ));
        }
        if req.tombstone && !req.data.is_empty() {
            return Err(StorageError::InvalidArgument(
                "tombstone rows must have empty data".to_string(),
            ));
        }

        let now = now_unix_nano();
        let new_row_guid = new_row_guid();
        let shard = self.shard_for(req.entity_id);

        let result = self.pool.with_writer(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            let result = self.write_or_delete_tx(conn, &req, now, &new_row_guid, &shard);
            match result {
                Ok(header) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(header)
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        });
        match &result {
            Ok(header) => tracing::debug!(
                namespace = req.namespace,
                entity_id = req.entity_id,
                filename = req.filename,
                row_guid = %header.row_guid,
                tombstone = header.tombstone,
                "wrote row"
            ),
            Err(err) => tracing::warn!(
                namespace = req.namespace,
                entity_id = req.entity_id,
                filename = req.filename,
                %err,
                "write_or_delete failed"
            ),
        }
        result
    }

    fn write_or_delete_tx(
        &self,
        conn: &Connection,
        req: &WriteRequest<'_>,
        now: i64,
        new_row_guid: &str,
        shard: &Shard,
    ) -> StorageResult<FileHeader> {
        let current = query_active_row(conn, req.namespace, req.entity_id, req.filename)?;
        let current_live = current.as_ref().filter(|r| !r.tombstone);

        match req.deletion_type {
            DeletionType::None => {
                if current_live.is_some() {
                    return Err(StorageError::AlreadyExists {
                        namespace: req.namespace.to_string(),
                        entity_id: req.entity_id.to_string(),
                        filename: req.filename.to_string(),
                    });
                }
            }
            DeletionType::File => {
                if current_live.is_some_and(|r| r.directory) {
                    return Err(StorageError::TypeConflict {
                        namespace: req.namespace.to_string(),
                        entity_id: req.entity_id.to_string(),
                        filename: req.filename.to_string(),
                    });
                }
            }
            DeletionType::Dir => {
                if current_live.is_some_and(|r| !r.directory) {
                    return Err(StorageError::TypeConflict {
                        namespace: req.namespace.to_string(),
                        entity_id: req.entity_id.to_string(),
                        filename: req.filename.to_string(),
                    });
                }
            }
            DeletionType::Any => {}
        }

        if !req.old_revision.is_empty() {
            let matches = current
                .as_ref()
                .map(|r| r.row_guid == req.old_revision)
                .unwrap_or(false);
            if !matches {
                return Err(StorageError::RevisionConflict {
                    namespace: req.namespace.to_string(),
                    entity_id: req.entity_id.to_string(),
                    filename: req.filename.to_string(),
                });
            }
        }

        if req.tombstone && current.is_none() {
            return Err(StorageError::NotFound {
                namespace: req.namespace.to_string(),
                entity_id: req.entity_id.to_string(),
                filename: Some(req.filename.to_string()),
            });
        }

        if !req.tombstone {
            if let Some(live) = current_live {
                if live.full_bytes() == req.data {
                    return Ok(FileHeader {
                        namespace: req.namespace.to_string(),
                        entity_id: req.entity_id.to_string(),
                        filename: req.filename.to_string(),
                        row_guid: live.row_guid.clone(),
                        timestamp_unix_nano: live.timestamp_unix_nano,
                        tombstone: false,
                        directory: live.directory,
                        data_length: live.data_length,
                        sha256: live.sha256.clone(),
                        trimmed_length: live.trimmed_length,
                        trimmed_sha256: live.trimmed_sha256.clone(),
                    });
                }
            }
        }

        if let Some(current) = &current {
            conn.execute(
                "UPDATE items SET active = 0, whitespace_prefix = NULL, trimmed_data = NULL, whitespace_suffix = NULL
                 WHERE row_guid = ?1",
                params![current.row_guid],
            )?;
        }

        let (prefix, trimmed, suffix) = whitespace::partition(req.data);
        let data_length = req.data.len() as i64;
        let trimmed_length = trimmed.len() as i64;
        let sha256_full = sha256_of(req.data);
        let trimmed_sha256 = sha256_of(trimmed);

        conn.execute(
            "INSERT INTO items (
                row_guid, namespace, entity_id, filename, tombstone, active, directory,
                timestamp_unix_nano, data_length, sha256, trimmed_length, trimmed_sha256,
                whitespace_prefix, trimmed_data, whitespace_suffix,
                entity_id_shard1, entity_id_shard2, authorship_metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                new_row_guid,
                req.namespace,
                req.entity_id,
                req.filename,
                req.tombstone,
                req.directory,
                now,
                data_length,
                sha256_full,
                trimmed_length,
                trimmed_sha256,
                none_if_empty(prefix),
                none_if_empty(trimmed),
                none_if_empty(suffix),
                shard.level1,
                shard.level2,
                req.authorship_metadata,
            ],
        )?;

        Ok(FileHeader {
            namespace: req.namespace.to_string(),
            entity_id: req.entity_id.to_string(),
            filename: req.filename.to_string(),
            row_guid: new_row_guid.to_string(),
            timestamp_unix_nano: now,
            tombstone: req.tombstone,
            directory: req.directory,
            data_length,
            sha256: sha256_full,
            trimmed_length,
            trimmed_sha256,
        })
    }

    /// `spec.md` §4.3 "Read path".
    pub fn read_file(
        &self,
        namespace: &str,
        entity_id: &str,
        filename: &str,
    ) -> StorageResult<FileContents> {
        self.pool.with_reader(|conn| {
            let row = conn
                .query_row(
                    "SELECT row_guid, directory, tombstone, timestamp_unix_nano,
                            whitespace_prefix, trimmed_data, whitespace_suffix,
                            data_length, sha256, trimmed_length, trimmed_sha256
                     FROM items
                     WHERE namespace = ?1 AND entity_id = ?2 AND filename = ?3
                       AND active = 1 AND tombstone = 0",
                    params![namespace, entity_id, filename],
                    row_to_active_row,
                )
                .optional()?;

            let row = row.ok_or_else(|| StorageError::NotFound {
                namespace: namespace.to_string(),
                entity_id: entity_id.to_string(),
                filename: Some(filename.to_string()),
            })?;

            let data = row.full_bytes();
            Ok(FileContents {
                header: FileHeader {
                    namespace: namespace.to_string(),
                    entity_id: entity_id.to_string(),
                    filename: filename.to_string(),
                    row_guid: row.row_guid,
                    timestamp_unix_nano: row.timestamp_unix_nano,
                    tombstone: row.tombstone,
                    directory: row.directory,
                    data_length: row.data_length,
                    sha256: row.sha256,
                    trimmed_length: row.trimmed_length,
                    trimmed_sha256: row.trimmed_sha256,
                },
                data,
            })
        })
    }

    /// All active non-tombstone file headers under an entity (no bytes).
    pub fn get_entity(&self, namespace: &str, entity_id: &str) -> StorageResult<Vec<FileHeader>> {
        self.pool.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT filename, row_guid, directory, timestamp_unix_nano,
                        data_length, sha256, trimmed_length, trimmed_sha256
                 FROM items
                 WHERE namespace = ?1 AND entity_id = ?2 AND active = 1 AND tombstone = 0",
            )?;
            let rows = stmt.query_map(params![namespace, entity_id], |r| {
                Ok(FileHeader {
                    namespace: namespace.to_string(),
                    entity_id: entity_id.to_string(),
                    filename: r.get(0)?,
                    row_guid: r.get(1)?,
                    directory: r.get::<_, i64>(2)? != 0,
                    timestamp_unix_nano: r.get(3)?,
                    data_length: r.get(4)?,
                    sha256: r.get(5)?,
                    trimmed_length: r.get(6)?,
                    trimmed_sha256: r.get(7)?,
                    tombstone: false,
                })
            })?;
            let headers: Vec<FileHeader> = rows.collect::<Result<_, _>>()?;
            if headers.is_empty() {
                return Err(StorageError::NotFound {
                    namespace: namespace.to_string(),
                    entity_id: entity_id.to_string(),
                    filename: None,
                });
            }
            Ok(headers)
        })
    }

    pub fn list_namespaces(&self) -> StorageResult<Vec<String>> {
        self.pool.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT namespace FROM items WHERE active = 1 AND tombstone = 0",
            )?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
    }

    pub fn get_database_metadata(&self, only_timestamps: bool) -> StorageResult<DatabaseMetadata> {
        self.pool.with_reader(|conn| {
            let last_changed: Option<i64> =
                conn.query_row("SELECT MAX(timestamp_unix_nano) FROM items", [], |r| r.get(0))?;
            let mut metadata = DatabaseMetadata {
                last_changed_unix_nano: last_changed.unwrap_or(0),
                totals: None,
                shard_key: None,
            };
            if !only_timestamps {
                let total_rows: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))?;
                let active_rows: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM items WHERE active = 1",
                    [],
                    |r| r.get(0),
                )?;
                let total_stored_bytes: Option<i64> = conn.query_row(
                    "SELECT SUM(
                        COALESCE(LENGTH(whitespace_prefix), 0)
                        + COALESCE(LENGTH(trimmed_data), 0)
                        + COALESCE(LENGTH(whitespace_suffix), 0)
                     ) FROM items",
                    [],
                    |r| r.get(0),
                )?;
                metadata.totals = Some(DatabaseTotals {
                    total_rows,
                    active_rows,
                    total_stored_bytes: total_stored_bytes.unwrap_or(0),
                });
                metadata.shard_key = Some(*self.shard_key.as_bytes());
            }
            Ok(metadata)
        })
    }

    /// `SELECT DISTINCT entity_id FROM items WHERE active=1 AND tombstone=0 AND namespace=:ns`.
    pub fn stream_all(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
        mut sink: impl FnMut(String) -> StorageResult<()>,
    ) -> StorageResult<()> {
        self.pool.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT entity_id FROM items
                 WHERE active = 1 AND tombstone = 0 AND namespace = ?1
                 ORDER BY entity_id",
            )?;
            let mut rows = stmt.query(params![namespace])?;
            while let Some(row) = rows.next()? {
                if cancel.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }
                sink(row.get(0)?)?;
            }
            Ok(())
        })
    }

    pub fn stream_has_filename(
        &self,
        namespace: &str,
        filename: &str,
        cancel: &CancellationToken,
        mut sink: impl FnMut(String) -> StorageResult<()>,
    ) -> StorageResult<()> {
        self.pool.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT entity_id FROM items
                 WHERE active = 1 AND tombstone = 0 AND namespace = ?1 AND filename = ?2
                 ORDER BY entity_id",
            )?;
            let mut rows = stmt.query(params![namespace, filename])?;
            while let Some(row) = rows.next()? {
                if cancel.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }
                sink(row.get(0)?)?;
            }
            Ok(())
        })
    }

    /// Compiles `clauses` with the dynamic query compiler and streams
    /// matching entity ids row-by-row, checking `cancel` between rows.
    pub fn stream_query(
        &self,
        namespace: &str,
        clauses: &[Clause],
        cancel: &CancellationToken,
        mut sink: impl FnMut(String) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let compiled = query::compile(clauses, namespace)?;
        self.pool.with_reader(|conn| {
            let mut stmt = conn.prepare(&compiled.sql)?;
            let bound: Vec<(&str, &dyn rusqlite::ToSql)> = compiled
                .params
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
                .collect();
            let mut rows = stmt.query(bound.as_slice())?;
            while let Some(row) = rows.next()? {
                if cancel.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }
                sink(row.get(0)?)?;
            }
            Ok(())
        })
    }

    /// Checks whether exactly one entity matches `clauses` restricted to
    /// `entity_id`. Used by the virtual tree's query-membership cache miss
    /// path (`spec.md` §4.5).
    pub fn query_contains_entity(
        &self,
        namespace: &str,
        clauses: &[Clause],
        entity_id: &str,
    ) -> StorageResult<bool> {
        let mut restricted = clauses.to_vec();
        restricted.push(Clause {
            negated: false,
            kind: query::ClauseKind::EntityIdEquals(entity_id.to_string()),
        });
        let compiled = query::compile(&restricted, namespace)?;
        self.pool.with_reader(|conn| {
            let bound: Vec<(&str, &dyn rusqlite::ToSql)> = compiled
                .params
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
                .collect();
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM ({})", compiled.sql),
                bound.as_slice(),
                |r| r.get(0),
            )?;
            Ok(count == 1)
        })
    }
}

fn load_or_create_shard_key(conn: &Connection) -> StorageResult<ShardKey> {
    let existing: Option<Vec<u8>> = conn
        .query_row("SELECT key FROM sharding_key WHERE id = 1", [], |r| r.get(0))
        .optional()?;
    if let Some(bytes) = existing {
        let array: [u8; shard::SHARD_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| StorageError::ShardingKeyMissing)?;
        return Ok(ShardKey::from_bytes(array));
    }
    let key = ShardKey::generate();
    conn.execute(
        "INSERT INTO sharding_key (id, key) VALUES (1, ?1)",
        params![key.as_bytes().as_slice()],
    )?;
    Ok(key)
}

fn query_active_row(
    conn: &Connection,
    namespace: &str,
    entity_id: &str,
    filename: &str,
) -> StorageResult<Option<ActiveRow>> {
    conn.query_row(
        "SELECT row_guid, directory, tombstone, timestamp_unix_nano,
                whitespace_prefix, trimmed_data, whitespace_suffix,
                data_length, sha256, trimmed_length, trimmed_sha256
         FROM items
         WHERE namespace = ?1 AND entity_id = ?2 AND filename = ?3 AND active = 1",
        params![namespace, entity_id, filename],
        row_to_active_row,
    )
    .optional()
    .map_err(StorageError::from)
}

fn row_to_active_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActiveRow> {
    Ok(ActiveRow {
        row_guid: row.get(0)?,
        directory: row.get::<_, i64>(1)? != 0,
        tombstone: row.get::<_, i64>(2)? != 0,
        timestamp_unix_nano: row.get(3)?,
        whitespace_prefix: row.get(4)?,
        trimmed_data: row.get(5)?,
        whitespace_suffix: row.get(6)?,
        data_length: row.get(7)?,
        sha256: row.get(8)?,
        trimmed_length: row.get(9)?,
        trimmed_sha256: row.get(10)?,
    })
}

fn none_if_empty(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.is_empty() {
        None
    } else {
        Some(bytes)
    }
}

fn sha256_of(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn now_unix_nano() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn new_row_guid() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
