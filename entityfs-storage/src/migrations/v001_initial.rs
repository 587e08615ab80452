//! V001: initial schema — `items` (the versioned row store) and
//! `sharding_key` (the singleton shard secret).

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    row_guid TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    tombstone INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    directory INTEGER NOT NULL DEFAULT 0,
    timestamp_unix_nano INTEGER NOT NULL,
    data_length INTEGER NOT NULL DEFAULT 0,
    sha256 BLOB NOT NULL,
    trimmed_length INTEGER NOT NULL DEFAULT 0,
    trimmed_sha256 BLOB NOT NULL,
    whitespace_prefix BLOB,
    trimmed_data BLOB,
    whitespace_suffix BLOB,
    entity_id_shard1 TEXT NOT NULL,
    entity_id_shard2 TEXT NOT NULL,
    authorship_metadata BLOB
) STRICT;

CREATE INDEX IF NOT EXISTS idx_items_active_lookup
    ON items(namespace, entity_id, filename, active, tombstone);

CREATE INDEX IF NOT EXISTS idx_items_shard_lookup
    ON items(namespace, entity_id_shard1, entity_id_shard2, active, tombstone);

CREATE INDEX IF NOT EXISTS idx_items_namespace_active
    ON items(namespace, active, tombstone);

CREATE TABLE IF NOT EXISTS sharding_key (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    key BLOB NOT NULL
) STRICT;
"#;
