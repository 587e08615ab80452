//! Generic schema-versioning mechanism (`spec.md` §4.3): a named schema and
//! monotonic version tracked in a `___entityfs_schema` metatable. On open:
//! create the metatable if absent, refuse on name mismatch, apply upgrades
//! in order (each inside its own transaction with a pre/post version
//! check), then `VACUUM`.

use rusqlite::Connection;

use crate::error::{StorageError, StorageResult};
use crate::migrations::{self, Migration};

const METATABLE: &str = "___entityfs_schema";

pub fn open(conn: &Connection, expected_name: &str) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {METATABLE} (name TEXT NOT NULL, version INTEGER NOT NULL)"
    ))?;

    let row: Option<(String, u32)> = match conn.query_row(
        &format!("SELECT name, version FROM {METATABLE} LIMIT 1"),
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    ) {
        Ok(row) => Some(row),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(e.into()),
    };

    let current_version = match row {
        None => {
            conn.execute(
                &format!("INSERT INTO {METATABLE} (name, version) VALUES (?1, 0)"),
                rusqlite::params![expected_name],
            )?;
            0u32
        }
        Some((name, version)) => {
            if name != expected_name {
                return Err(StorageError::Schema(format!(
                    "schema name mismatch: database has {name:?}, expected {expected_name:?}"
                )));
            }
            version
        }
    };

    let mut version = current_version;
    for migration in migrations::all() {
        if migration.version > version {
            apply(conn, migration, version)?;
            version = migration.version;
        }
    }

    conn.execute_batch("VACUUM")?;
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration, pre_version: u32) -> StorageResult<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> StorageResult<()> {
        let observed: u32 =
            conn.query_row(&format!("SELECT version FROM {METATABLE}"), [], |r| r.get(0))?;
        if observed != pre_version {
            return Err(StorageError::Schema(format!(
                "concurrent schema upgrade detected: expected version {pre_version}, found {observed}"
            )));
        }
        conn.execute_batch(migration.sql)?;
        conn.execute(
            &format!("UPDATE {METATABLE} SET version = ?1"),
            rusqlite::params![migration.version],
        )?;
        let post: u32 =
            conn.query_row(&format!("SELECT version FROM {METATABLE}"), [], |r| r.get(0))?;
        if post != migration.version {
            return Err(StorageError::Schema(format!(
                "migration to version {} did not take effect (observed {post})",
                migration.version
            )));
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        open(&conn, "entityfs").unwrap();
        open(&conn, "entityfs").unwrap();
        let version: u32 = conn
            .query_row(&format!("SELECT version FROM {METATABLE}"), [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, migrations::all().last().unwrap().version);
    }

    #[test]
    fn rejects_name_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        open(&conn, "entityfs").unwrap();
        let err = open(&conn, "other-name").unwrap_err();
        assert!(matches!(err, StorageError::Schema(_)));
    }

    #[test]
    fn creates_items_and_sharding_key_tables() {
        let conn = Connection::open_in_memory().unwrap();
        open(&conn, "entityfs").unwrap();
        let items: i64 = conn
            .query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(items, 0);
        let keys: i64 = conn
            .query_row("SELECT COUNT(*) FROM sharding_key", [], |r| r.get(0))
            .unwrap();
        assert_eq!(keys, 0);
    }
}
