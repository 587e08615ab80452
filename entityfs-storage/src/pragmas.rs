//! Connection pragmas. WAL + NORMAL sync on the writer for throughput
//! without sacrificing durability across normal shutdowns; read-only
//! connections get a busy timeout since they can still race a checkpoint.

use rusqlite::Connection;

use crate::error::StorageResult;

pub fn apply_writer_pragmas(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

pub fn apply_read_pragmas(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
    Ok(())
}
