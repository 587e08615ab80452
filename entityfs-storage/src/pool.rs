//! Connection topology: one serialized writer connection plus a
//! round-robin pool of read-only connections, mirroring the teacher's
//! `DatabaseManager` / `ReadPool` split so concurrent readers never queue
//! behind the writer mutex.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::StorageResult;
use crate::pragmas::{apply_read_pragmas, apply_writer_pragmas};

const DEFAULT_READ_POOL_SIZE: usize = 4;
const MAX_READ_POOL_SIZE: usize = 16;

pub struct ConnectionPool {
    pub(crate) writer: Mutex<Connection>,
    pub(crate) readers: Option<ReadPool>,
    path: Option<PathBuf>,
}

impl ConnectionPool {
    /// Open a pool backed by a file on disk: a dedicated writer plus a
    /// round-robin read pool of read-only connections.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let writer = Connection::open(path)?;
        apply_writer_pragmas(&writer)?;
        let readers = ReadPool::open(path, DEFAULT_READ_POOL_SIZE)?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers: Some(readers),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory pool (tests). In-memory SQLite connections are
    /// each an isolated database, so reads route through the writer.
    pub fn open_in_memory() -> StorageResult<Self> {
        let writer = Connection::open_in_memory()?;
        apply_writer_pragmas(&writer)?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers: None,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Execute a write operation with the serialized writer connection.
    pub fn with_writer<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    /// Execute a read operation: pooled read-only connection when one is
    /// available (file-backed mode), otherwise the writer (in-memory mode).
    pub fn with_reader<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        match &self.readers {
            Some(pool) => pool.with_conn(f),
            None => self.with_writer(f),
        }
    }
}

pub(crate) struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    fn open(path: &Path, pool_size: usize) -> StorageResult<Self> {
        let size = pool_size.clamp(1, MAX_READ_POOL_SIZE);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            apply_read_pragmas(&conn)?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let guard = self.connections[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }
}
