//! The atomic-file handle machinery (`spec.md` §4.4): a lazy-read,
//! in-memory buffered file layered on the storage engine, with optimistic
//! revision checks, deferred ("lazy") truncation, and copy-on-flush
//! semantics safe under multiple open handles.
//!
//! Lock order is handle mutex, then file-state mutex, never the reverse
//! (`spec.md` §5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use entityfs_storage::{DeletionType, FileHeader, StorageEngine, WriteRequest};

use crate::error::{VfsError, VfsResult};

/// Caller-supplied open flags, already translated from the kernel's raw
/// `O_*` bits by the FUSE adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub truncate: bool,
}

struct FileState {
    open_handles: u64,
    lazily_truncated: bool,
}

/// Identity and shared state for one `(namespace, entity_id, filename)`
/// attribute. Cheaply clonable; handles hold a strong reference so the
/// file-state survives as long as any handle is open.
#[derive(Clone)]
pub struct AtomicFile {
    inner: Arc<AtomicFileInner>,
}

struct AtomicFileInner {
    engine: Arc<StorageEngine>,
    namespace: String,
    entity_id: String,
    filename: String,
    size_limit: Option<u64>,
    state: Mutex<FileState>,
    next_handle_id: AtomicU64,
    on_change: Box<dyn Fn() + Send + Sync>,
}

impl AtomicFile {
    pub fn new(
        engine: Arc<StorageEngine>,
        namespace: impl Into<String>,
        entity_id: impl Into<String>,
        filename: impl Into<String>,
        size_limit: Option<u64>,
        on_change: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(AtomicFileInner {
                engine,
                namespace: namespace.into(),
                entity_id: entity_id.into(),
                filename: filename.into(),
                size_limit,
                state: Mutex::new(FileState {
                    open_handles: 0,
                    lazily_truncated: false,
                }),
                next_handle_id: AtomicU64::new(1),
                on_change: Box::new(on_change),
            }),
        }
    }

    /// `Open(flags)`: allocate a handle; the read is deferred (`spec.md` §4.4).
    pub fn open(&self, flags: OpenFlags) -> AtomicFileHandle {
        let id = self.inner.next_handle_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|p| p.into_inner());
            state.open_handles += 1;
        }
        AtomicFileHandle {
            id,
            file: self.clone(),
            true_truncate: flags.truncate,
            state: Mutex::new(HandleState {
                lazy: true,
                data: Vec::new(),
                original_data: Vec::new(),
                last_revision: String::new(),
                present: false,
            }),
        }
    }

    /// `Attr`: current size and existence, via a full read. Callers that
    /// have a cache should prefer it over this (`spec.md` §4.4 "Attr").
    pub fn attr(&self) -> VfsResult<(u64, bool)> {
        match self
            .inner
            .engine
            .read_file(&self.inner.namespace, &self.inner.entity_id, &self.inner.filename)
        {
            Ok(contents) => Ok((contents.data.len() as u64, true)),
            Err(entityfs_storage::StorageError::NotFound { .. }) => Ok((0, false)),
            Err(e) => Err(e.into()),
        }
    }

    fn write_through(&self, data: &[u8], old_revision: &str) -> VfsResult<FileHeader> {
        let header = self.inner.engine.write_or_delete(WriteRequest {
            namespace: &self.inner.namespace,
            entity_id: &self.inner.entity_id,
            filename: &self.inner.filename,
            old_revision,
            tombstone: false,
            data,
            authorship_metadata: None,
            directory: false,
            deletion_type: DeletionType::Any,
        })?;
        (self.inner.on_change)();
        Ok(header)
    }
}

struct HandleState {
    lazy: bool,
    data: Vec<u8>,
    original_data: Vec<u8>,
    last_revision: String,
    present: bool,
}

/// One open handle on an `AtomicFile`. Per-handle operations are serialized
/// by `state`'s mutex.
pub struct AtomicFileHandle {
    id: u64,
    file: AtomicFile,
    true_truncate: bool,
    state: Mutex<HandleState>,
}

impl AtomicFileHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `ensure-read` (`spec.md` §4.4): on first touch, perform the deferred
    /// read, unless the file has been lazily truncated in the meantime.
    fn ensure_read(&self, state: &mut HandleState) -> VfsResult<()> {
        if !state.lazy {
            return Ok(());
        }
        let file_lazily_truncated = {
            let fs = self.file.inner.state.lock().unwrap_or_else(|p| p.into_inner());
            fs.lazily_truncated
        };
        if file_lazily_truncated {
            state.data.clear();
            state.original_data.clear();
            state.present = true;
            state.lazy = false;
            return Ok(());
        }
        match self.file.inner.engine.read_file(
            &self.file.inner.namespace,
            &self.file.inner.entity_id,
            &self.file.inner.filename,
        ) {
            Ok(contents) => {
                state.last_revision = contents.header.row_guid;
                state.data = contents.data.clone();
                state.original_data = contents.data;
                state.present = true;
            }
            Err(entityfs_storage::StorageError::NotFound { .. }) => {
                state.data.clear();
                state.original_data.clear();
                state.present = false;
            }
            Err(e) => return Err(e.into()),
        }
        state.lazy = false;
        Ok(())
    }

    pub fn read(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.ensure_read(&mut state)?;
        let offset = offset as usize;
        if offset >= state.data.len() {
            return Ok(Vec::new());
        }
        let end = (offset + len).min(state.data.len());
        Ok(state.data[offset..end].to_vec())
    }

    pub fn read_all(&self) -> VfsResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.ensure_read(&mut state)?;
        Ok(state.data.clone())
    }

    /// `Write(offset, data)`: zero-pad to cover `offset+len`, enforce the
    /// size limit, copy in, return bytes written.
    pub fn write(&self, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.ensure_read(&mut state)?;
        let offset = offset as usize;
        let needed_len = offset + data.len();
        if let Some(limit) = self.file.inner.size_limit {
            if needed_len as u64 > limit {
                return Err(VfsError::SizeLimitExceeded { limit });
            }
        }
        if state.data.len() < needed_len {
            state.data.resize(needed_len, 0);
        }
        state.data[offset..offset + data.len()].copy_from_slice(data);
        state.present = true;
        Ok(data.len())
    }

    /// `Flush` (`spec.md` §4.4): empty buffer becomes a lazy-truncation
    /// request; unchanged bytes no-op; otherwise write through with the
    /// optimistic revision check.
    pub fn flush(&self) -> VfsResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.ensure_read(&mut state)?;

        if state.data.is_empty() {
            let mut fs = self.file.inner.state.lock().unwrap_or_else(|p| p.into_inner());
            fs.lazily_truncated = true;
            return Ok(());
        }

        if state.present && state.original_data == state.data {
            let mut fs = self.file.inner.state.lock().unwrap_or_else(|p| p.into_inner());
            fs.lazily_truncated = false;
            return Ok(());
        }

        let header = self.file.write_through(&state.data, &state.last_revision)?;
        state.last_revision = header.row_guid;
        state.original_data = state.data.clone();
        state.present = true;
        let mut fs = self.file.inner.state.lock().unwrap_or_else(|p| p.into_inner());
        fs.lazily_truncated = false;
        Ok(())
    }

    /// `Release(flushOnRelease?)`: optionally flush, then drop from the
    /// file's handle set; if that empties the set while a lazy truncation
    /// is still pending, perform it eagerly now.
    pub fn release(self, flush_on_release: bool) -> VfsResult<()> {
        if flush_on_release {
            self.flush()?;
        }
        let should_truncate_now = {
            let mut fs = self
                .file
                .inner
                .state
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            fs.open_handles = fs.open_handles.saturating_sub(1);
            fs.open_handles == 0 && fs.lazily_truncated
        };
        if should_truncate_now {
            self.file.write_through(&[], "")?;
            let mut fs = self
                .file
                .inner
                .state
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            fs.lazily_truncated = false;
        }
        Ok(())
    }

    /// `Setattr(size)`: resize via read-modify-write, or request lazy
    /// truncation for `size == 0`.
    pub fn setattr(&self, size: u64) -> VfsResult<()> {
        if size == 0 {
            let no_open_handles = {
                let fs = self.file.inner.state.lock().unwrap_or_else(|p| p.into_inner());
                fs.open_handles == 0
            };
            if no_open_handles {
                self.file.write_through(&[], "")?;
            } else {
                let mut fs = self.file.inner.state.lock().unwrap_or_else(|p| p.into_inner());
                fs.lazily_truncated = true;
            }
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.data.clear();
            state.present = true;
            state.lazy = false;
            return Ok(());
        }

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.ensure_read(&mut state)?;
        state.data.resize(size as usize, 0);
        Ok(())
    }

    pub fn true_truncate(&self) -> bool {
        self.true_truncate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn engine() -> Arc<StorageEngine> {
        Arc::new(StorageEngine::open_in_memory().unwrap())
    }

    #[test]
    fn write_then_read_round_trips_through_handle() {
        let file = AtomicFile::new(engine(), "", "e", "a", None, || {});
        let handle = file.open(OpenFlags::default());
        handle.write(0, b"hello world").unwrap();
        handle.flush().unwrap();
        assert_eq!(handle.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn offset_write_semantics_append() {
        let file = AtomicFile::new(engine(), "", "e", "a", None, || {});
        let handle = file.open(OpenFlags::default());
        handle.write(0, b"hello1").unwrap();
        handle.write(6, b"hello2").unwrap();
        handle.flush().unwrap();
        assert_eq!(handle.read_all().unwrap(), b"hello1hello2");
    }

    #[test]
    fn empty_flush_is_lazy_truncation() {
        let file = AtomicFile::new(engine(), "", "e", "a", None, || {});
        let first = file.open(OpenFlags::default());
        first.write(0, b"data").unwrap();
        first.flush().unwrap();
        first.release(false).unwrap();

        let second = file.open(OpenFlags::default());
        second.setattr(0).unwrap();
        second.flush().unwrap();
        second.release(false).unwrap();

        let third = file.open(OpenFlags::default());
        assert_eq!(third.read_all().unwrap(), b"");
    }

    #[test]
    fn change_hook_fires_on_real_write() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let file = AtomicFile::new(engine(), "", "e", "a", None, move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        let handle = file.open(OpenFlags::default());
        handle.write(0, b"x").unwrap();
        handle.flush().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn identical_rewrite_does_not_fire_change_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let file = AtomicFile::new(engine(), "", "e", "a", None, move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        let first = file.open(OpenFlags::default());
        first.write(0, b"same").unwrap();
        first.flush().unwrap();
        first.release(false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = file.open(OpenFlags::default());
        second.write(0, b"same").unwrap();
        second.flush().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn size_limit_rejects_oversized_write() {
        let file = AtomicFile::new(engine(), "", "e", "a", Some(4), || {});
        let handle = file.open(OpenFlags::default());
        let err = handle.write(0, b"too long").unwrap_err();
        assert!(matches!(err, VfsError::SizeLimitExceeded { limit: 4 }));
    }
}
