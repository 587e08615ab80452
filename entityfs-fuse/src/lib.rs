//! Translates kernel FUSE requests into calls against the virtual tree
//! composer (`spec.md` §4.7). Every storage-engine call is a suspension
//! point (`spec.md` §5): this adapter runs synchronously on fuser's own
//! dispatch thread but hands the actual database work to the async
//! runtime's blocking pool via `tokio::task::spawn_blocking`, so a slow
//! SQLite transaction never starves other kernel requests sharing the
//! runtime.

mod inode;

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};

use entityfs_core::cancel::CancellationToken;
use entityfs_core::status::{StatusKind, StatusKindExt};
use entityfs_vfs::{Composer, DirEntryType, NodeType, OpenFlags, OpenHandle};

use inode::InodeTable;

const TTL: Duration = Duration::from_secs(1);

fn to_file_type(kind: NodeType) -> FileType {
    match kind {
        NodeType::Directory => FileType::Directory,
        NodeType::File | NodeType::StaticFile => FileType::RegularFile,
        NodeType::Symlink => FileType::Symlink,
    }
}

fn to_errno(kind: StatusKind) -> i32 {
    kind.to_errno()
}

/// Logs anything worse than NotFound before collapsing to an errno, per
/// `spec.md` §4.7 ("richer errors are logged and collapsed to EIO").
fn reply_error<T: StatusKindExt + std::fmt::Display>(op: &str, err: T) -> i32 {
    let kind = err.kind();
    if !matches!(kind, StatusKind::NotFound | StatusKind::Cancelled) {
        tracing::warn!(op, error = %err, "fuse operation failed");
    }
    to_errno(kind)
}

fn attr_for(ino: u64, attr: entityfs_vfs::Attr, uid: u32, gid: u32) -> FileAttr {
    let now = SystemTime::now();
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: to_file_type(attr.kind),
        perm: attr.kind.mode() as u16,
        nlink: 1,
        uid,
        gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// Per-request blocking-pool dispatch, per `spec.md` §5.
fn blocking<T, F>(runtime: &tokio::runtime::Handle, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    runtime.block_on(async { tokio::task::spawn_blocking(f).await.expect("blocking task panicked") })
}

struct OpenFile {
    handle: OpenHandle,
    flush_on_release: bool,
}

/// The `fuser::Filesystem` implementation mounted by `entityfs serve`.
pub struct EntityFilesystem {
    composer: Arc<Composer>,
    runtime: tokio::runtime::Handle,
    inodes: Mutex<InodeTable>,
    handles: Mutex<std::collections::HashMap<u64, OpenFile>>,
    next_fh: AtomicU64,
    uid: u32,
    gid: u32,
}

impl EntityFilesystem {
    pub fn new(composer: Arc<Composer>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            composer,
            runtime,
            inodes: Mutex::new(InodeTable::new()),
            handles: Mutex::new(std::collections::HashMap::new()),
            next_fh: AtomicU64::new(1),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn path_of(&self, ino: u64) -> Option<Vec<String>> {
        self.inodes.lock().unwrap_or_else(|p| p.into_inner()).path_of(ino)
    }

    fn intern(&self, path: Vec<String>) -> u64 {
        self.inodes.lock().unwrap_or_else(|p| p.into_inner()).intern(path)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<Vec<String>> {
        let name = name.to_str()?;
        self.inodes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .child_path(parent, name)
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }
}

impl Filesystem for EntityFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let composer = self.composer.clone();
        let result = blocking(&self.runtime, move || composer.attr(&path));
        match result {
            Ok(attr) => {
                let ino = self.intern(self.child_path(parent, name).unwrap());
                reply.entry(&TTL, &attr_for(ino, attr, self.uid, self.gid), 0);
            }
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let composer = self.composer.clone();
        match blocking(&self.runtime, move || composer.attr(&path)) {
            Ok(attr) => reply.attr(&TTL, &attr_for(ino, attr, self.uid, self.gid)),
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if let (Some(size), Some(fh)) = (size, fh) {
            let handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(OpenFile {
                handle: OpenHandle::Atomic(atomic),
                ..
            }) = handles.get(&fh)
            {
                if let Err(e) = atomic.setattr(size) {
                    reply.error(to_errno(e.kind()));
                    return;
                }
            }
        }
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let composer = self.composer.clone();
        match blocking(&self.runtime, move || composer.attr(&path)) {
            Ok(attr) => reply.attr(&TTL, &attr_for(ino, attr, self.uid, self.gid)),
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let composer = self.composer.clone();
        match blocking(&self.runtime, move || composer.readlink(&path)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let composer = self.composer.clone();
        let path_for_mkdir = path.clone();
        if let Err(e) = blocking(&self.runtime, move || composer.mkdir(&path_for_mkdir)) {
            reply.error(reply_error("mkdir", e));
            return;
        }
        let composer = self.composer.clone();
        let path_for_attr = path.clone();
        match blocking(&self.runtime, move || composer.attr(&path_for_attr)) {
            Ok(attr) => {
                let ino = self.intern(path);
                reply.entry(&TTL, &attr_for(ino, attr, self.uid, self.gid), 0);
            }
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let composer = self.composer.clone();
        match blocking(&self.runtime, move || composer.remove(&path, false)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let composer = self.composer.clone();
        match blocking(&self.runtime, move || composer.remove(&path, true)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let open_flags = OpenFlags {
            truncate: flags & libc::O_TRUNC != 0,
        };
        let composer = self.composer.clone();
        match blocking(&self.runtime, move || composer.open_file(&path, open_flags)) {
            Ok(handle) => {
                let fh = self.alloc_fh();
                self.handles.lock().unwrap_or_else(|p| p.into_inner()).insert(
                    fh,
                    OpenFile {
                        handle,
                        flush_on_release: false,
                    },
                );
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(reply_error("open", e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let open_flags = OpenFlags {
            truncate: flags & libc::O_TRUNC != 0,
        };
        let composer = self.composer.clone();
        let path_for_open = path.clone();
        let handle = match blocking(&self.runtime, move || composer.open_file(&path_for_open, open_flags)) {
            Ok(handle) => handle,
            Err(e) => {
                reply.error(to_errno(e.kind()));
                return;
            }
        };
        let composer = self.composer.clone();
        let path_for_attr = path.clone();
        let attr = match blocking(&self.runtime, move || composer.attr(&path_for_attr)) {
            Ok(attr) => attr,
            Err(_) => entityfs_vfs::Attr {
                size: 0,
                kind: NodeType::File,
            },
        };
        let ino = self.intern(path);
        let fh = self.alloc_fh();
        self.handles.lock().unwrap_or_else(|p| p.into_inner()).insert(
            fh,
            OpenFile {
                handle,
                flush_on_release: false,
            },
        );
        reply.created(&TTL, &attr_for(ino, attr, self.uid, self.gid), 0, fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        let Some(open) = handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match open.handle.read(offset.max(0) as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        let Some(open) = handles.get_mut(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match open.handle.write(offset.max(0) as u64, data) {
            Ok(written) => {
                open.flush_on_release = true;
                reply.written(written as u32);
            }
            Err(e) => reply.error(reply_error("write", e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        let Some(open) = handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match open.handle.flush() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_error("flush", e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let open = self.handles.lock().unwrap_or_else(|p| p.into_inner()).remove(&fh);
        let Some(open) = open else {
            reply.ok();
            return;
        };
        match open.handle.release(open.flush_on_release) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(e.kind())),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let composer = self.composer.clone();
        let cancel = CancellationToken::new();
        let entries = match blocking(&self.runtime, move || composer.readdir(&path, &cancel)) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(to_errno(e.kind()));
                return;
            }
        };
        let mut all = vec![(ino, FileType::Directory, ".".to_string()), (ino, FileType::Directory, "..".to_string())];
        let parent_path = self.path_of(ino).unwrap_or_default();
        for entry in entries {
            let mut child = parent_path.clone();
            child.push(entry.name.clone());
            let child_ino = self.intern(child);
            let kind = match entry.kind {
                DirEntryType::File => FileType::RegularFile,
                DirEntryType::Directory => FileType::Directory,
                DirEntryType::Symlink => FileType::Symlink,
            };
            all.push((child_ino, kind, entry.name));
        }
        for (i, (child_ino, kind, name)) in all.into_iter().enumerate().skip(offset as usize) {
            if reply.add(child_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }
}
