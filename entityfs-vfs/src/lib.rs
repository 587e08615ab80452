//! The composed virtual filesystem over a `StorageEngine`: atomic-file
//! handles, the content/attribute/query-membership caches, the
//! debounced change watcher, and the path composer that ties the
//! service/namespace/entities/query subtrees together (`spec.md` §4.4,
//! §4.5).

mod atomic_file;
mod cache;
mod change_watcher;
mod composer;
mod entity_dir;
mod error;
mod node;
mod result_set;
mod service;

pub use atomic_file::{AtomicFile, AtomicFileHandle, OpenFlags};
pub use cache::VfsCaches;
pub use change_watcher::{touch, ChangeWatcher};
pub use composer::{Composer, OpenHandle};
pub use error::{VfsError, VfsResult};
pub use node::{Attr, DirEntry, DirEntryType, NodeType};
pub use result_set::ResultSet;
pub use service::ServiceTree;
