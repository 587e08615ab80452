//! `VfsError` — the composer's own error enum, distinct from
//! `entityfs_storage::StorageError` (which it wraps), per the "one error
//! enum per subsystem" convention.

use entityfs_core::status::{StatusKind, StatusKindExt};
use entityfs_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("name is forbidden by configured pattern: {0:?}")]
    ForbiddenName(String),

    #[error("not a directory: {0:?}")]
    NotADirectory(String),

    #[error("not a file: {0:?}")]
    NotAFile(String),

    #[error("write exceeds configured size limit ({limit} bytes)")]
    SizeLimitExceeded { limit: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("no such entry: {0:?}")]
    NotFound(String),
}

impl StatusKindExt for VfsError {
    fn kind(&self) -> StatusKind {
        match self {
            VfsError::Storage(e) => e.kind(),
            VfsError::ForbiddenName(_) => StatusKind::InvalidArgument,
            VfsError::NotADirectory(_) | VfsError::NotAFile(_) => StatusKind::FailedPrecondition,
            VfsError::SizeLimitExceeded { .. } => StatusKind::InvalidArgument,
            VfsError::Cancelled => StatusKind::Cancelled,
            VfsError::NotFound(_) => StatusKind::NotFound,
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
