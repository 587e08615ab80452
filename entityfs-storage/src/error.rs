//! Storage-layer and query-layer errors, one enum each, per the teacher's
//! "one error enum per subsystem, thiserror only" convention.

use entityfs_core::status::{StatusKind, StatusKindExt};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("entity or file not found: namespace={namespace:?} entity_id={entity_id:?} filename={filename:?}")]
    NotFound {
        namespace: String,
        entity_id: String,
        filename: Option<String>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("already exists: namespace={namespace:?} entity_id={entity_id:?} filename={filename:?}")]
    AlreadyExists {
        namespace: String,
        entity_id: String,
        filename: String,
    },

    #[error("type conflict (file vs directory): namespace={namespace:?} entity_id={entity_id:?} filename={filename:?}")]
    TypeConflict {
        namespace: String,
        entity_id: String,
        filename: String,
    },

    #[error("revision conflict: namespace={namespace:?} entity_id={entity_id:?} filename={filename:?}")]
    RevisionConflict {
        namespace: String,
        entity_id: String,
        filename: String,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("sharding key is missing or malformed")]
    ShardingKeyMissing,

    #[error("schema error: {0}")]
    Schema(String),

    #[error("checksum computation error: {0}")]
    Checksum(String),

    #[error("query error: {0}")]
    Query(#[from] crate::query::QueryError),

    #[error("operation cancelled")]
    Cancelled,
}

impl StatusKindExt for StorageError {
    fn kind(&self) -> StatusKind {
        match self {
            StorageError::NotFound { .. } => StatusKind::NotFound,
            StorageError::InvalidArgument(_) => StatusKind::InvalidArgument,
            StorageError::AlreadyExists { .. }
            | StorageError::TypeConflict { .. }
            | StorageError::RevisionConflict { .. } => StatusKind::FailedPrecondition,
            StorageError::Sqlite(_)
            | StorageError::ShardingKeyMissing
            | StorageError::Schema(_)
            | StorageError::Checksum(_) => StatusKind::Internal,
            StorageError::Query(e) => e.kind(),
            StorageError::Cancelled => StatusKind::Cancelled,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
