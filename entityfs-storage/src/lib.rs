//! The append-only, revision-tracked row store: schema migrations, the
//! connection pool, the query clause compiler, and the `StorageEngine`
//! entry point (`spec.md` §3-4).

mod engine;
mod error;
mod migrations;
mod pool;
mod pragmas;
pub mod query;
mod row;
mod schema;
mod shard;
mod whitespace;

pub use engine::{DatabaseMetadata, DatabaseTotals, StorageEngine, WriteRequest};
pub use error::{StorageError, StorageResult};
pub use query::{Clause, ClauseKind, QueryError};
pub use row::{DeletionType, FileContents, FileHeader};
pub use shard::{Shard, ShardKey, SHARD_KEY_LEN};
