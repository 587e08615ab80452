//! The query clause language (`spec.md` §4.2) and its compiler to a
//! parameterized SQL join tree (`spec.md` §4.3 "ParsedQuery").

mod compiler;
mod parser;

pub use compiler::{compile, CompiledQuery};
pub use parser::parse;

use entityfs_core::status::{StatusKind, StatusKindExt};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidArgument(String),

    #[error("unimplemented query feature: {0}")]
    Unimplemented(String),
}

impl StatusKindExt for QueryError {
    fn kind(&self) -> StatusKind {
        match self {
            QueryError::InvalidArgument(_) => StatusKind::InvalidArgument,
            QueryError::Unimplemented(_) => StatusKind::Unimplemented,
        }
    }
}

/// One parsed clause: its kind and whether it was negated with a leading `-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub negated: bool,
    pub kind: ClauseKind,
}

/// The parsed shape of a single clause, before SQL compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClauseKind {
    /// Bare filename: entity has an active non-tombstone row there.
    FileExists(String),
    /// `filename=content`: active row's trimmed bytes equal trimmed `content`.
    FileContents(String, Vec<u8>),
    /// `id[entity_id]`: restriction to one entity.
    EntityIdEquals(String),
    /// `shard[h1]` or `shard[h1,h2]`: restriction by shard prefix.
    EntityInShard(String, Option<String>),
    /// `random[n]`: reserved, parses but is rejected at compile time.
    RandomSelection(i64),
    /// `blank[filename]`: active row's trimmed bytes are empty.
    FileHasTrimmedContents(String),
}
