//! Schema upgrade scripts, one module per version, in the teacher's
//! `migrations/vNNN_*.rs` layout.

mod v001_initial;

pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

/// All migrations in ascending version order. `schema::open` applies every
/// migration whose version is greater than the database's current version.
pub fn all() -> &'static [Migration] {
    &[Migration {
        version: 1,
        sql: v001_initial::MIGRATION_SQL,
    }]
}
