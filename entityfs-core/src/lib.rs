//! Shared types for entityfs: the surface-independent status taxonomy,
//! configuration resolution, and filename/entity-id validation used by
//! the storage engine, the virtual tree, and the FUSE adapter alike.

pub mod cancel;
pub mod config;
pub mod constants;
pub mod status;
pub mod validate;

pub use cancel::CancellationToken;
pub use config::{CliOverrides, Config, ConfigError};
pub use status::StatusKind;
