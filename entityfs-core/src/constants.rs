//! Compiled defaults. All of these are overridable through [`crate::config::Config`];
//! nothing here is read directly by business logic outside of `Config::default`.

/// Name stamped into the `___entityfs_schema` metatable on first open.
pub const SCHEMA_NAME: &str = "entityfs";

/// Current schema version this binary expects. Bumped with each migration.
pub const SCHEMA_VERSION: u32 = 1;

/// Default namespace label (the empty string).
pub const DEFAULT_NAMESPACE: &str = "";

/// Default file-contents LRU capacity (entries).
pub const DEFAULT_CONTENT_CACHE_CAPACITY: u64 = 100;

/// Default file-attribute LRU capacity (entries).
pub const DEFAULT_ATTR_CACHE_CAPACITY: u64 = 10_000;

/// Default query-membership LRU capacity (entries).
pub const DEFAULT_QUERY_CACHE_CAPACITY: u64 = 10_000;

/// Default maximum buffered-write size per atomic file handle, in bytes.
/// `None` in [`Config`](crate::config::Config) disables the limit; this is
/// only the value used when a limit is requested without a number.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Default debounce delay for the change watcher, in milliseconds.
pub const DEFAULT_CHANGE_WATCHER_DELAY_MS: u64 = 200;

/// Filenames matched against this list during `Lookup` are refused with EIO.
/// Targets editor swapfiles and trash-can names, per `spec.md` §4.5.
pub const DEFAULT_FORBIDDEN_FILENAME_PATTERNS: &[&str] = &[
    r"^\.goutputstream-.*$",
    r"^\..*\.swp$",
    r"^\..*\.swx$",
    r"^\.~lock\..*#$",
    r"^~\$.*$",
    r"^\.Trash.*$",
    r"^\.DS_Store$",
];
