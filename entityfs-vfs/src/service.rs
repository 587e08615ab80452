//! The `service/` subtree (`spec.md` §4.5): static and on-demand leaves
//! reporting process and build metadata. The loopback transport (`http`,
//! `grpc`, `*.pem`) is a function-call boundary per `spec.md` §1 and is
//! represented here only as placeholder leaves, not a real listener.

use std::time::Instant;

use entityfs_storage::StorageEngine;

pub struct ServiceTree {
    engine: std::sync::Arc<StorageEngine>,
    database_path: String,
    started_at: Instant,
}

const LEAVES: &[&str] = &[
    "http",
    "grpc",
    "server.pem",
    "bad_filenames",
    "startup",
    "uptime",
    "pid",
    "version.json",
    "database_path",
    "last_changed",
];

impl ServiceTree {
    pub fn new(engine: std::sync::Arc<StorageEngine>, database_path: String) -> Self {
        Self {
            engine,
            database_path,
            started_at: Instant::now(),
        }
    }

    pub fn leaf_names(&self) -> impl Iterator<Item = &'static str> {
        LEAVES.iter().copied()
    }

    pub fn has_leaf(&self, name: &str) -> bool {
        LEAVES.contains(&name) || name == "heap_bytes"
    }

    pub fn is_directory(&self, name: &str) -> bool {
        name == "stats"
    }

    pub fn read_leaf(&self, name: &str) -> Option<Vec<u8>> {
        match name {
            "http" => Some(b"loopback transport: not a real listener in this build\n".to_vec()),
            "grpc" => Some(b"loopback transport: not a real listener in this build\n".to_vec()),
            "server.pem" => Some(b"-----BEGIN CERTIFICATE-----\nPLACEHOLDER\n-----END CERTIFICATE-----\n".to_vec()),
            "bad_filenames" => Some(
                entityfs_core::constants::DEFAULT_FORBIDDEN_FILENAME_PATTERNS
                    .join("\n")
                    .into_bytes(),
            ),
            "startup" => Some(format!("{:?}\n", self.started_at).into_bytes()),
            "uptime" => Some(format!("{}\n", self.started_at.elapsed().as_secs()).into_bytes()),
            "pid" => Some(format!("{}\n", std::process::id()).into_bytes()),
            "version.json" => Some(
                format!(
                    "{{\"name\":\"entityfs\",\"version\":\"{}\",\"schema_name\":\"{}\",\"schema_version\":{}}}\n",
                    env!("CARGO_PKG_VERSION"),
                    entityfs_core::constants::SCHEMA_NAME,
                    entityfs_core::constants::SCHEMA_VERSION,
                )
                .into_bytes(),
            ),
            "database_path" => Some(format!("{}\n", self.database_path).into_bytes()),
            "last_changed" => {
                let metadata = self.engine.get_database_metadata(true).ok()?;
                Some(format!("{}\n", metadata.last_changed_unix_nano).into_bytes())
            }
            "heap_bytes" => Some(b"0\n".to_vec()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_pid_leaf() {
        let engine = std::sync::Arc::new(StorageEngine::open_in_memory().unwrap());
        let tree = ServiceTree::new(engine, "mem".to_string());
        let pid = tree.read_leaf("pid").unwrap();
        assert_eq!(
            String::from_utf8(pid).unwrap().trim(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn unknown_leaf_is_none() {
        let engine = std::sync::Arc::new(StorageEngine::open_in_memory().unwrap());
        let tree = ServiceTree::new(engine, "mem".to_string());
        assert!(tree.read_leaf("nonexistent").is_none());
    }
}
