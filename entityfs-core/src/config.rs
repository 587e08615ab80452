//! Configuration with 3-layer resolution: CLI > config file > compiled
//! defaults. Scaled down from the teacher's 4-layer (CLI > env > project >
//! user) scheme since entityfs has a single process-wide config surface,
//! not per-project overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ATTR_CACHE_CAPACITY, DEFAULT_CHANGE_WATCHER_DELAY_MS, DEFAULT_CONTENT_CACHE_CAPACITY,
    DEFAULT_FORBIDDEN_FILENAME_PATTERNS, DEFAULT_MAX_FILE_SIZE, DEFAULT_QUERY_CACHE_CAPACITY,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in config file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Resolved runtime configuration for a single entityfs mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub content_cache_capacity: u64,
    pub attr_cache_capacity: u64,
    pub query_cache_capacity: u64,
    /// `None` disables the per-handle write size limit.
    pub max_file_size: Option<u64>,
    pub change_watcher_delay_ms: u64,
    pub touch_on_change: Option<PathBuf>,
    pub forbidden_filename_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            content_cache_capacity: DEFAULT_CONTENT_CACHE_CAPACITY,
            attr_cache_capacity: DEFAULT_ATTR_CACHE_CAPACITY,
            query_cache_capacity: DEFAULT_QUERY_CACHE_CAPACITY,
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
            change_watcher_delay_ms: DEFAULT_CHANGE_WATCHER_DELAY_MS,
            touch_on_change: None,
            forbidden_filename_patterns: DEFAULT_FORBIDDEN_FILENAME_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Overrides coming from CLI flags (highest priority layer).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub content_cache_capacity: Option<u64>,
    pub attr_cache_capacity: Option<u64>,
    pub query_cache_capacity: Option<u64>,
    pub max_file_size: Option<u64>,
    pub touch_on_change: Option<PathBuf>,
}

impl Config {
    /// Load configuration: defaults, then an optional TOML file, then CLI
    /// overrides, then validation.
    pub fn load(
        config_path: Option<&Path>,
        cli: &CliOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            config = Self::merge_toml_file(config, path)?;
        }

        config.apply_cli_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    fn merge_toml_file(base: Self, path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
            ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            }
        })?;
        let file_config: PartialConfig = toml::from_str(&contents).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "invalid TOML in config file");
            ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(file_config.apply_onto(base))
    }

    fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if let Some(v) = cli.content_cache_capacity {
            self.content_cache_capacity = v;
        }
        if let Some(v) = cli.attr_cache_capacity {
            self.attr_cache_capacity = v;
        }
        if let Some(v) = cli.query_cache_capacity {
            self.query_cache_capacity = v;
        }
        if let Some(v) = cli.max_file_size {
            self.max_file_size = Some(v);
        }
        if cli.touch_on_change.is_some() {
            self.touch_on_change = cli.touch_on_change.clone();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.content_cache_capacity == 0 {
            return Err(self.invalid("content_cache_capacity must be non-zero"));
        }
        if self.attr_cache_capacity == 0 {
            return Err(self.invalid("attr_cache_capacity must be non-zero"));
        }
        if self.query_cache_capacity == 0 {
            return Err(self.invalid("query_cache_capacity must be non-zero"));
        }
        for pattern in &self.forbidden_filename_patterns {
            regex::Regex::new(pattern)
                .map_err(|e| self.invalid(format!("bad forbidden pattern {pattern:?}: {e}")))?;
        }
        Ok(())
    }

    fn invalid(&self, message: impl Into<String>) -> ConfigError {
        let message = message.into();
        tracing::warn!(error = %message, "invalid config");
        ConfigError::Invalid(message)
    }
}

/// Partial, all-optional view of [`Config`] for TOML file merging: any field
/// absent from the file keeps whatever the lower layer already had.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialConfig {
    content_cache_capacity: Option<u64>,
    attr_cache_capacity: Option<u64>,
    query_cache_capacity: Option<u64>,
    max_file_size: Option<u64>,
    change_watcher_delay_ms: Option<u64>,
    touch_on_change: Option<PathBuf>,
    forbidden_filename_patterns: Option<Vec<String>>,
}

impl PartialConfig {
    fn apply_onto(self, mut base: Config) -> Config {
        if let Some(v) = self.content_cache_capacity {
            base.content_cache_capacity = v;
        }
        if let Some(v) = self.attr_cache_capacity {
            base.attr_cache_capacity = v;
        }
        if let Some(v) = self.query_cache_capacity {
            base.query_cache_capacity = v;
        }
        if self.max_file_size.is_some() {
            base.max_file_size = self.max_file_size;
        }
        if let Some(v) = self.change_watcher_delay_ms {
            base.change_watcher_delay_ms = v;
        }
        if self.touch_on_change.is_some() {
            base.touch_on_change = self.touch_on_change;
        }
        if let Some(v) = self.forbidden_filename_patterns {
            base.forbidden_filename_patterns = v;
        }
        base
    }
}
