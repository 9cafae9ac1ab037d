//! bazsync Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.bazsync/config.toml`
//! - Local config: `.bazsync/config.toml` (in workspace)
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → CLI overrides.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Levels accepted by `[logging] level`
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Root configuration for bazsync.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BazsyncConfig {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Sync pass configuration
    pub sync: SyncConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Where the entity store and sync state live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for bazsync data (default: `.bazsync`)
    pub data_dir: PathBuf,

    /// Entity store name; the database is `<data_dir>/<store_name>.db`
    pub store_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".bazsync"),
            store_name: "jvm".to_string(),
        }
    }
}

/// Sync pass behaviour.
///
/// # Example TOML
///
/// ```toml
/// [sync]
/// execution_root = "/private/var/tmp/_bazel_me/abc123/execroot/main"
/// fail_on_cycle = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Build execution root that relative output paths resolve against.
    /// Defaults to the workspace root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_root: Option<PathBuf>,

    /// Abort a pass when a dependency cycle keeps targets out of the order
    pub fail_on_cycle: bool,

    /// Ignore `header_X` jars that have a `processed_X` sibling
    pub skip_superseded_header_jars: bool,

    /// Decode jdeps descriptors in parallel before analysis
    pub prefetch_jdeps: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            execution_root: None,
            fail_on_cycle: false,
            skip_superseded_header_jars: true,
            prefetch_jdeps: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override bazsync data directory
    pub data_dir: Option<PathBuf>,

    /// Override the build execution root
    pub execution_root: Option<PathBuf>,

    /// Override cycle handling
    pub fail_on_cycle: Option<bool>,

    /// Override log level
    pub log_level: Option<String>,

    /// Override log format
    pub log_format: Option<LogFormat>,
}

impl BazsyncConfig {
    /// Apply CLI overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref dir) = overrides.data_dir {
            self.storage.data_dir = dir.clone();
        }

        if let Some(ref root) = overrides.execution_root {
            self.sync.execution_root = Some(root.clone());
        }

        if let Some(fail) = overrides.fail_on_cycle {
            self.sync.fail_on_cycle = fail;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }

        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.storage.store_name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::invalid_value(
                "storage.store_name",
                format!("'{name}' must be non-empty and use only [A-Za-z0-9_-]"),
            ));
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!(
                    "unknown level '{}', expected one of {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            ));
        }
        Ok(())
    }

    /// Get the effective data directory for a workspace.
    pub fn data_dir(&self, workspace_root: &Path) -> PathBuf {
        resolve_against(workspace_root, &self.storage.data_dir)
    }

    /// Get the effective execution root for a workspace.
    pub fn execution_root(&self, workspace_root: &Path) -> PathBuf {
        match self.sync.execution_root {
            Some(ref root) => resolve_against(workspace_root, root),
            None => workspace_root.to_path_buf(),
        }
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
