//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.bazsync/config.toml`
//! 2. Local config: `.bazsync/config.toml` (in workspace)
//! 3. CLI overrides
//!
//! Later sources override earlier ones. Files are merged as TOML tables
//! before deserializing, so a key only overrides when a layer sets it.

use crate::error::ConfigError;
use crate::{BazsyncConfig, ConfigOverrides};
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const GLOBAL_CONFIG_DIR: &str = ".bazsync";

/// Local configuration directory name.
const LOCAL_CONFIG_DIR: &str = ".bazsync";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.bazsync`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config table
    global_table: Option<Table>,

    /// Explicit file used in place of the workspace-local config
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.bazsync`).
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR));

        Self {
            global_config_dir,
            global_table: None,
            config_file: None,
        }
    }

    /// Create a loader with a custom global config directory.
    ///
    /// Useful for testing.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_table: None,
            config_file: None,
        }
    }

    /// Read `path` instead of `<workspace>/.bazsync/config.toml`
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a workspace.
    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        match self.config_file {
            Some(ref path) => path.clone(),
            None => workspace_root.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME),
        }
    }

    /// Load configuration for a workspace with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides.
    pub fn load(
        &mut self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<BazsyncConfig, ConfigError> {
        let mut merged = Table::new();

        if let Some(global) = self.global_table()? {
            merge_tables(&mut merged, global);
        }

        let local_path = self.local_config_path(workspace_root);
        if let Some(local) = read_table(&local_path)? {
            debug!("Loaded local config from {:?}", local_path);
            merge_tables(&mut merged, local);
        }

        let mut config: BazsyncConfig = Value::Table(merged)
            .try_into()
            .map_err(ConfigError::Merge)?;

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load only the global configuration.
    pub fn load_global(&mut self) -> Result<Option<BazsyncConfig>, ConfigError> {
        let Some(table) = self.global_table()? else {
            return Ok(None);
        };
        let config: BazsyncConfig = Value::Table(table).try_into().map_err(ConfigError::Merge)?;
        Ok(Some(config))
    }

    /// Load only the local configuration for a workspace.
    pub fn load_local(&self, workspace_root: &Path) -> Result<Option<BazsyncConfig>, ConfigError> {
        let local_path = self.local_config_path(workspace_root);
        let Some(table) = read_table(&local_path)? else {
            return Ok(None);
        };
        Value::Table(table)
            .try_into()
            .map(Some)
            .map_err(|e| ConfigError::parse_toml(&local_path, e))
    }

    /// Save configuration to the global config file.
    pub fn save_global(&self, config: &BazsyncConfig) -> Result<(), ConfigError> {
        let Some(path) = self.global_config_path() else {
            return Err(ConfigError::NoHomeDir);
        };
        save_config_file(&path, config)
    }

    /// Save configuration to the local config file for a workspace.
    pub fn save_local(
        &self,
        workspace_root: &Path,
        config: &BazsyncConfig,
    ) -> Result<(), ConfigError> {
        save_config_file(&self.local_config_path(workspace_root), config)
    }

    /// Initialize local configuration for a workspace.
    ///
    /// Creates `.bazsync/config.toml` with default configuration unless one
    /// already exists.
    pub fn init_local(&self, workspace_root: &Path) -> Result<PathBuf, ConfigError> {
        let config_path = self.local_config_path(workspace_root);
        if !config_path.exists() {
            save_config_file(&config_path, &BazsyncConfig::default())?;
        }
        Ok(config_path)
    }

    /// Clear cached global configuration.
    ///
    /// Forces reload on next `load_global()` call.
    pub fn clear_cache(&mut self) {
        self.global_table = None;
    }

    fn global_table(&mut self) -> Result<Option<Table>, ConfigError> {
        if let Some(ref table) = self.global_table {
            return Ok(Some(table.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        let table = read_table(&global_path)?;
        if table.is_some() {
            debug!("Loaded global config from {:?}", global_path);
        }
        self.global_table = table.clone();
        Ok(table)
    }
}

/// Read a config file as a raw table; a missing file is `None`.
fn read_table(path: &Path) -> Result<Option<Table>, ConfigError> {
    if !path.exists() {
        trace!("Config not found at {:?}", path);
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    content
        .parse::<Table>()
        .map(Some)
        .map_err(|e| ConfigError::parse_toml(path, e))
}

/// Save a configuration file to disk.
fn save_config_file(path: &Path, config: &BazsyncConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

/// Merge `overlay` into `base`; nested tables merge key by key.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match value {
            Value::Table(incoming) => match base.get_mut(&key) {
                Some(Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}
