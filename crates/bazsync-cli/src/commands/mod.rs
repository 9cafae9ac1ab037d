//! CLI command implementations

pub mod clean;
pub mod config;
pub mod show;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bazsync_config::{BazsyncConfig, ConfigLoader, ConfigOverrides};

use crate::GlobalOptions;

/// Resolve the workspace path from options or current directory.
pub fn resolve_workspace(global: &GlobalOptions) -> Result<PathBuf> {
    if let Some(ref ws) = global.workspace {
        if !ws.is_dir() {
            anyhow::bail!("Workspace '{}' is not a directory", ws.display());
        }
        return ws
            .canonicalize()
            .with_context(|| format!("Failed to resolve workspace {}", ws.display()));
    }

    std::env::current_dir().context("Failed to get current directory")
}

/// Build a loader honouring `--config`.
pub fn config_loader(global: &GlobalOptions) -> Result<ConfigLoader> {
    let loader = ConfigLoader::new();
    match global.config {
        Some(ref path) => {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Ok(loader.with_config_file(path))
        }
        None => Ok(loader),
    }
}

/// Load configuration (global → local or `--config` → overrides).
///
/// Without command-specific `overrides` the global flags are applied.
pub fn load_config(
    global: &GlobalOptions,
    workspace: &Path,
    overrides: Option<&ConfigOverrides>,
) -> Result<BazsyncConfig> {
    let overrides = match overrides {
        Some(ovr) => ovr.clone(),
        None => global.to_config_overrides(),
    };
    config_loader(global)?
        .load(workspace, Some(&overrides))
        .context("Failed to load configuration")
}

/// Print an info message (respects quiet flag).
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", message);
    }
}
