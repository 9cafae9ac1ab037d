//! Clean command - Remove the bazsync data directory
//!
//! Deletes the entity store and the sync state, so the next pass is a
//! full one.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use super::{load_config, print_info, resolve_workspace};
use crate::GlobalOptions;

/// Arguments for the clean command
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,

    /// Show what would be deleted without actually deleting
    #[arg(long, short = 'n')]
    dry_run: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Result of the clean operation
#[derive(Debug, Clone, Serialize)]
pub struct CleanResult {
    /// Directory that was/would be deleted
    pub path: String,
    pub dry_run: bool,
    /// Whether the directory existed
    pub existed: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Execute the clean command
pub async fn execute(args: CleanArgs, global: GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace, None)?;
    let data_dir = config.data_dir(&workspace);

    let existed = data_dir.exists();
    let size_bytes = if existed { dir_size(&data_dir).ok() } else { None };

    if existed && !args.yes && !args.dry_run {
        println!("This will delete {}", data_dir.display());
        if let Some(size) = size_bytes {
            println!("  Size: {}", format_size(size));
        }
        print!("\nProceed with cleanup? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cleanup cancelled.");
            return Ok(());
        }
    }

    let mut result = CleanResult {
        path: data_dir.display().to_string(),
        dry_run: args.dry_run,
        existed,
        success: true,
        error: None,
        size_bytes,
    };

    if existed && !args.dry_run {
        if let Err(e) = std::fs::remove_dir_all(&data_dir) {
            result.success = false;
            result.error = Some(e.to_string());
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result, global.quiet);
    }

    if let Some(ref error) = result.error {
        anyhow::bail!("Failed to delete {}: {}", result.path, error);
    }
    Ok(())
}

fn print_result(result: &CleanResult, quiet: bool) {
    let size = result.size_bytes.map(format_size).unwrap_or_default();
    if !result.existed {
        print_info(&format!("Nothing to clean at {}", result.path), quiet);
    } else if result.dry_run {
        print_info(&format!("Would delete {} ({})", result.path, size), quiet);
    } else if result.success {
        print_info(&format!("Deleted {} ({})", result.path, size), quiet);
    }
}

/// Calculate the total size of a directory
fn dir_size(path: &Path) -> Result<u64> {
    if path.is_file() {
        return Ok(std::fs::metadata(path)
            .context("Failed to get file metadata")?
            .len());
    }

    Ok(walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.metadata().map(|m| m.len()).unwrap_or(0))
        .sum())
}

/// Format a size in bytes as a human-readable string
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{} bytes", b),
    }
}
