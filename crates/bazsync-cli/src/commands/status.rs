//! Status command - Show store statistics and the last sync state

use anyhow::{Context, Result};
use bazsync_core::{open_jvm_store, StoreStats, SyncState, SYNC_STATE_FILE};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use super::{load_config, resolve_workspace};
use crate::GlobalOptions;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Status {
    workspace: PathBuf,
    data_dir: PathBuf,
    initialized: bool,
    store_invalidated: bool,
    synced_targets: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<StoreStats>,
}

/// Execute the status command
pub async fn execute(args: StatusArgs, global: GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace, None)?;
    let data_dir = config.data_dir(&workspace);
    let db_path = data_dir.join(format!("{}.db", config.storage.store_name));

    let (store, store_invalidated) = if db_path.exists() {
        let store = open_jvm_store(&data_dir, &config.storage.store_name)
            .context("Failed to open entity store")?;
        let invalidated = store.was_invalidated()?;
        (Some(store.stats()?), invalidated)
    } else {
        (None, false)
    };

    let state_path = data_dir.join(SYNC_STATE_FILE);
    let synced_targets = match SyncState::load(&state_path) {
        Ok(state) => state.len(),
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable sync state");
            0
        }
    };

    let status = Status {
        workspace,
        data_dir,
        initialized: store.is_some(),
        store_invalidated,
        synced_targets,
        store,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Workspace: {}", status.workspace.display());
    println!("Data dir:  {}", status.data_dir.display());
    match status.store {
        Some(ref stats) => {
            println!("Store:     {} ({})", stats.name, db_path.display());
            println!("  Resources: {}", stats.resources);
            println!("  Entities:  {}", stats.entities);
            println!("  Edges:     {}", stats.edges);
            if status.store_invalidated {
                println!("  (persisted contents were unreadable and have been discarded)");
            }
        }
        None => println!("Store:     not initialized (run `bazsync sync --graph <FILE>`)"),
    }
    println!("Synced targets: {}", status.synced_targets);
    Ok(())
}
