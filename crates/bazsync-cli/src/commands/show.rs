//! Show command - Print what the last pass stored for one target

use anyhow::{Context, Result};
use bazsync_core::{
    open_jvm_store, JvmModuleEntity, JvmResourceId, Label, SyncState, VertexId, SYNC_STATE_FILE,
};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::{load_config, resolve_workspace};
use crate::GlobalOptions;

/// Arguments for the show command
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Target label (e.g. //java/com/example:lib)
    label: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct TargetView {
    label: Label,
    vertex_id: VertexId,
    #[serde(skip_serializing_if = "Option::is_none")]
    module: Option<JvmModuleEntity>,
    extra_deps: BTreeSet<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved_jdeps: Option<BTreeSet<PathBuf>>,
    linked: Vec<JvmResourceId>,
}

/// Execute the show command
pub async fn execute(args: ShowArgs, global: GlobalOptions) -> Result<()> {
    let label = Label::parse(&args.label).with_context(|| format!("Invalid label '{}'", args.label))?;
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace, None)?;
    let data_dir = config.data_dir(&workspace);

    let state = SyncState::load(&data_dir.join(SYNC_STATE_FILE))
        .context("Failed to read sync state")?;
    let Some(entry) = state.targets.get(&label) else {
        anyhow::bail!("{} was not part of the last sync", label);
    };
    let vertex_id = entry.vertex_id;

    let store = open_jvm_store(&data_dir, &config.storage.store_name)
        .context("Failed to open entity store")?;
    let reader = store.reader()?;

    let reference = JvmResourceId::VertexReference { vertex_id };
    let view = TargetView {
        vertex_id,
        module: reader.get_entity(&reference),
        extra_deps: reader
            .get_entity(&JvmResourceId::VertexDeps {
                label: label.clone(),
            })
            .as_ref()
            .and_then(JvmModuleEntity::as_vertex_deps)
            .map(|d| d.deps.clone())
            .unwrap_or_default(),
        resolved_jdeps: reader
            .get_entity(&JvmResourceId::JdepsCache { vertex_id })
            .as_ref()
            .and_then(JvmModuleEntity::as_jdeps_cache)
            .map(|c| c.jdeps.clone()),
        linked: reader.direct_dependencies(&reference),
        label,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("{} (vertex {})", view.label, view.vertex_id);
    match view.module {
        Some(ref module) => println!("  module: {}", module.kind_name()),
        None => println!("  module: none"),
    }
    println!("  extra deps:");
    for dep in &view.extra_deps {
        println!("    {}", dep);
    }
    match view.resolved_jdeps {
        Some(ref jars) => {
            println!("  resolved jdeps ({}):", jars.len());
            for jar in jars {
                println!("    {}", jar.display());
            }
        }
        None => println!("  resolved jdeps: not computed"),
    }
    if !view.linked.is_empty() {
        println!("  linked:");
        for id in &view.linked {
            println!("    {}", id);
        }
    }
    Ok(())
}
