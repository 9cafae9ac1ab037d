//! Sync command - Run one sync pass over a build graph snapshot

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bazsync_config::{BazsyncConfig, ConfigOverrides};
use bazsync_core::{
    open_jvm_store, AnalyzerOptions, CancellationToken, ExecRootPathsResolver, GraphSnapshot,
    PetTargetGraph, SyncContext, SyncError, SyncExecutor, SyncOptions, SyncReport,
    SYNC_STATE_FILE,
};
use clap::Args;
use tracing::{debug, warn};

use super::{load_config, print_info, resolve_workspace};
use crate::progress::{finish_spinner, finish_spinner_error, finish_spinner_warn, spinner};
use crate::GlobalOptions;

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Graph snapshot (JSON) exported from the build tool
    #[arg(long, short = 'g')]
    graph: PathBuf,

    /// Rebuild every target instead of only the changed ones
    #[arg(long)]
    full: bool,

    /// Build execution root that descriptor and jar paths resolve against
    #[arg(long)]
    execution_root: Option<PathBuf>,

    /// Fail instead of warning when a dependency cycle blocks targets
    #[arg(long)]
    fail_on_cycle: bool,

    /// Output the report as JSON
    #[arg(long)]
    json: bool,
}

impl SyncArgs {
    fn overrides(&self, global: &GlobalOptions) -> ConfigOverrides {
        ConfigOverrides {
            execution_root: self.execution_root.clone(),
            fail_on_cycle: self.fail_on_cycle.then_some(true),
            ..global.to_config_overrides()
        }
    }
}

/// Execute the sync command
pub async fn execute(args: SyncArgs, global: GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace, Some(&args.overrides(&global)))?;

    let snapshot = GraphSnapshot::load(&args.graph)
        .with_context(|| format!("Failed to read graph snapshot {}", args.graph.display()))?;
    let execution_root = execution_root(&config, &workspace, snapshot.execution_root.as_deref());
    let graph = PetTargetGraph::from_snapshot(&snapshot).context("Invalid graph snapshot")?;
    debug!(
        targets = graph.vertex_count(),
        edges = graph.edge_count(),
        execution_root = %execution_root.display(),
        "Loaded build graph"
    );

    let data_dir = config.data_dir(&workspace);
    let store_name = config.storage.store_name.clone();
    let options = sync_options(&config, args.full);

    let cancellation = CancellationToken::new();
    let on_interrupt = {
        let token = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; cancelling the sync pass");
                token.cancel();
            }
        })
    };

    let pb = spinner(
        &format!("Syncing {} targets...", graph.vertex_count()),
        global.quiet || args.json,
    );

    let outcome = tokio::task::spawn_blocking(move || -> Result<Result<SyncReport, SyncError>> {
        let mut store = open_jvm_store(&data_dir, &store_name)
            .with_context(|| format!("Failed to open entity store in {}", data_dir.display()))?;
        let paths = ExecRootPathsResolver::new(execution_root);
        let ctx = SyncContext::new(&graph, &paths).with_cancellation(cancellation);
        Ok(SyncExecutor::new(&mut store, data_dir.join(SYNC_STATE_FILE), options).run(&ctx))
    })
    .await
    .context("Sync task panicked")?;
    on_interrupt.abort();

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) if e.is_cancelled() => {
            finish_spinner_warn(pb, "Sync cancelled; store left unchanged");
            return Err(e).context("Sync pass cancelled");
        }
        Ok(Err(e)) => {
            finish_spinner_error(pb, "Sync failed");
            return Err(e).context("Sync pass failed");
        }
        Err(e) => {
            finish_spinner_error(pb, "Sync failed");
            return Err(e);
        }
    };

    if report.analysis.cyclic.is_empty() {
        finish_spinner(pb, &summary(&report));
    } else {
        finish_spinner_warn(
            pb,
            &format!(
                "{} ({} targets skipped by a dependency cycle)",
                summary(&report),
                report.analysis.cyclic.len()
            ),
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, global.quiet);
    }
    Ok(())
}

/// Configured root first, then the snapshot's, then the workspace
fn execution_root(config: &BazsyncConfig, workspace: &Path, snapshot_root: Option<&Path>) -> PathBuf {
    match (&config.sync.execution_root, snapshot_root) {
        (None, Some(root)) if root.is_absolute() => root.to_path_buf(),
        (None, Some(root)) => workspace.join(root),
        _ => config.execution_root(workspace),
    }
}

fn sync_options(config: &BazsyncConfig, full: bool) -> SyncOptions {
    SyncOptions {
        full,
        analyzer: AnalyzerOptions {
            fail_on_cycle: config.sync.fail_on_cycle,
            skip_superseded_header_jars: config.sync.skip_superseded_header_jars,
            prefetch_jdeps: config.sync.prefetch_jdeps,
        },
    }
}

fn summary(report: &SyncReport) -> String {
    format!(
        "{} sync: {} added, {} removed in {}ms",
        if report.full { "Full" } else { "Incremental" },
        report.added,
        report.removed,
        report.duration_ms
    )
}

fn print_report(report: &SyncReport, quiet: bool) {
    if report.store_invalidated {
        print_info("Entity store was rebuilt from scratch", quiet);
    }
    print_info(
        &format!(
            "  import:   {} evicted, {} created, {} libraries collected",
            report.import.evicted, report.import.created, report.import.collected_libraries
        ),
        quiet,
    );
    print_info(
        &format!(
            "  analysis: {} processed, {} skipped, {} synthetic libraries, {} resolved jars",
            report.analysis.processed,
            report.analysis.skipped,
            report.analysis.synthetic_libraries,
            report.analysis.resolved_jars
        ),
        quiet,
    );
    if !report.analysis.cyclic.is_empty() {
        print_info(
            &format!("  cyclic:   vertices {:?}", report.analysis.cyclic),
            quiet,
        );
    }
    print_info(
        &format!(
            "  store:    {} entities, {} edges",
            report.store.entities, report.store.edges
        ),
        quiet,
    );
}
