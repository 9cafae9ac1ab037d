//! One sync pass, end to end
//!
//! ```text
//! SyncState ──► compute_diff ──► JvmImporter ──► JdepsAnalyzer ──► commit ──► SyncState
//! ```
//!
//! The store is committed only when every phase succeeds; on error or
//! cancellation the journal is discarded and the previous sync state stays
//! on disk, so the next pass sees the same diff again.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, info_span, warn};

use super::diff::{compute_diff, SyncState, SyncStateError};
use super::{SyncContext, SyncDiff};
use crate::jvm::{
    AnalysisReport, AnalyzerError, AnalyzerOptions, ImportReport, JdepsAnalyzer, JvmEntityStore,
    JvmImporter,
};
use crate::store::{IncrementalEntityStore, StoreError, StoreStats};

/// Errors that abort a sync pass
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("sync state error: {0}")]
    State(#[from] SyncStateError),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Analyzer(AnalyzerError::Cancelled { .. }))
    }
}

/// Options of a sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Rebuild every target regardless of the previous state
    pub full: bool,
    pub analyzer: AnalyzerOptions,
}

/// Outcome of a successful pass
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Whether every target was rebuilt
    pub full: bool,
    /// The store discarded its persisted contents when loading
    pub store_invalidated: bool,
    pub added: usize,
    pub removed: usize,
    pub import: ImportReport,
    pub analysis: AnalysisReport,
    pub store: StoreStats,
    pub duration_ms: u64,
}

/// Drives import, analysis and commit against one store
pub struct SyncExecutor<'s> {
    store: &'s mut JvmEntityStore,
    state_path: PathBuf,
    options: SyncOptions,
}

impl<'s> SyncExecutor<'s> {
    /// `state_path` is where the per-label fingerprints live between passes
    pub fn new(store: &'s mut JvmEntityStore, state_path: PathBuf, options: SyncOptions) -> Self {
        Self {
            store,
            state_path,
            options,
        }
    }

    pub fn run(&mut self, ctx: &SyncContext<'_>) -> Result<SyncReport, SyncError> {
        let _span = info_span!("sync", store = %self.store.name()).entered();
        let start = Instant::now();

        let store_invalidated = self.store.was_invalidated()?;
        let (previous, state_usable) = if store_invalidated {
            warn!("Entity store was invalidated; forcing a full sync");
            (SyncState::default(), false)
        } else {
            match SyncState::load(&self.state_path) {
                Ok(state) => (state, true),
                Err(SyncStateError::Io(e)) => return Err(SyncStateError::Io(e).into()),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable sync state; forcing a full sync");
                    (SyncState::default(), false)
                }
            }
        };
        // A store without matching state may hold labels the diff cannot name
        let orphaned = previous.is_empty() && !self.store.is_empty()?;
        let full = self.options.full || !state_usable || orphaned;

        let diff = {
            let _span = info_span!("diff", full).entered();
            compute_diff(&previous, ctx.graph, full)
        };

        let (import, analysis) = match self.apply(ctx, &diff, full) {
            Ok(reports) => reports,
            Err(e) => {
                self.store.discard();
                if e.is_cancelled() {
                    info!("Sync pass cancelled; uncommitted changes discarded");
                } else {
                    warn!(error = %e, "Sync pass failed; uncommitted changes discarded");
                }
                return Err(e);
            }
        };

        {
            let _span = info_span!("commit").entered();
            self.store.commit()?;
            SyncState::from_graph(ctx.graph).save(&self.state_path)?;
        }

        let report = SyncReport {
            full,
            store_invalidated,
            added: diff.added.len(),
            removed: diff.removed.len(),
            import,
            analysis,
            store: self.store.stats()?,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            full = report.full,
            added = report.added,
            removed = report.removed,
            entities = report.store.entities,
            duration_ms = report.duration_ms,
            "Sync pass complete"
        );
        Ok(report)
    }

    fn apply(
        &mut self,
        ctx: &SyncContext<'_>,
        diff: &SyncDiff,
        full: bool,
    ) -> Result<(ImportReport, AnalysisReport), SyncError> {
        if full {
            // Full passes rebuild from an empty store
            self.store.clear()?;
        }

        let import = {
            let _span = info_span!("import", added = diff.added.len(), removed = diff.removed.len())
                .entered();
            JvmImporter::new(&mut *self.store).apply(ctx, diff)?
        };

        let analysis = {
            let _span = info_span!("analyze").entered();
            JdepsAnalyzer::new(&mut *self.store, self.options.analyzer.clone())
                .compute_jdeps_for_changed_targets(ctx, diff)?
        };

        Ok((import, analysis))
    }
}
