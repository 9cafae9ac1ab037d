//! Sync pass plumbing
//!
//! A pass takes the current build graph, diffs it against the state recorded
//! by the previous pass, and feeds the diff through the JVM importer and the
//! jdeps analyzer before committing the entity store.

pub mod diff;
pub mod executor;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::graph::{BuildTargetVertex, TargetGraph, VertexId};
use crate::label::Label;

pub use diff::{
    compute_diff, target_fingerprint, SyncState, SyncStateEntry, SyncStateError, SYNC_STATE_FILE,
};
pub use executor::{SyncError, SyncExecutor, SyncOptions, SyncReport};

/// Maps paths recorded by the build tool to absolute filesystem paths
pub trait PathsResolver: Send + Sync {
    /// Resolve a workspace or execution-root relative path
    fn resolve(&self, path: &Path) -> PathBuf;

    /// Resolve a path written by a compiler action (e.g. inside a jdeps file)
    fn resolve_output(&self, path: &Path) -> PathBuf;
}

/// Resolves relative paths against the build execution root
#[derive(Debug, Clone)]
pub struct ExecRootPathsResolver {
    execution_root: PathBuf,
}

impl ExecRootPathsResolver {
    pub fn new(execution_root: impl Into<PathBuf>) -> Self {
        Self {
            execution_root: execution_root.into(),
        }
    }

    pub fn execution_root(&self) -> &Path {
        &self.execution_root
    }
}

impl PathsResolver for ExecRootPathsResolver {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.execution_root.join(strip_cur_dir(path))
        }
    }

    fn resolve_output(&self, path: &Path) -> PathBuf {
        self.resolve(path)
    }
}

fn strip_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Cooperative cancellation flag shared between a pass and its driver
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Collaborators of one sync pass
pub struct SyncContext<'a> {
    pub graph: &'a dyn TargetGraph,
    pub paths: &'a dyn PathsResolver,
    pub cancellation: CancellationToken,
}

impl<'a> SyncContext<'a> {
    pub fn new(graph: &'a dyn TargetGraph, paths: &'a dyn PathsResolver) -> Self {
        Self {
            graph,
            paths,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Targets to (re)build and labels to drop in one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub added: Vec<BuildTargetVertex>,
    pub removed: BTreeSet<Label>,
}

impl SyncDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn added_ids(&self) -> BTreeSet<VertexId> {
        self.added.iter().map(|v| v.id).collect()
    }

    pub fn added_labels(&self) -> impl Iterator<Item = &Label> {
        self.added.iter().map(|v| &v.label)
    }
}
