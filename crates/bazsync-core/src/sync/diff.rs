//! Change detection between sync passes
//!
//! The previous pass leaves a [`SyncState`] behind: one fingerprint per
//! label. Diffing it against the current graph yields the labels to drop and
//! the targets to rebuild, expanded to everything that transitively depends
//! on a changed target.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use super::SyncDiff;
use crate::graph::{BuildTargetVertex, TargetGraph, VertexId};
use crate::label::Label;

/// File name of the persisted state inside the data directory
pub const SYNC_STATE_FILE: &str = "sync_state.json";

const SYNC_STATE_VERSION: u32 = 1;

/// Errors raised while reading or writing sync state
#[derive(Debug, Error)]
pub enum SyncStateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sync state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported sync state version {0}")]
    Version(u32),
}

/// What the previous pass saw of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStateEntry {
    pub vertex_id: VertexId,
    pub fingerprint: String,
}

/// Per-label fingerprints recorded after a successful pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub version: u32,
    pub targets: BTreeMap<Label, SyncStateEntry>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            version: SYNC_STATE_VERSION,
            targets: BTreeMap::new(),
        }
    }
}

impl SyncState {
    /// Fingerprint every target of `graph`
    pub fn from_graph(graph: &dyn TargetGraph) -> Self {
        let targets = graph
            .all_vertex_ids()
            .into_iter()
            .filter_map(|id| {
                let vertex = graph.vertex_by_id(id)?;
                let entry = SyncStateEntry {
                    vertex_id: id,
                    fingerprint: target_fingerprint(graph, vertex),
                };
                Some((vertex.label.clone(), entry))
            })
            .collect();
        Self {
            version: SYNC_STATE_VERSION,
            targets,
        }
    }

    /// Load state from `path`. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, SyncStateError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No previous sync state");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let state: SyncState = serde_json::from_reader(BufReader::new(file))?;
        if state.version != SYNC_STATE_VERSION {
            return Err(SyncStateError::Version(state.version));
        }
        debug!(path = %path.display(), targets = state.targets.len(), "Loaded sync state");
        Ok(state)
    }

    /// Write state to `path` through a temporary sibling file
    pub fn save(&self, path: &Path) -> Result<(), SyncStateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(writer, self)?;
        }
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), targets = self.targets.len(), "Saved sync state");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// SHA-256 over the canonical JSON of a target and its sorted dependency labels
pub fn target_fingerprint(graph: &dyn TargetGraph, vertex: &BuildTargetVertex) -> String {
    let mut deps: Vec<&Label> = graph
        .successors(vertex.id)
        .into_iter()
        .filter_map(|s| graph.label_by_vertex_id(s))
        .collect();
    deps.sort();

    let mut hasher = Sha256::new();
    // Serializing plain data to an in-memory buffer cannot fail
    if let Ok(bytes) = serde_json::to_vec(&(vertex, deps)) {
        hasher.update(&bytes);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Diff the previous state against `graph`.
///
/// - removed: labels no longer in the graph, or whose vertex id changed
/// - added: new or changed targets plus every target that transitively
///   depends on one of them; with `full`, every target
pub fn compute_diff(previous: &SyncState, graph: &dyn TargetGraph, full: bool) -> SyncDiff {
    let mut removed = BTreeSet::new();
    for (label, entry) in &previous.targets {
        match graph.vertex_id_by_label(label) {
            Some(id) if id == entry.vertex_id => {}
            _ => {
                removed.insert(label.clone());
            }
        }
    }

    let all = graph.all_vertex_ids();
    let changed: BTreeSet<VertexId> = if full {
        all.iter().copied().collect()
    } else {
        all.iter()
            .copied()
            .filter(|&id| {
                let Some(vertex) = graph.vertex_by_id(id) else {
                    return false;
                };
                match previous.targets.get(&vertex.label) {
                    Some(entry) => {
                        entry.vertex_id != id
                            || entry.fingerprint != target_fingerprint(graph, vertex)
                    }
                    None => true,
                }
            })
            .collect()
    };

    let expanded = reverse_reachable(graph, &changed);
    let added: Vec<BuildTargetVertex> = expanded
        .iter()
        .filter_map(|&id| graph.vertex_by_id(id).cloned())
        .collect();

    info!(
        changed = changed.len(),
        added = added.len(),
        removed = removed.len(),
        full,
        "Computed sync diff"
    );

    SyncDiff { added, removed }
}

/// `roots` plus every vertex reaching one of them over dependency edges
fn reverse_reachable(graph: &dyn TargetGraph, roots: &BTreeSet<VertexId>) -> BTreeSet<VertexId> {
    let mut seen = roots.clone();
    let mut queue: VecDeque<VertexId> = roots.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        for pred in graph.predecessors(id) {
            if seen.insert(pred) {
                queue.push_back(pred);
            }
        }
    }
    seen
}
