//! Build target graph
//!
//! The sync engine consumes the build graph through the narrow [`TargetGraph`]
//! trait. [`PetTargetGraph`] is the in-process implementation backed by
//! `petgraph::StableGraph`, built from a serialized [`GraphSnapshot`].
//!
//! Edge direction follows declared dependencies: an edge `a -> b` means
//! target `a` depends on `b`, so `b` is a successor of `a` and `a` is a
//! predecessor of `b`.

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::label::Label;

/// Integer handle of a graph vertex. `0` is reserved and never assigned.
pub type VertexId = u32;

/// Errors raised while building a target graph
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("vertex id 0 is reserved (label {0})")]
    ReservedVertexId(Label),

    #[error("duplicate vertex id {id} for {label}")]
    DuplicateVertexId { id: VertexId, label: Label },

    #[error("duplicate label {0}")]
    DuplicateLabel(Label),

    #[error("unknown vertex id {0}")]
    UnknownVertex(VertexId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Jar outputs of a JVM target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JvmOutputs {
    pub class_jars: Vec<PathBuf>,
    pub interface_jars: Vec<PathBuf>,
    pub source_jars: Vec<PathBuf>,
}

impl JvmOutputs {
    pub fn is_empty(&self) -> bool {
        self.class_jars.is_empty() && self.interface_jars.is_empty() && self.source_jars.is_empty()
    }

    /// Interface, class and source jars, in that order
    pub fn all_jars(&self) -> impl Iterator<Item = &PathBuf> {
        self.interface_jars
            .iter()
            .chain(self.class_jars.iter())
            .chain(self.source_jars.iter())
    }
}

/// A source file of a JVM target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JvmSourceItem {
    pub path: PathBuf,
    #[serde(default)]
    pub generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_prefix: Option<String>,
}

/// Language data attached to JVM targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JvmTargetData {
    pub sources: Vec<JvmSourceItem>,
    pub resources: Vec<PathBuf>,
    pub outputs: JvmOutputs,
    /// Jars produced by annotation processors
    pub generated_outputs: JvmOutputs,
    /// Paths of `.jdeps` descriptors written by the compiler
    pub jdeps: Vec<PathBuf>,
    pub javac_opts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_version: Option<String>,
}

/// A build target as seen by the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTargetVertex {
    pub id: VertexId,
    pub label: Label,
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub base_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm: Option<JvmTargetData>,
}

/// Read-only view of the build graph used during one sync pass
pub trait TargetGraph: Send + Sync {
    /// All vertex ids, in ascending order
    fn all_vertex_ids(&self) -> Vec<VertexId>;

    /// Declared dependencies of `id`
    fn successors(&self, id: VertexId) -> Vec<VertexId>;

    /// Targets declaring a dependency on `id`
    fn predecessors(&self, id: VertexId) -> Vec<VertexId>;

    fn vertex_by_id(&self, id: VertexId) -> Option<&BuildTargetVertex>;

    fn label_by_vertex_id(&self, id: VertexId) -> Option<&Label> {
        self.vertex_by_id(id).map(|v| &v.label)
    }

    fn vertex_id_by_label(&self, label: &Label) -> Option<VertexId>;
}

/// Serialized form of a target: the vertex plus its declared dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(flatten)]
    pub vertex: BuildTargetVertex,
    #[serde(default)]
    pub deps: Vec<Label>,
}

/// Serialized build graph, as produced by the build-tool frontend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_root: Option<PathBuf>,
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

impl GraphSnapshot {
    /// Load a snapshot from a JSON file
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// petgraph-backed target graph
#[derive(Debug, Default)]
pub struct PetTargetGraph {
    graph: StableGraph<BuildTargetVertex, (), petgraph::Directed>,
    /// Vertex id to petgraph index
    id_index: HashMap<VertexId, NodeIndex>,
    /// Label to vertex id
    label_index: HashMap<Label, VertexId>,
}

impl PetTargetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a snapshot.
    ///
    /// Dependencies on labels absent from the snapshot are skipped with a
    /// warning, matching how the build frontend reports partial universes.
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for target in &snapshot.targets {
            graph.add_vertex(target.vertex.clone())?;
        }

        for target in &snapshot.targets {
            for dep in &target.deps {
                match graph.vertex_id_by_label(dep) {
                    Some(to) => graph.add_dependency(target.vertex.id, to)?,
                    None => warn!(
                        label = %target.vertex.label,
                        dependency = %dep,
                        "Missing dependency in graph snapshot"
                    ),
                }
            }
        }

        debug!(
            vertices = graph.vertex_count(),
            edges = graph.edge_count(),
            "Built target graph"
        );
        Ok(graph)
    }

    /// Add a vertex
    pub fn add_vertex(&mut self, vertex: BuildTargetVertex) -> Result<(), GraphError> {
        if vertex.id == 0 {
            return Err(GraphError::ReservedVertexId(vertex.label));
        }
        if self.id_index.contains_key(&vertex.id) {
            return Err(GraphError::DuplicateVertexId {
                id: vertex.id,
                label: vertex.label,
            });
        }
        if self.label_index.contains_key(&vertex.label) {
            return Err(GraphError::DuplicateLabel(vertex.label));
        }

        let id = vertex.id;
        let label = vertex.label.clone();
        let idx = self.graph.add_node(vertex);
        self.id_index.insert(id, idx);
        self.label_index.insert(label, id);
        Ok(())
    }

    /// Record that `from` depends on `to`. Duplicate edges are ignored.
    pub fn add_dependency(&mut self, from: VertexId, to: VertexId) -> Result<(), GraphError> {
        let from_idx = *self
            .id_index
            .get(&from)
            .ok_or(GraphError::UnknownVertex(from))?;
        let to_idx = *self.id_index.get(&to).ok_or(GraphError::UnknownVertex(to))?;
        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    /// Remove a vertex and all its edges
    pub fn remove_vertex(&mut self, id: VertexId) -> Option<BuildTargetVertex> {
        let idx = self.id_index.remove(&id)?;
        let vertex = self.graph.remove_node(idx)?;
        self.label_index.remove(&vertex.label);
        Some(vertex)
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Labels of the declared dependencies of `id`, sorted
    pub fn dependency_labels(&self, id: VertexId) -> Vec<Label> {
        let mut labels: Vec<Label> = self
            .successors(id)
            .into_iter()
            .filter_map(|s| self.label_by_vertex_id(s).cloned())
            .collect();
        labels.sort();
        labels
    }

    fn neighbors(&self, id: VertexId, direction: Direction) -> Vec<VertexId> {
        let Some(&idx) = self.id_index.get(&id) else {
            return Vec::new();
        };
        let mut ids: Vec<VertexId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl TargetGraph for PetTargetGraph {
    fn all_vertex_ids(&self) -> Vec<VertexId> {
        let mut ids: Vec<VertexId> = self.id_index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn successors(&self, id: VertexId) -> Vec<VertexId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn predecessors(&self, id: VertexId) -> Vec<VertexId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn vertex_by_id(&self, id: VertexId) -> Option<&BuildTargetVertex> {
        self.id_index.get(&id).map(|&idx| &self.graph[idx])
    }

    fn vertex_id_by_label(&self, label: &Label) -> Option<VertexId> {
        self.label_index.get(label).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(id: VertexId, label: &str) -> BuildTargetVertex {
        BuildTargetVertex {
            id,
            label: Label::parse(label).unwrap(),
            kind: "java_library".to_string(),
            tags: Vec::new(),
            base_directory: PathBuf::new(),
            jvm: None,
        }
    }

    fn spec(id: VertexId, label: &str, deps: &[&str]) -> TargetSpec {
        TargetSpec {
            vertex: vertex(id, label),
            deps: deps.iter().map(|d| Label::parse(d).unwrap()).collect(),
        }
    }

    #[test]
    fn test_from_snapshot_links_dependencies() {
        let snapshot = GraphSnapshot {
            execution_root: None,
            targets: vec![
                spec(1, "//app:app", &["//lib:lib", "//util:util"]),
                spec(2, "//lib:lib", &["//util:util"]),
                spec(3, "//util:util", &[]),
            ],
        };
        let graph = PetTargetGraph::from_snapshot(&snapshot).unwrap();

        assert_eq!(graph.all_vertex_ids(), vec![1, 2, 3]);
        assert_eq!(graph.successors(1), vec![2, 3]);
        assert_eq!(graph.predecessors(3), vec![1, 2]);
        assert!(graph.predecessors(1).is_empty());
        assert_eq!(
            graph.label_by_vertex_id(2).map(|l| l.as_str()),
            Some("//lib:lib")
        );
        assert_eq!(
            graph.vertex_id_by_label(&Label::parse("//util").unwrap()),
            Some(3)
        );
    }

    #[test]
    fn test_missing_dependency_is_skipped() {
        let snapshot = GraphSnapshot {
            execution_root: None,
            targets: vec![spec(1, "//a:a", &["//missing:missing"])],
        };
        let graph = PetTargetGraph::from_snapshot(&snapshot).unwrap();
        assert!(graph.successors(1).is_empty());
    }

    #[test]
    fn test_rejects_duplicates_and_reserved_id() {
        let mut graph = PetTargetGraph::new();
        graph.add_vertex(vertex(1, "//a:a")).unwrap();
        assert!(matches!(
            graph.add_vertex(vertex(1, "//b:b")),
            Err(GraphError::DuplicateVertexId { .. })
        ));
        assert!(matches!(
            graph.add_vertex(vertex(2, "//a:a")),
            Err(GraphError::DuplicateLabel(_))
        ));
        assert!(matches!(
            graph.add_vertex(vertex(0, "//c:c")),
            Err(GraphError::ReservedVertexId(_))
        ));
    }

    #[test]
    fn test_remove_vertex_drops_edges() {
        let mut graph = PetTargetGraph::new();
        graph.add_vertex(vertex(1, "//a:a")).unwrap();
        graph.add_vertex(vertex(2, "//b:b")).unwrap();
        graph.add_dependency(1, 2).unwrap();
        graph.add_dependency(1, 2).unwrap();
        assert_eq!(graph.edge_count(), 1);

        let removed = graph.remove_vertex(2).unwrap();
        assert_eq!(removed.label.as_str(), "//b:b");
        assert!(graph.successors(1).is_empty());
        assert!(graph.vertex_id_by_label(&removed.label).is_none());
    }

    #[test]
    fn test_snapshot_json_format() {
        let json = r#"{
            "execution_root": "/exec",
            "targets": [
                {
                    "id": 7,
                    "label": "//a",
                    "kind": "java_library",
                    "deps": [],
                    "jvm": {
                        "outputs": { "class_jars": ["bazel-out/bin/a/liba.jar"] },
                        "jdeps": ["bazel-out/bin/a/liba.jdeps"]
                    }
                }
            ]
        }"#;
        let snapshot: GraphSnapshot = serde_json::from_str(json).unwrap();
        let target = &snapshot.targets[0];
        assert_eq!(target.vertex.label.as_str(), "//a:a");
        let jvm = target.vertex.jvm.as_ref().unwrap();
        assert_eq!(jvm.outputs.class_jars.len(), 1);
        assert!(jvm.outputs.interface_jars.is_empty());
        assert_eq!(jvm.jdeps, vec![PathBuf::from("bazel-out/bin/a/liba.jdeps")]);
    }
}
