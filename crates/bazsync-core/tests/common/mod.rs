//! Common test utilities for integration tests.
//!
//! A [`TestWorkspace`] owns a temporary execution root (where `.jdeps`
//! descriptors are written) and a data directory for the entity store.

#![allow(dead_code)]

use bazsync_core::graph::{
    BuildTargetVertex, GraphSnapshot, JvmOutputs, JvmTargetData, PetTargetGraph, TargetSpec,
    VertexId,
};
use bazsync_core::jvm::jdeps::{Dependencies, Dependency, Kind};
use bazsync_core::jvm::{open_jvm_store, JvmEntityStore, JvmModuleEntity, JvmResourceId};
use bazsync_core::label::Label;
use bazsync_core::store::IncrementalEntityStore;
use bazsync_core::sync::{
    ExecRootPathsResolver, SyncContext, SyncExecutor, SyncOptions, SyncReport, SYNC_STATE_FILE,
};
use prost::Message;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestWorkspace {
    dir: TempDir,
    paths: ExecRootPathsResolver,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let exec_root = dir.path().join("exec");
        std::fs::create_dir_all(&exec_root).expect("exec root");
        Self {
            paths: ExecRootPathsResolver::new(exec_root),
            dir,
        }
    }

    pub fn exec_root(&self) -> &Path {
        self.paths.execution_root()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir().join(SYNC_STATE_FILE)
    }

    /// Absolute path of an execution-root relative path
    pub fn abs(&self, rel: &str) -> PathBuf {
        self.exec_root().join(rel)
    }

    pub fn open_store(&self) -> JvmEntityStore {
        open_jvm_store(&self.data_dir(), "jvm").expect("open store")
    }

    /// Write a descriptor under the execution root
    pub fn write_jdeps(&self, rel: &str, entries: &[(&str, Kind)]) {
        let message = Dependencies {
            dependency: entries
                .iter()
                .map(|(path, kind)| Dependency {
                    path: path.to_string(),
                    kind: *kind as i32,
                    location: vec![],
                })
                .collect(),
            rule_label: None,
            success: Some(true),
            contained_package: vec![],
            requires_reduced_classpath: None,
        };
        let path = self.abs(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("jdeps dir");
        std::fs::write(path, message.encode_to_vec()).expect("write jdeps");
    }

    pub fn run(
        &self,
        store: &mut JvmEntityStore,
        graph: &PetTargetGraph,
        options: SyncOptions,
    ) -> SyncReport {
        self.try_run(store, graph, options).expect("sync pass")
    }

    pub fn try_run(
        &self,
        store: &mut JvmEntityStore,
        graph: &PetTargetGraph,
        options: SyncOptions,
    ) -> Result<SyncReport, bazsync_core::sync::SyncError> {
        let ctx = SyncContext::new(graph, &self.paths);
        SyncExecutor::new(store, self.state_path(), options).run(&ctx)
    }
}

/// A JVM target compiling to `bazel-out/bin/<pkg>/lib<pkg>.jar`, with a
/// descriptor at `bazel-out/bin/<pkg>/lib<pkg>.jdeps`
pub fn jvm_target(id: VertexId, pkg: &str, deps: &[&str]) -> TargetSpec {
    TargetSpec {
        vertex: BuildTargetVertex {
            id,
            label: Label::parse(&format!("//{pkg}")).expect("label"),
            kind: "java_library".to_string(),
            tags: vec![],
            base_directory: PathBuf::from(pkg),
            jvm: Some(JvmTargetData {
                sources: vec![bazsync_core::graph::JvmSourceItem {
                    path: PathBuf::from(format!("{pkg}/Main.java")),
                    generated: false,
                    package_prefix: None,
                }],
                outputs: JvmOutputs {
                    class_jars: vec![PathBuf::from(output_jar(pkg))],
                    ..JvmOutputs::default()
                },
                jdeps: vec![PathBuf::from(jdeps_path(pkg))],
                ..JvmTargetData::default()
            }),
        },
        deps: deps
            .iter()
            .map(|d| Label::parse(&format!("//{d}")).expect("label"))
            .collect(),
    }
}

pub fn output_jar(pkg: &str) -> String {
    format!("bazel-out/bin/{pkg}/lib{pkg}.jar")
}

pub fn jdeps_path(pkg: &str) -> String {
    format!("bazel-out/bin/{pkg}/lib{pkg}.jdeps")
}

pub fn graph(targets: Vec<TargetSpec>) -> PetTargetGraph {
    PetTargetGraph::from_snapshot(&GraphSnapshot {
        execution_root: None,
        targets,
    })
    .expect("graph")
}

pub fn label(pkg: &str) -> Label {
    Label::parse(&format!("//{pkg}")).expect("label")
}

/// Persisted resolved jdeps of a vertex
pub fn resolved(store: &JvmEntityStore, vertex_id: VertexId) -> Option<BTreeSet<PathBuf>> {
    store
        .get_entity(&JvmResourceId::JdepsCache { vertex_id })
        .expect("get entity")
        .as_ref()
        .and_then(JvmModuleEntity::as_jdeps_cache)
        .map(|c| c.jdeps.clone())
}

/// Labels accumulated in the `VertexDeps` of a target
pub fn vertex_deps(store: &JvmEntityStore, pkg: &str) -> Option<BTreeSet<Label>> {
    store
        .get_entity(&JvmResourceId::VertexDeps { label: label(pkg) })
        .expect("get entity")
        .as_ref()
        .and_then(JvmModuleEntity::as_vertex_deps)
        .map(|d| d.deps.clone())
}

/// Names of all stored jdeps libraries
pub fn jdeps_libraries(store: &JvmEntityStore) -> BTreeSet<String> {
    store
        .entries()
        .expect("entries")
        .into_iter()
        .filter_map(|(id, _)| match id {
            JvmResourceId::JdepsLibrary { library_name } => Some(library_name),
            _ => None,
        })
        .collect()
}
