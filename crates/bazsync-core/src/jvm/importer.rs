//! JVM importer
//!
//! Runs before the analyzer in each pass. Everything previously stored for a
//! removed or rebuilt target is evicted, then fresh module entities are
//! created for the rebuilt targets.
//!
//! Entity layout per target `v` with label `L`:
//!
//! ```text
//! VertexDeps{L} ──► VertexReference{v} ──► JdepsCache{v}
//!                                      ├─► JdepsLibrary{..}               (shared)
//!                                      ├─► CompiledLibrary{v, ..}         (owned)
//!                                      └─► AnnotationProcessorLibrary{v}  (owned)
//! ```

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

use super::entity::{JvmModuleEntity, JvmResourceId, LibraryModule, SourceModule, VertexDeps};
use super::naming::{compiled_library_name, generated_library_name};
use crate::graph::{BuildTargetVertex, JvmOutputs, VertexId};
use crate::label::Label;
use crate::store::{modify_entity_typed, IncrementalEntityStore, StoreResult};
use crate::sync::{PathsResolver, SyncContext, SyncDiff};

/// Counters of one import run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Labels whose stored entities were evicted
    pub evicted: usize,
    /// Targets given a fresh module
    pub created: usize,
    /// Compiled and annotation-processor libraries created
    pub owned_libraries: usize,
    /// Shared jdeps libraries dropped because nothing links them anymore
    pub collected_libraries: usize,
}

/// Applies a [`SyncDiff`] to the module entities of the store
pub struct JvmImporter<'s, S> {
    store: &'s mut S,
}

impl<'s, S> JvmImporter<'s, S>
where
    S: IncrementalEntityStore<JvmResourceId, JvmModuleEntity>,
{
    pub fn new(store: &'s mut S) -> Self {
        Self { store }
    }

    /// Evict removed and rebuilt targets, then create the rebuilt ones
    pub fn apply(&mut self, ctx: &SyncContext<'_>, diff: &SyncDiff) -> StoreResult<ImportReport> {
        let mut report = ImportReport::default();

        let stale: BTreeSet<&Label> = diff.removed.iter().chain(diff.added_labels()).collect();
        let mut orphan_candidates = BTreeSet::new();
        for label in stale {
            if self.evict(label, &mut orphan_candidates)? {
                report.evicted += 1;
            }
        }
        report.collected_libraries = self.collect_orphans(orphan_candidates)?;

        for vertex in &diff.added {
            if let Some(owned) = self.create(ctx, vertex)? {
                report.created += 1;
                report.owned_libraries += owned;
            }
        }

        info!(
            evicted = report.evicted,
            created = report.created,
            owned_libraries = report.owned_libraries,
            collected_libraries = report.collected_libraries,
            "Imported JVM targets"
        );
        Ok(report)
    }

    /// Remove everything stored for `label`. Returns whether it was present.
    fn evict(
        &mut self,
        label: &Label,
        orphan_candidates: &mut BTreeSet<JvmResourceId>,
    ) -> StoreResult<bool> {
        let deps_id = JvmResourceId::VertexDeps {
            label: label.clone(),
        };
        if self.store.get_entity(&deps_id)?.is_none() {
            return Ok(false);
        }

        for dep in self.store.direct_dependencies(&deps_id)? {
            if let JvmResourceId::VertexReference { vertex_id } = dep {
                self.evict_vertex(vertex_id, orphan_candidates)?;
            }
        }
        self.store.remove_entity(&deps_id)?;
        debug!(label = %label, "Evicted target");
        Ok(true)
    }

    fn evict_vertex(
        &mut self,
        vertex_id: VertexId,
        orphan_candidates: &mut BTreeSet<JvmResourceId>,
    ) -> StoreResult<()> {
        let reference = JvmResourceId::VertexReference { vertex_id };
        for dep in self.store.direct_dependencies(&reference)? {
            match &dep {
                JvmResourceId::JdepsLibrary { .. } => {
                    orphan_candidates.insert(dep.clone());
                }
                JvmResourceId::JdepsCache { .. }
                | JvmResourceId::CompiledLibrary { .. }
                | JvmResourceId::AnnotationProcessorLibrary { .. }
                    if dep.owner() == Some(vertex_id) =>
                {
                    self.store.remove_entity(&dep)?;
                }
                _ => {}
            }
        }
        self.store.remove_entity(&reference)?;
        self.store
            .remove_entity(&JvmResourceId::JdepsCache { vertex_id })?;
        Ok(())
    }

    /// Drop shared libraries nothing links to anymore
    fn collect_orphans(&mut self, candidates: BTreeSet<JvmResourceId>) -> StoreResult<usize> {
        let mut collected = 0;
        for id in candidates {
            if self.store.direct_referrers(&id)?.is_empty()
                && self.store.remove_entity(&id)?.is_some()
            {
                collected += 1;
            }
        }
        if collected > 0 {
            debug!(collected, "Collected orphaned jdeps libraries");
        }
        Ok(collected)
    }

    /// Create the entities of one target. Returns the number of owned
    /// libraries, or `None` for non-JVM targets.
    fn create(
        &mut self,
        ctx: &SyncContext<'_>,
        vertex: &BuildTargetVertex,
    ) -> StoreResult<Option<usize>> {
        let Some(jvm) = vertex.jvm.as_ref() else {
            return Ok(None);
        };

        let dependencies: BTreeSet<Label> = ctx
            .graph
            .successors(vertex.id)
            .into_iter()
            .filter_map(|s| ctx.graph.label_by_vertex_id(s).cloned())
            .collect();

        let module = SourceModule {
            label: vertex.label.clone(),
            dependencies,
            base_directory: vertex.base_directory.clone(),
            sources: jvm.sources.clone(),
            resources: jvm.resources.clone(),
            java_version: jvm.java_version.clone(),
            javac_opts: jvm.javac_opts.clone(),
            binary_outputs: jvm
                .outputs
                .class_jars
                .iter()
                .chain(jvm.outputs.interface_jars.iter())
                .map(|p| ctx.paths.resolve(p))
                .collect(),
        };

        let reference = JvmResourceId::VertexReference {
            vertex_id: vertex.id,
        };
        let deps_id = JvmResourceId::VertexDeps {
            label: vertex.label.clone(),
        };
        self.store.create_entity(&reference, |_| module.into())?;
        self.store
            .create_entity(&deps_id, |_| VertexDeps::empty(vertex.label.clone()).into())?;
        self.store.add_dependency(&deps_id, &reference)?;

        let mut owned = 0;
        if jvm.sources.is_empty() && !jvm.outputs.class_jars.is_empty() {
            let name = compiled_library_name(&vertex.label);
            let library = owned_library(Label::synthetic(&name), &jvm.outputs, ctx.paths);
            let id = JvmResourceId::CompiledLibrary {
                owner: vertex.id,
                name,
            };
            self.link_owned(&reference, &deps_id, &id, library)?;
            owned += 1;
        }
        if !jvm.generated_outputs.is_empty() {
            let name = generated_library_name(&vertex.label);
            let library =
                owned_library(Label::synthetic(&name), &jvm.generated_outputs, ctx.paths);
            let id = JvmResourceId::AnnotationProcessorLibrary { owner: vertex.id };
            self.link_owned(&reference, &deps_id, &id, library)?;
            owned += 1;
        }

        debug!(label = %vertex.label, owned, "Created target module");
        Ok(Some(owned))
    }

    fn link_owned(
        &mut self,
        reference: &JvmResourceId,
        deps_id: &JvmResourceId,
        id: &JvmResourceId,
        library: LibraryModule,
    ) -> StoreResult<()> {
        let label = library.label.clone();
        self.store.create_entity(id, |_| library.into())?;
        self.store.add_dependency(reference, id)?;
        modify_entity_typed(&mut *self.store, deps_id, |deps: VertexDeps| deps.with(label))?;
        Ok(())
    }
}

fn owned_library(label: Label, outputs: &JvmOutputs, paths: &dyn PathsResolver) -> LibraryModule {
    let resolve = |jars: &[PathBuf]| -> BTreeSet<PathBuf> {
        jars.iter().map(|p| paths.resolve(p)).collect()
    };
    LibraryModule {
        label,
        dependencies: BTreeSet::new(),
        interface_jars: resolve(&outputs.interface_jars),
        class_jars: resolve(&outputs.class_jars),
        source_jars: resolve(&outputs.source_jars),
        is_from_internal_target: true,
        is_low_priority: false,
    }
}
