//! Jdeps closure engine
//!
//! For every changed target the analyzer computes the jars the target used
//! during compilation that are *not* already visible through its declared
//! dependencies or through the pruned jdeps of anything below it:
//!
//! ```text
//! resolved(v) = used(v) - (direct_outputs(v) ∪ transitive(v))
//! transitive(v) = ∪ resolved(s) for every transitive successor s of v
//! ```
//!
//! Targets are visited dependencies-first, so `transitive(v)` only ever reads
//! results that are final for this pass. Resolved sets come from a per-pass
//! memo first and the persisted `JdepsCache` entity second.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::entity::{JdepsCache, JvmModuleEntity, JvmResourceId, LibraryModule, VertexDeps};
use super::jdeps::read_used_jars;
use super::naming::{is_superseded_header_jar, synthetic_library_name};
use crate::graph::{BuildTargetVertex, JvmTargetData, VertexId};
use crate::label::Label;
use crate::scheduler::{topological_order, SchedulerError};
use crate::store::{modify_entity_typed, IncrementalEntityStore, StoreError};
use crate::sync::{SyncContext, SyncDiff};

/// Errors that can occur during jdeps analysis
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("analysis cancelled after {processed} target(s)")]
    Cancelled { processed: usize },
}

/// Result type for analyzer operations
pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Knobs of the closure engine
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Abort when the scheduler leaves targets out because of a cycle
    pub fail_on_cycle: bool,
    /// Skip `header_X` jars that have a sibling `processed_X`
    pub skip_superseded_header_jars: bool,
    /// Decode all descriptors in parallel before the sequential walk
    pub prefetch_jdeps: bool,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            fail_on_cycle: false,
            skip_superseded_header_jars: true,
            prefetch_jdeps: true,
        }
    }
}

/// Progress of one target through a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Unvisited,
    UsedJarsComputed,
    TransitiveClosureResolved,
    Persisted,
}

/// Outcome of one analysis run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    /// Targets handed to the scheduler
    pub requested: usize,
    /// Targets whose resolved jdeps were persisted
    pub processed: usize,
    /// Scheduled targets without JVM data
    pub skipped: usize,
    /// Distinct synthetic libraries linked in this run
    pub synthetic_libraries: usize,
    /// Total size of all resolved sets
    pub resolved_jars: usize,
    /// Targets left out of the order by a dependency cycle
    pub cyclic: Vec<VertexId>,
}

/// Computes pruned jdeps for changed targets
pub struct JdepsAnalyzer<'s, S> {
    store: &'s mut S,
    options: AnalyzerOptions,
    /// resolved(v), for this pass
    resolved: HashMap<VertexId, Arc<BTreeSet<PathBuf>>>,
    /// transitive(v), for this pass
    closures: HashMap<VertexId, Arc<BTreeSet<PathBuf>>>,
    states: HashMap<VertexId, TargetState>,
}

impl<'s, S> JdepsAnalyzer<'s, S>
where
    S: IncrementalEntityStore<JvmResourceId, JvmModuleEntity>,
{
    pub fn new(store: &'s mut S, options: AnalyzerOptions) -> Self {
        Self {
            store,
            options,
            resolved: HashMap::new(),
            closures: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Analyze every target in `diff.added`
    pub fn compute_jdeps_for_changed_targets(
        &mut self,
        ctx: &SyncContext<'_>,
        diff: &SyncDiff,
    ) -> Result<AnalysisReport> {
        self.analyze(ctx, &diff.added_ids())
    }

    /// Analyze `targets`, visiting dependencies before dependents
    pub fn analyze(
        &mut self,
        ctx: &SyncContext<'_>,
        targets: &BTreeSet<VertexId>,
    ) -> Result<AnalysisReport> {
        self.resolved.clear();
        self.closures.clear();
        self.states.clear();

        let order = topological_order(ctx.graph, targets);
        if !order.is_complete() {
            if self.options.fail_on_cycle {
                order.ensure_complete()?;
            }
            warn!(
                targets = ?order.cyclic,
                "Dependency cycle detected; affected targets are not analyzed"
            );
        }

        let mut report = AnalysisReport {
            requested: targets.len(),
            cyclic: order.cyclic.clone(),
            ..AnalysisReport::default()
        };

        let mut prefetched = if self.options.prefetch_jdeps {
            prefetch_used_jars(ctx, &order.order)
        } else {
            HashMap::new()
        };

        let mut synthetic = BTreeSet::new();
        for vertex_id in order.dependencies_first() {
            if ctx.cancellation.is_cancelled() {
                info!(processed = report.processed, "Jdeps analysis cancelled");
                return Err(AnalyzerError::Cancelled {
                    processed: report.processed,
                });
            }

            let Some(vertex) = ctx.graph.vertex_by_id(vertex_id) else {
                report.skipped += 1;
                continue;
            };
            let Some(jvm) = vertex.jvm.as_ref() else {
                trace!(label = %vertex.label, "Skipping non-JVM target");
                report.skipped += 1;
                continue;
            };

            self.set_state(vertex_id, TargetState::Unvisited);
            let used = match prefetched.remove(&vertex_id) {
                Some(used) => used,
                None => used_jars(ctx, jvm),
            };
            let resolved = self.process_vertex(ctx, vertex, jvm, used, &mut synthetic)?;
            report.processed += 1;
            report.resolved_jars += resolved;
        }

        report.synthetic_libraries = synthetic.len();
        info!(
            processed = report.processed,
            skipped = report.skipped,
            synthetic_libraries = report.synthetic_libraries,
            resolved_jars = report.resolved_jars,
            "Jdeps analysis complete"
        );
        Ok(report)
    }

    /// Resolved jdeps of `vertex_id` computed or loaded during the last run
    pub fn resolved_jdeps(&self, vertex_id: VertexId) -> Option<&BTreeSet<PathBuf>> {
        self.resolved.get(&vertex_id).map(|s| s.as_ref())
    }

    pub fn target_state(&self, vertex_id: VertexId) -> TargetState {
        self.states
            .get(&vertex_id)
            .copied()
            .unwrap_or(TargetState::Unvisited)
    }

    fn set_state(&mut self, vertex_id: VertexId, state: TargetState) {
        trace!(vertex = vertex_id, ?state, "Target state");
        self.states.insert(vertex_id, state);
    }

    /// Steps 2-5 for one target; returns the size of its resolved set
    fn process_vertex(
        &mut self,
        ctx: &SyncContext<'_>,
        vertex: &BuildTargetVertex,
        jvm: &JvmTargetData,
        used: BTreeSet<PathBuf>,
        synthetic: &mut BTreeSet<String>,
    ) -> Result<usize> {
        let vertex_id = vertex.id;
        self.set_state(vertex_id, TargetState::UsedJarsComputed);

        let direct = direct_target_deps(ctx, vertex_id);
        let transitive = self.transitive_jdeps(ctx, vertex_id)?;
        self.set_state(vertex_id, TargetState::TransitiveClosureResolved);

        let resolved: BTreeSet<PathBuf> = used
            .into_iter()
            .filter(|jar| !direct.contains(jar) && !transitive.contains(jar))
            .collect();

        debug!(
            label = %vertex.label,
            direct = direct.len(),
            transitive = transitive.len(),
            resolved = resolved.len(),
            "Resolved jdeps"
        );

        let reference_id = JvmResourceId::VertexReference { vertex_id };
        let cache_id = JvmResourceId::JdepsCache { vertex_id };
        let cached = resolved.clone();
        self.store.create_entity(&cache_id, move |_| {
            JdepsCache {
                vertex_id,
                jdeps: cached,
            }
            .into()
        })?;
        self.store.add_dependency(&reference_id, &cache_id)?;

        let own_outputs: HashSet<PathBuf> = jvm
            .outputs
            .class_jars
            .iter()
            .chain(jvm.outputs.interface_jars.iter())
            .map(|p| ctx.paths.resolve(p))
            .collect();

        let deps_id = JvmResourceId::VertexDeps {
            label: vertex.label.clone(),
        };
        for jar in resolved.iter().filter(|jar| !own_outputs.contains(*jar)) {
            if self.options.skip_superseded_header_jars && is_superseded_header_jar(jar) {
                trace!(jar = %jar.display(), "Skipping superseded header jar");
                continue;
            }

            let library_name = synthetic_library_name(jar);
            let label = Label::synthetic(&library_name);
            let library_id = JvmResourceId::JdepsLibrary {
                library_name: library_name.clone(),
            };
            let library = LibraryModule::single_jar(label.clone(), jar);
            self.store.create_entity(&library_id, move |_| library.into())?;
            self.store.add_dependency(&reference_id, &library_id)?;
            modify_entity_typed(&mut *self.store, &deps_id, |deps: VertexDeps| deps.with(label))?;
            synthetic.insert(library_name);
        }

        let count = resolved.len();
        self.resolved.insert(vertex_id, Arc::new(resolved));
        self.set_state(vertex_id, TargetState::Persisted);
        Ok(count)
    }

    /// resolved(s) from the memo, falling back to the persisted cache
    fn load_resolved(&mut self, vertex_id: VertexId) -> Result<Option<Arc<BTreeSet<PathBuf>>>> {
        if let Some(hit) = self.resolved.get(&vertex_id) {
            return Ok(Some(Arc::clone(hit)));
        }
        let entity = self
            .store
            .get_entity(&JvmResourceId::JdepsCache { vertex_id })?;
        let Some(cache) = entity.as_ref().and_then(JvmModuleEntity::as_jdeps_cache) else {
            return Ok(None);
        };
        let jdeps = Arc::new(cache.jdeps.clone());
        self.resolved.insert(vertex_id, Arc::clone(&jdeps));
        Ok(Some(jdeps))
    }

    /// Union of resolved(s) over every transitive successor of `root`.
    ///
    /// Post-order walk memoized per vertex: closure(v) is the union over
    /// successors s of resolved(s) and closure(s). Back edges contribute
    /// nothing.
    fn transitive_jdeps(
        &mut self,
        ctx: &SyncContext<'_>,
        root: VertexId,
    ) -> Result<Arc<BTreeSet<PathBuf>>> {
        let mut in_progress = HashSet::new();
        let mut stack = vec![(root, false)];

        while let Some((vertex_id, expanded)) = stack.pop() {
            if self.closures.contains_key(&vertex_id) {
                continue;
            }
            let successors = ctx.graph.successors(vertex_id);

            if !expanded {
                if !in_progress.insert(vertex_id) {
                    continue;
                }
                stack.push((vertex_id, true));
                for succ in successors {
                    if !self.closures.contains_key(&succ) && !in_progress.contains(&succ) {
                        stack.push((succ, false));
                    }
                }
                continue;
            }

            let mut closure = BTreeSet::new();
            for succ in successors {
                if let Some(resolved) = self.load_resolved(succ)? {
                    closure.extend(resolved.iter().cloned());
                }
                if let Some(below) = self.closures.get(&succ) {
                    closure.extend(below.iter().cloned());
                }
            }
            in_progress.remove(&vertex_id);
            self.closures.insert(vertex_id, Arc::new(closure));
        }

        Ok(self
            .closures
            .get(&root)
            .map(Arc::clone)
            .unwrap_or_default())
    }
}

/// Used jars of a target across all of its descriptors
fn used_jars(ctx: &SyncContext<'_>, jvm: &JvmTargetData) -> BTreeSet<PathBuf> {
    jvm.jdeps
        .iter()
        .flat_map(|descriptor| read_used_jars(&ctx.paths.resolve(descriptor)))
        .map(|jar| ctx.paths.resolve_output(&jar))
        .collect()
}

/// Decode the descriptors of `vertices` in parallel
fn prefetch_used_jars(
    ctx: &SyncContext<'_>,
    vertices: &[VertexId],
) -> HashMap<VertexId, BTreeSet<PathBuf>> {
    let prefetched: HashMap<VertexId, BTreeSet<PathBuf>> = vertices
        .par_iter()
        .filter_map(|&id| {
            let jvm = ctx.graph.vertex_by_id(id)?.jvm.as_ref()?;
            Some((id, used_jars(ctx, jvm)))
        })
        .collect();
    debug!(targets = prefetched.len(), "Prefetched jdeps descriptors");
    prefetched
}

/// Interface, class and source jars of the direct successors of `vertex_id`
fn direct_target_deps(ctx: &SyncContext<'_>, vertex_id: VertexId) -> HashSet<PathBuf> {
    ctx.graph
        .successors(vertex_id)
        .into_iter()
        .filter_map(|succ| ctx.graph.vertex_by_id(succ))
        .filter_map(|v| v.jvm.as_ref())
        .flat_map(|jvm| jvm.outputs.all_jars())
        .map(|p| ctx.paths.resolve(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{JvmOutputs, JvmSourceItem, PetTargetGraph};
    use crate::jvm::entity::{jvm_store_codecs, JvmEntityStore};
    use crate::jvm::importer::JvmImporter;
    use crate::jvm::jdeps::{Dependencies, Dependency, Kind};
    use crate::sync::{CancellationToken, ExecRootPathsResolver, PathsResolver};
    use pretty_assertions::assert_eq;
    use prost::Message;
    use std::path::Path;
    use tempfile::TempDir;

    fn class_jar(pkg: &str) -> String {
        format!("bazel-out/{pkg}/lib{pkg}.jar")
    }

    fn descriptor(pkg: &str) -> String {
        format!("bazel-out/{pkg}/lib{pkg}.jdeps")
    }

    fn target(id: VertexId, pkg: &str) -> BuildTargetVertex {
        BuildTargetVertex {
            id,
            label: Label::parse(&format!("//{pkg}")).unwrap(),
            kind: "java_library".to_string(),
            tags: vec![],
            base_directory: PathBuf::from(pkg),
            jvm: Some(JvmTargetData {
                sources: vec![JvmSourceItem {
                    path: PathBuf::from(format!("{pkg}/Main.java")),
                    generated: false,
                    package_prefix: None,
                }],
                outputs: JvmOutputs {
                    class_jars: vec![PathBuf::from(class_jar(pkg))],
                    ..Default::default()
                },
                jdeps: vec![PathBuf::from(descriptor(pkg))],
                ..Default::default()
            }),
        }
    }

    fn graph(vertices: &[BuildTargetVertex], edges: &[(VertexId, VertexId)]) -> PetTargetGraph {
        let mut g = PetTargetGraph::new();
        for v in vertices {
            g.add_vertex(v.clone()).unwrap();
        }
        for &(from, to) in edges {
            g.add_dependency(from, to).unwrap();
        }
        g
    }

    fn write_jdeps(root: &Path, pkg: &str, used: &[&str]) {
        let message = Dependencies {
            dependency: used
                .iter()
                .map(|path| Dependency {
                    path: path.to_string(),
                    kind: Kind::Implicit as i32,
                    location: vec![],
                })
                .collect(),
            rule_label: None,
            success: Some(true),
            contained_package: vec![],
            requires_reduced_classpath: None,
        };
        let path = root.join(descriptor(pkg));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, message.encode_to_vec()).unwrap();
    }

    /// Store with the importer's entities in place for every vertex
    fn imported(ctx: &SyncContext<'_>, vertices: &[BuildTargetVertex]) -> JvmEntityStore {
        let mut store = JvmEntityStore::in_memory("jvm", jvm_store_codecs()).unwrap();
        let diff = SyncDiff {
            added: vertices.to_vec(),
            removed: BTreeSet::new(),
        };
        JvmImporter::new(&mut store).apply(ctx, &diff).unwrap();
        store
    }

    fn libraries(store: &JvmEntityStore) -> BTreeSet<String> {
        store
            .entries()
            .unwrap()
            .into_iter()
            .filter_map(|(id, _)| match id {
                JvmResourceId::JdepsLibrary { library_name } => Some(library_name),
                _ => None,
            })
            .collect()
    }

    fn vertex_deps(store: &JvmEntityStore, pkg: &str) -> BTreeSet<Label> {
        store
            .get_entity(&JvmResourceId::VertexDeps {
                label: Label::parse(&format!("//{pkg}")).unwrap(),
            })
            .unwrap()
            .as_ref()
            .and_then(JvmModuleEntity::as_vertex_deps)
            .map(|d| d.deps.clone())
            .unwrap_or_default()
    }

    /// Target `a` uses its own jar, a superseded header jar and one library
    fn single_target() -> (TempDir, Vec<BuildTargetVertex>) {
        let dir = TempDir::new().unwrap();
        write_jdeps(
            dir.path(),
            "a",
            &[&class_jar("a"), "ext/header_x.jar", "ext/y.jar"],
        );
        std::fs::create_dir_all(dir.path().join("ext")).unwrap();
        std::fs::write(dir.path().join("ext/processed_x.jar"), b"").unwrap();
        (dir, vec![target(1, "a")])
    }

    fn analyze_single(options: AnalyzerOptions) -> (TempDir, JvmEntityStore, AnalysisReport) {
        let (dir, vertices) = single_target();
        let g = graph(&vertices, &[]);
        let paths = ExecRootPathsResolver::new(dir.path());
        let ctx = SyncContext::new(&g, &paths);
        let mut store = imported(&ctx, &vertices);
        let report = JdepsAnalyzer::new(&mut store, options)
            .analyze(&ctx, &BTreeSet::from([1]))
            .unwrap();
        (dir, store, report)
    }

    #[test]
    fn test_own_output_and_superseded_header_get_no_library() {
        let (dir, store, report) = analyze_single(AnalyzerOptions::default());
        let root = dir.path();

        let resolved = store
            .get_entity(&JvmResourceId::JdepsCache { vertex_id: 1 })
            .unwrap()
            .as_ref()
            .and_then(JvmModuleEntity::as_jdeps_cache)
            .map(|c| c.jdeps.clone())
            .unwrap();
        assert_eq!(
            resolved,
            BTreeSet::from([
                root.join(class_jar("a")),
                root.join("ext/header_x.jar"),
                root.join("ext/y.jar"),
            ])
        );

        let y = synthetic_library_name(&root.join("ext/y.jar"));
        assert_eq!(libraries(&store), BTreeSet::from([y.clone()]));
        assert_eq!(vertex_deps(&store, "a"), BTreeSet::from([Label::synthetic(&y)]));
        assert_eq!(report.synthetic_libraries, 1);
        assert_eq!(report.resolved_jars, 3);
    }

    #[test]
    fn test_header_jar_is_linked_when_skip_is_disabled() {
        let (dir, store, _) = analyze_single(AnalyzerOptions {
            skip_superseded_header_jars: false,
            ..AnalyzerOptions::default()
        });
        let header = synthetic_library_name(&dir.path().join("ext/header_x.jar"));
        assert!(libraries(&store).contains(&header));
        assert_eq!(libraries(&store).len(), 2);
    }

    #[test]
    fn test_prefetch_does_not_change_results() {
        let run = |prefetch_jdeps: bool| {
            let dir = TempDir::new().unwrap();
            write_jdeps(dir.path(), "c", &["ext/p.jar"]);
            write_jdeps(dir.path(), "b", &[&class_jar("c"), "ext/p.jar", "ext/q.jar"]);
            write_jdeps(
                dir.path(),
                "a",
                &[&class_jar("b"), "ext/p.jar", "ext/q.jar", "ext/r.jar"],
            );
            let vertices = vec![target(1, "a"), target(2, "b"), target(3, "c")];
            let g = graph(&vertices, &[(1, 2), (2, 3)]);
            let paths = ExecRootPathsResolver::new(dir.path());
            let ctx = SyncContext::new(&g, &paths);
            let mut store = imported(&ctx, &vertices);
            let options = AnalyzerOptions {
                prefetch_jdeps,
                ..AnalyzerOptions::default()
            };
            let mut analyzer = JdepsAnalyzer::new(&mut store, options);
            let report = analyzer.analyze(&ctx, &BTreeSet::from([1, 2, 3])).unwrap();

            // Paths are made relative so runs in different temp dirs compare
            let resolved: Vec<BTreeSet<PathBuf>> = (1..=3)
                .map(|v| {
                    analyzer
                        .resolved_jdeps(v)
                        .unwrap()
                        .iter()
                        .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
                        .collect()
                })
                .collect();
            (report, resolved)
        };

        let (with_prefetch, resolved) = run(true);
        let (without_prefetch, resolved_sequential) = run(false);
        assert_eq!(with_prefetch, without_prefetch);
        assert_eq!(resolved, resolved_sequential);
        assert_eq!(
            resolved,
            vec![
                BTreeSet::from([PathBuf::from("ext/r.jar")]),
                BTreeSet::from([PathBuf::from("ext/q.jar")]),
                BTreeSet::from([PathBuf::from("ext/p.jar")]),
            ]
        );
    }

    /// Cancels the shared token when a given descriptor is resolved
    struct CancelOnResolve {
        inner: ExecRootPathsResolver,
        trigger: PathBuf,
        token: CancellationToken,
    }

    impl PathsResolver for CancelOnResolve {
        fn resolve(&self, path: &Path) -> PathBuf {
            if path == self.trigger {
                self.token.cancel();
            }
            self.inner.resolve(path)
        }

        fn resolve_output(&self, path: &Path) -> PathBuf {
            self.inner.resolve_output(path)
        }
    }

    #[test]
    fn test_cancellation_between_vertices() {
        let dir = TempDir::new().unwrap();
        let vertices = vec![target(1, "a"), target(2, "b"), target(3, "c")];
        let g = graph(&vertices, &[(1, 2), (2, 3)]);
        let token = CancellationToken::new();
        let paths = CancelOnResolve {
            inner: ExecRootPathsResolver::new(dir.path()),
            trigger: PathBuf::from(descriptor("b")),
            token: token.clone(),
        };
        let ctx = SyncContext::new(&g, &paths).with_cancellation(token);
        let mut store = imported(&ctx, &vertices);

        let options = AnalyzerOptions {
            prefetch_jdeps: false,
            ..AnalyzerOptions::default()
        };
        let mut analyzer = JdepsAnalyzer::new(&mut store, options);
        let err = analyzer
            .analyze(&ctx, &BTreeSet::from([1, 2, 3]))
            .unwrap_err();

        // c and b finish; the check before a stops the walk
        assert!(matches!(err, AnalyzerError::Cancelled { processed: 2 }));
        assert_eq!(analyzer.target_state(3), TargetState::Persisted);
        assert_eq!(analyzer.target_state(2), TargetState::Persisted);
        assert_eq!(analyzer.target_state(1), TargetState::Unvisited);
        assert!(analyzer.resolved_jdeps(1).is_none());
    }

    #[test]
    fn test_targets_reach_persisted_and_non_jvm_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut genrule = target(2, "gen");
        genrule.kind = "genrule".to_string();
        genrule.jvm = None;
        let vertices = vec![target(1, "a"), genrule];
        let g = graph(&vertices, &[(1, 2)]);
        let paths = ExecRootPathsResolver::new(dir.path());
        let ctx = SyncContext::new(&g, &paths);
        let mut store = imported(&ctx, &vertices);

        let mut analyzer = JdepsAnalyzer::new(&mut store, AnalyzerOptions::default());
        let report = analyzer.analyze(&ctx, &BTreeSet::from([1, 2])).unwrap();

        assert_eq!(report.requested, 2);
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(analyzer.target_state(1), TargetState::Persisted);
        assert_eq!(analyzer.target_state(2), TargetState::Unvisited);
        assert_eq!(analyzer.resolved_jdeps(1), Some(&BTreeSet::new()));
    }
}
