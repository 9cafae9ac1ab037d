//! End-to-end sync passes over on-disk stores and real descriptors.

mod common;

use bazsync_core::graph::TargetGraph;
use bazsync_core::jvm::jdeps::Kind;
use bazsync_core::jvm::{synthetic_library_name, AnalyzerError, AnalyzerOptions, JvmResourceId};
use bazsync_core::label::Label;
use bazsync_core::scheduler::SchedulerError;
use bazsync_core::store::IncrementalEntityStore;
use bazsync_core::sync::{SyncError, SyncOptions};
use common::{
    graph, jdeps_libraries, jdeps_path, jvm_target, output_jar, resolved, vertex_deps,
    TestWorkspace,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::path::PathBuf;

const GUAVA: &str = "external/guava/guava.jar";
const EXTRA: &str = "external/extra/extra.jar";
const UNUSED: &str = "external/unused/unused.jar";

/// a -> b -> c, where b already surfaces guava and a uses it again
fn chain(ws: &TestWorkspace) -> Vec<bazsync_core::graph::TargetSpec> {
    ws.write_jdeps(&jdeps_path("c"), &[]);
    ws.write_jdeps(
        &jdeps_path("b"),
        &[(&output_jar("c"), Kind::Explicit), (GUAVA, Kind::Implicit)],
    );
    ws.write_jdeps(
        &jdeps_path("a"),
        &[
            (&output_jar("b"), Kind::Explicit),
            (GUAVA, Kind::Implicit),
            (EXTRA, Kind::Implicit),
            (UNUSED, Kind::Unused),
        ],
    );
    vec![
        jvm_target(1, "a", &["b"]),
        jvm_target(2, "b", &["c"]),
        jvm_target(3, "c", &[]),
    ]
}

fn synthetic(ws: &TestWorkspace, rel: &str) -> Label {
    Label::synthetic(&synthetic_library_name(&ws.abs(rel)))
}

#[test]
fn test_chain_does_not_repeat_jar_resolved_below() {
    let ws = TestWorkspace::new();
    let graph = graph(chain(&ws));
    let mut store = ws.open_store();

    let report = ws.run(&mut store, &graph, SyncOptions::default());
    assert_eq!(report.analysis.processed, 3);
    assert_eq!(report.analysis.synthetic_libraries, 2);

    assert_eq!(resolved(&store, 3), Some(BTreeSet::new()));
    assert_eq!(resolved(&store, 2), Some(BTreeSet::from([ws.abs(GUAVA)])));
    assert_eq!(resolved(&store, 1), Some(BTreeSet::from([ws.abs(EXTRA)])));

    assert_eq!(
        vertex_deps(&store, "b"),
        Some(BTreeSet::from([synthetic(&ws, GUAVA)]))
    );
    assert_eq!(
        vertex_deps(&store, "a"),
        Some(BTreeSet::from([synthetic(&ws, EXTRA)]))
    );

    // The guava library is linked from b only
    let guava = JvmResourceId::JdepsLibrary {
        library_name: synthetic_library_name(&ws.abs(GUAVA)),
    };
    assert_eq!(
        store.direct_referrers(&guava).unwrap(),
        vec![JvmResourceId::VertexReference { vertex_id: 2 }]
    );
}

#[test]
fn test_removed_target_entities_are_dropped() {
    let ws = TestWorkspace::new();
    ws.write_jdeps(&jdeps_path("d"), &[("external/z/z.jar", Kind::Implicit)]);
    ws.write_jdeps(&jdeps_path("a"), &[(&output_jar("d"), Kind::Explicit)]);
    let mut store = ws.open_store();

    let before = graph(vec![jvm_target(1, "a", &["d"]), jvm_target(4, "d", &[])]);
    ws.run(&mut store, &before, SyncOptions::default());
    assert!(resolved(&store, 4).is_some());
    let z_library = synthetic_library_name(&ws.abs("external/z/z.jar"));
    assert!(jdeps_libraries(&store).contains(&z_library));

    let after = graph(vec![jvm_target(1, "a", &[])]);
    let report = ws.run(&mut store, &after, SyncOptions::default());

    assert_eq!(report.removed, 1);
    // a lost its dependency, so it is rebuilt in the same pass
    assert_eq!(report.added, 1);
    assert_eq!(report.import.collected_libraries, 1);

    assert!(resolved(&store, 4).is_none());
    assert!(vertex_deps(&store, "d").is_none());
    assert!(store
        .get_entity(&JvmResourceId::VertexReference { vertex_id: 4 })
        .unwrap()
        .is_none());
    assert!(!jdeps_libraries(&store).contains(&z_library));
    assert_eq!(
        resolved(&store, 1),
        Some(BTreeSet::from([ws.abs(&output_jar("d"))]))
    );
}

#[test]
fn test_recompute_is_deterministic() {
    let ws = TestWorkspace::new();
    let graph = graph(chain(&ws));

    let mut store = ws.open_store();
    ws.run(&mut store, &graph, SyncOptions::default());
    let first: Vec<_> = (1..=3).map(|v| resolved(&store, v)).collect();
    let first_libraries = jdeps_libraries(&store);

    let full = SyncOptions {
        full: true,
        ..SyncOptions::default()
    };
    let report = ws.run(&mut store, &graph, full.clone());
    assert!(report.full);
    assert_eq!((1..=3).map(|v| resolved(&store, v)).collect::<Vec<_>>(), first);
    assert_eq!(jdeps_libraries(&store), first_libraries);

    let mut replay = bazsync_core::jvm::open_jvm_store(&ws.data_dir(), "replay").unwrap();
    ws.run(&mut replay, &graph, full);
    assert_eq!((1..=3).map(|v| resolved(&replay, v)).collect::<Vec<_>>(), first);
    assert_eq!(jdeps_libraries(&replay), first_libraries);
}

#[test]
fn test_resolved_sets_are_disjoint_from_visible_jars_and_complete() {
    let ws = TestWorkspace::new();
    ws.write_jdeps(&jdeps_path("d"), &[("ext/p.jar", Kind::Implicit)]);
    ws.write_jdeps(
        &jdeps_path("b"),
        &[
            (&output_jar("d"), Kind::Explicit),
            ("ext/p.jar", Kind::Implicit),
            ("ext/q.jar", Kind::Implicit),
        ],
    );
    ws.write_jdeps(
        &jdeps_path("c"),
        &[(&output_jar("d"), Kind::Explicit), ("ext/r.jar", Kind::Implicit)],
    );
    ws.write_jdeps(
        &jdeps_path("a"),
        &[
            (&output_jar("b"), Kind::Explicit),
            (&output_jar("c"), Kind::Explicit),
            (&output_jar("d"), Kind::Implicit),
            ("ext/p.jar", Kind::Implicit),
            ("ext/q.jar", Kind::Implicit),
            ("ext/r.jar", Kind::Implicit),
            ("ext/s.jar", Kind::Implicit),
        ],
    );
    let diamond = graph(vec![
        jvm_target(1, "a", &["b", "c"]),
        jvm_target(2, "b", &["d"]),
        jvm_target(3, "c", &["d"]),
        jvm_target(4, "d", &[]),
    ]);
    let mut store = ws.open_store();
    ws.run(&mut store, &diamond, SyncOptions::default());

    let used = |pkg: &str| -> BTreeSet<PathBuf> {
        bazsync_core::jvm::jdeps::read_used_jars(&ws.abs(&jdeps_path(pkg)))
            .into_iter()
            .map(|p| ws.exec_root().join(p))
            .collect()
    };

    for (vertex_id, pkg) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
        let mine = resolved(&store, vertex_id).unwrap();

        let direct: BTreeSet<PathBuf> = diamond
            .successors(vertex_id)
            .into_iter()
            .map(|s| {
                let dep = diamond.label_by_vertex_id(s).unwrap();
                ws.abs(&output_jar(dep.name()))
            })
            .collect();

        let mut below = BTreeSet::new();
        let mut stack = diamond.successors(vertex_id);
        while let Some(s) = stack.pop() {
            if below.insert(s) {
                stack.extend(diamond.successors(s));
            }
        }
        let transitive: BTreeSet<PathBuf> = below
            .into_iter()
            .flat_map(|s| resolved(&store, s).unwrap())
            .collect();

        assert!(mine.is_disjoint(&direct), "{pkg}: overlaps direct");
        assert!(mine.is_disjoint(&transitive), "{pkg}: overlaps transitive");
        for jar in used(pkg) {
            assert!(
                mine.contains(&jar) || direct.contains(&jar) || transitive.contains(&jar),
                "{pkg}: {} is not visible",
                jar.display()
            );
        }
    }

    assert_eq!(
        resolved(&store, 1),
        Some(BTreeSet::from([
            ws.abs(&output_jar("d")),
            ws.exec_root().join("ext/s.jar")
        ]))
    );
}

#[test]
fn test_reopened_store_serves_cached_jdeps() {
    let ws = TestWorkspace::new();
    let specs = chain(&ws);
    {
        let mut store = ws.open_store();
        ws.run(&mut store, &graph(specs.clone()), SyncOptions::default());
    }

    // Only a changes; b's resolved set comes from the persisted cache
    let mut changed = specs;
    changed[0].vertex.tags.push("manual".to_string());
    let mut store = ws.open_store();
    assert!(!store.was_invalidated().unwrap());
    let report = ws.run(&mut store, &graph(changed), SyncOptions::default());

    assert_eq!(report.added, 1);
    assert_eq!(report.analysis.processed, 1);
    assert_eq!(resolved(&store, 1), Some(BTreeSet::from([ws.abs(EXTRA)])));
    assert_eq!(resolved(&store, 2), Some(BTreeSet::from([ws.abs(GUAVA)])));
}

#[test]
fn test_invalidated_store_forces_full_pass() {
    let ws = TestWorkspace::new();
    let graph = graph(chain(&ws));
    {
        let mut store = ws.open_store();
        ws.run(&mut store, &graph, SyncOptions::default());
    }

    let db = ws.data_dir().join("jvm.db");
    for suffix in ["-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", db.display()));
    }
    std::fs::write(&db, b"definitely not a sqlite database").unwrap();

    let mut store = ws.open_store();
    let report = ws.run(&mut store, &graph, SyncOptions::default());
    assert!(report.store_invalidated);
    assert!(report.full);
    assert_eq!(report.added, 3);
    assert_eq!(resolved(&store, 1), Some(BTreeSet::from([ws.abs(EXTRA)])));
}

#[test]
fn test_cycle_is_reported_or_fatal() {
    let ws = TestWorkspace::new();
    let cyclic = graph(vec![
        jvm_target(1, "x", &["y"]),
        jvm_target(2, "y", &["x"]),
        jvm_target(3, "z", &[]),
    ]);

    let mut store = ws.open_store();
    let report = ws.run(&mut store, &cyclic, SyncOptions::default());
    assert_eq!(report.analysis.cyclic, vec![1, 2]);
    assert_eq!(report.analysis.processed, 1);
    assert!(resolved(&store, 3).is_some());

    let strict = SyncOptions {
        full: true,
        analyzer: AnalyzerOptions {
            fail_on_cycle: true,
            ..AnalyzerOptions::default()
        },
    };
    let err = ws.try_run(&mut store, &cyclic, strict).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Analyzer(AnalyzerError::Scheduler(SchedulerError::CyclicDependency { .. }))
    ));
    // The failed pass left the committed store alone
    assert!(resolved(&store, 3).is_some());
    assert!(vertex_deps(&store, "x").is_some());
}
