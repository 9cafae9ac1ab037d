//! bazsync Core - incremental jdeps pruning for JVM build graph sync
//!
//! This crate provides the engine behind a sync pass:
//! - Build labels and the target graph adapter
//! - A content-addressed incremental entity store persisted in SQLite
//! - Dependencies-first scheduling of changed targets
//! - JVM module import and jdeps transitive closure pruning
//! - Change detection between passes and the pass executor

pub mod graph;
pub mod jvm;
pub mod label;
pub mod scheduler;
pub mod store;
pub mod sync;

// Graph re-exports
pub use graph::{
    BuildTargetVertex, GraphError, GraphSnapshot, JvmOutputs, JvmSourceItem, JvmTargetData,
    PetTargetGraph, TargetGraph, TargetSpec, VertexId,
};
pub use label::{Label, LabelError};

// Store re-exports
pub use store::{
    IncrementalEntityStore, PersistentEntityStore, StoreError, StoreReader, StoreResult,
    StoreStats,
};

// Scheduler re-exports
pub use scheduler::{topological_order, SchedulerError, TopologicalOrder};

// JVM re-exports
pub use jvm::{
    open_jvm_store, AnalysisReport, AnalyzerError, AnalyzerOptions, ImportReport, JdepsAnalyzer,
    JvmEntityStore, JvmImporter, JvmModuleEntity, JvmResourceId,
};

// Sync re-exports
pub use sync::{
    compute_diff, CancellationToken, ExecRootPathsResolver, PathsResolver, SyncContext, SyncDiff,
    SyncError, SyncExecutor, SyncOptions, SyncReport, SyncState, SYNC_STATE_FILE,
};
