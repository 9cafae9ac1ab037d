//! JVM language integration
//!
//! - [`entity`]: resource ids and module entities stored per target
//! - [`importer`]: evicts stale entities and creates modules for changed targets
//! - [`analyzer`]: jdeps closure pruning and synthetic library creation
//! - [`jdeps`]: `.jdeps` descriptor decoding
//! - [`naming`]: stable library names

pub mod analyzer;
pub mod entity;
pub mod importer;
pub mod jdeps;
pub mod naming;

pub use analyzer::{AnalysisReport, AnalyzerError, AnalyzerOptions, JdepsAnalyzer, TargetState};
pub use entity::{
    jvm_store_codecs, open_jvm_store, JdepsCache, JvmEntityStore, JvmModuleEntity, JvmResourceId,
    LibraryModule, SourceModule, VertexDeps,
};
pub use importer::{ImportReport, JvmImporter};
pub use naming::synthetic_library_name;
