//! JVM resource ids and module entities
//!
//! [`JvmResourceId`] addresses everything the JVM sync pass stores;
//! [`JvmModuleEntity`] is what gets stored. Both are closed sum types, so the
//! codec and the analyzer match on them exhaustively.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::graph::{JvmSourceItem, VertexId};
use crate::label::Label;
use crate::store::{
    stable_hash, EntityVariant, JsonCodec, PersistentEntityStore, ResourceHash, StoreCodecs,
    StoreResult,
};

// Variant tags feeding the structural hash. Never renumber: the hash is the
// persistence key.
const TAG_COMPILED_LIBRARY: u32 = 2;
const TAG_JDEPS_LIBRARY: u32 = 3;
const TAG_JDEPS_CACHE: u32 = 4;
const TAG_VERTEX_DEPS: u32 = 5;
const TAG_VERTEX_REFERENCE: u32 = 6;
const TAG_ANNOTATION_PROCESSOR_LIBRARY: u32 = 10;

/// Identifier of a stored JVM resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JvmResourceId {
    /// The module of a build target
    VertexReference { vertex_id: VertexId },
    /// Accumulated dependency labels of a target
    VertexDeps { label: Label },
    /// A synthetic library wrapping a single jar surfaced by jdeps
    JdepsLibrary { library_name: String },
    /// Pruned jdeps of a target
    JdepsCache { vertex_id: VertexId },
    /// Jars produced by the annotation processors of a target
    AnnotationProcessorLibrary { owner: VertexId },
    /// Class jars of a target that has no sources
    CompiledLibrary { owner: VertexId, name: String },
}

impl JvmResourceId {
    /// Structural hash used as the persistence key
    pub fn stable_hash(&self) -> ResourceHash {
        stable_hash(|h| match self {
            Self::VertexReference { vertex_id } => {
                h.put_u32(TAG_VERTEX_REFERENCE).put_u32(*vertex_id);
            }
            Self::VertexDeps { label } => {
                h.put_u32(TAG_VERTEX_DEPS).put_str(label.as_str());
            }
            Self::JdepsLibrary { library_name } => {
                h.put_u32(TAG_JDEPS_LIBRARY).put_str(library_name);
            }
            Self::JdepsCache { vertex_id } => {
                h.put_u32(TAG_JDEPS_CACHE).put_u32(*vertex_id);
            }
            Self::AnnotationProcessorLibrary { owner } => {
                h.put_u32(TAG_ANNOTATION_PROCESSOR_LIBRARY).put_u32(*owner);
            }
            Self::CompiledLibrary { owner, name } => {
                h.put_u32(TAG_COMPILED_LIBRARY)
                    .put_u32(*owner)
                    .put_str(name);
            }
        })
    }

    /// Vertex owning this resource, if any
    pub fn owner(&self) -> Option<VertexId> {
        match self {
            Self::VertexReference { vertex_id } | Self::JdepsCache { vertex_id } => {
                Some(*vertex_id)
            }
            Self::AnnotationProcessorLibrary { owner } | Self::CompiledLibrary { owner, .. } => {
                Some(*owner)
            }
            Self::VertexDeps { .. } | Self::JdepsLibrary { .. } => None,
        }
    }
}

impl fmt::Display for JvmResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VertexReference { vertex_id } => write!(f, "vertex-reference:{vertex_id}"),
            Self::VertexDeps { label } => write!(f, "vertex-deps:{label}"),
            Self::JdepsLibrary { library_name } => write!(f, "jdeps-library:{library_name}"),
            Self::JdepsCache { vertex_id } => write!(f, "jdeps-cache:{vertex_id}"),
            Self::AnnotationProcessorLibrary { owner } => {
                write!(f, "annotation-processor-library:{owner}")
            }
            Self::CompiledLibrary { owner, name } => write!(f, "compiled-library:{owner}:{name}"),
        }
    }
}

/// Module built from a target with sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceModule {
    pub label: Label,
    pub dependencies: BTreeSet<Label>,
    pub base_directory: PathBuf,
    pub sources: Vec<JvmSourceItem>,
    pub resources: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_version: Option<String>,
    #[serde(default)]
    pub javac_opts: Vec<String>,
    /// Class and interface jars the target compiles to
    #[serde(default)]
    pub binary_outputs: BTreeSet<PathBuf>,
}

/// A jar-only library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryModule {
    pub label: Label,
    pub dependencies: BTreeSet<Label>,
    pub interface_jars: BTreeSet<PathBuf>,
    pub class_jars: BTreeSet<PathBuf>,
    pub source_jars: BTreeSet<PathBuf>,
    pub is_from_internal_target: bool,
    pub is_low_priority: bool,
}

impl LibraryModule {
    /// Library exposing exactly one class jar
    pub fn single_jar(label: Label, jar: &Path) -> Self {
        Self {
            label,
            dependencies: BTreeSet::new(),
            interface_jars: BTreeSet::new(),
            class_jars: BTreeSet::from([jar.to_path_buf()]),
            source_jars: BTreeSet::new(),
            is_from_internal_target: false,
            is_low_priority: false,
        }
    }
}

/// Labels a target depends on beyond its declared dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexDeps {
    pub label: Label,
    pub deps: BTreeSet<Label>,
}

impl VertexDeps {
    pub fn empty(label: Label) -> Self {
        Self {
            label,
            deps: BTreeSet::new(),
        }
    }

    /// Copy with `label` added
    pub fn with(mut self, label: Label) -> Self {
        self.deps.insert(label);
        self
    }
}

/// Resolved jdeps of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JdepsCache {
    pub vertex_id: VertexId,
    pub jdeps: BTreeSet<PathBuf>,
}

/// Entity stored by the JVM sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum JvmModuleEntity {
    SourceModule(SourceModule),
    LibraryModule(LibraryModule),
    VertexDeps(VertexDeps),
    JdepsCache(JdepsCache),
}

impl JvmModuleEntity {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SourceModule(_) => SourceModule::NAME,
            Self::LibraryModule(_) => LibraryModule::NAME,
            Self::VertexDeps(_) => VertexDeps::NAME,
            Self::JdepsCache(_) => JdepsCache::NAME,
        }
    }

    pub fn label(&self) -> Option<&Label> {
        match self {
            Self::SourceModule(m) => Some(&m.label),
            Self::LibraryModule(m) => Some(&m.label),
            Self::VertexDeps(d) => Some(&d.label),
            Self::JdepsCache(_) => None,
        }
    }

    pub fn as_vertex_deps(&self) -> Option<&VertexDeps> {
        match self {
            Self::VertexDeps(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_jdeps_cache(&self) -> Option<&JdepsCache> {
        match self {
            Self::JdepsCache(c) => Some(c),
            _ => None,
        }
    }
}

macro_rules! entity_variant {
    ($ty:ident) => {
        impl EntityVariant<JvmModuleEntity> for $ty {
            const NAME: &'static str = stringify!($ty);

            fn try_from_entity(entity: JvmModuleEntity) -> Result<Self, JvmModuleEntity> {
                match entity {
                    JvmModuleEntity::$ty(inner) => Ok(inner),
                    other => Err(other),
                }
            }

            fn into_entity(self) -> JvmModuleEntity {
                JvmModuleEntity::$ty(self)
            }
        }

        impl From<$ty> for JvmModuleEntity {
            fn from(value: $ty) -> Self {
                JvmModuleEntity::$ty(value)
            }
        }
    };
}

entity_variant!(SourceModule);
entity_variant!(LibraryModule);
entity_variant!(VertexDeps);
entity_variant!(JdepsCache);

/// Entity store holding JVM modules
pub type JvmEntityStore = PersistentEntityStore<JvmResourceId, JvmModuleEntity>;

/// JSON codecs keyed by [`JvmResourceId::stable_hash`]
pub fn jvm_store_codecs() -> StoreCodecs<JvmResourceId, JvmModuleEntity> {
    StoreCodecs::new(JsonCodec::new(), JsonCodec::new(), JvmResourceId::stable_hash)
}

/// Open the named JVM store inside `data_dir`
pub fn open_jvm_store(data_dir: &Path, name: &str) -> StoreResult<JvmEntityStore> {
    JvmEntityStore::open(data_dir, name, jvm_store_codecs())
}
