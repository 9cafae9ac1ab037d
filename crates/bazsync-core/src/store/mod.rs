//! Incremental Entity Store
//!
//! A generic cache of `ResourceId -> Entity` with explicit dependency edges
//! between resource ids. It is both the working memory of the jdeps closure
//! engine and the cross-session persistence layer.
//!
//! # Architecture
//!
//! ```text
//! PersistentEntityStore<R, E>
//! ├── working StoreState (lazily loaded, mutated by the sync pass)
//! ├── Journal (slots touched since the last commit)
//! ├── committed snapshot (Arc, published on commit, read by StoreReader)
//! └── SQLite database (<data_dir>/<name>.db)
//! ```
//!
//! Edge semantics: `add_dependency(from, to)` records that `from` depends on
//! `to`. Removing an entity drops its outgoing edges only; edges pointing at a
//! removed entity stay in place until their owner is removed or rebuilt.
//!
//! Resource slots are never released. A resource keeps its slot after its
//! entity is removed, so `StoreStats::resources` only grows across
//! incremental passes; `clear()` (run by every full pass) drops them all.

pub mod codec;
pub mod persistent;
pub mod schema;
mod state;

use std::fmt::Debug;
use thiserror::Error;

pub use codec::{stable_hash, Codec, CodecError, JsonCodec, ResourceHash, StableHasher};
pub use persistent::{PersistentEntityStore, StoreCodecs, StoreReader, StoreStats};

/// Errors that can occur during entity store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no entity stored for {0}")]
    MissingEntity(String),

    #[error("cannot link {from} -> {to}: {missing} has no entity")]
    UnknownEndpoint {
        from: String,
        to: String,
        missing: String,
    },

    #[error("entity for {resource} is not a {expected}")]
    UnexpectedVariant {
        resource: String,
        expected: &'static str,
    },

    #[error("edge {from} -> {to} would create a cycle")]
    CyclicEdge { from: String, to: String },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store '{name}' is inconsistent: {reason}")]
    Corrupt { name: String, reason: String },
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage interface consumed by the sync pass.
///
/// Implementations keep at most one entity per resource id and keep the edge
/// set acyclic.
pub trait IncrementalEntityStore<R, E> {
    /// Insert the entity built by `build`, replacing any prior entity at `id`.
    /// Existing edges of `id` are kept.
    fn create_entity<F>(&mut self, id: &R, build: F) -> StoreResult<E>
    where
        F: FnOnce(&R) -> E;

    fn get_entity(&self, id: &R) -> StoreResult<Option<E>>;

    /// Replace the entity at `id` with `f(old)`. Returns `None` when absent.
    fn modify_entity<F>(&mut self, id: &R, f: F) -> StoreResult<Option<E>>
    where
        F: FnOnce(E) -> E;

    /// Delete the entity at `id` together with its outgoing edges.
    fn remove_entity(&mut self, id: &R) -> StoreResult<Option<E>>;

    /// Record that `from` depends on `to`. Both must hold an entity.
    fn add_dependency(&mut self, from: &R, to: &R) -> StoreResult<()>;

    /// Resources `id` depends on
    fn direct_dependencies(&self, id: &R) -> StoreResult<Vec<R>>;

    /// Resources with a live entity that depend on `id`
    fn direct_referrers(&self, id: &R) -> StoreResult<Vec<R>>;

    /// `id` followed by everything reachable over outgoing edges, breadth first
    fn transitive_dependants(&self, id: &R) -> StoreResult<Vec<R>>;

    fn all_entities(&self) -> StoreResult<Vec<E>>;

    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every entity, edge and resource slot
    fn clear(&mut self) -> StoreResult<()>;
}

/// A concrete payload type carried by one variant of an entity sum type.
///
/// Lets callers address entities by their variant type, e.g. to accumulate
/// labels on a `VertexDeps` entity without matching by hand.
pub trait EntityVariant<E>: Sized {
    /// Human-readable variant name used in errors
    const NAME: &'static str;

    /// Extract the payload, handing the entity back on mismatch
    fn try_from_entity(entity: E) -> Result<Self, E>;

    fn into_entity(self) -> E;
}

/// Replace the `T` stored at `id` with `f(old)`.
///
/// Fails with [`StoreError::MissingEntity`] when nothing is stored at `id` and
/// with [`StoreError::UnexpectedVariant`] when the entity is not a `T`.
pub fn modify_entity_typed<R, E, T, S, F>(store: &mut S, id: &R, f: F) -> StoreResult<E>
where
    R: Debug,
    T: EntityVariant<E>,
    S: IncrementalEntityStore<R, E>,
    F: FnOnce(T) -> T,
{
    let entity = store
        .get_entity(id)?
        .ok_or_else(|| StoreError::MissingEntity(format!("{:?}", id)))?;
    let typed = T::try_from_entity(entity).map_err(|_| StoreError::UnexpectedVariant {
        resource: format!("{:?}", id),
        expected: T::NAME,
    })?;
    let updated = f(typed);
    store.create_entity(id, move |_| updated.into_entity())
}
