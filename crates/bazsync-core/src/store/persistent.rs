//! SQLite-backed incremental entity store
//!
//! The store keeps a full working image in memory. Mutations land in the
//! working image and a journal; [`PersistentEntityStore::commit`] writes the
//! journalled slots in a single transaction and then publishes the new state
//! to readers. Readers created with [`PersistentEntityStore::reader`] only
//! ever observe committed state.
//!
//! The database is loaded lazily on first use. If it cannot be decoded
//! (corrupt blobs, schema version mismatch, dangling slots) the store wipes
//! it, starts empty and reports [`PersistentEntityStore::was_invalidated`].

use once_cell::unsync::OnceCell;
use parking_lot::RwLock;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::codec::{Codec, ResourceHash};
use super::schema::{
    ENTITY_STORE_SCHEMA_VERSION, SCHEMA_CREATE_EDGES, SCHEMA_CREATE_ENTITIES,
    SCHEMA_CREATE_INDEXES, SCHEMA_CREATE_METADATA, SCHEMA_CREATE_RESOURCES, SQL_WIPE_ALL,
};
use super::state::{Journal, Slot, StoreState};
use super::{IncrementalEntityStore, StoreError, StoreResult};

const META_SCHEMA_VERSION: &str = "schema_version";
const META_STORE_NAME: &str = "store_name";
const META_NEXT_SLOT: &str = "next_slot";

/// Hash function addressing resource ids
pub type ResourceHasher<R> = Arc<dyn Fn(&R) -> ResourceHash + Send + Sync>;

/// Codecs and hasher a store is parameterised by
pub struct StoreCodecs<R, E> {
    resource: Box<dyn Codec<R>>,
    entity: Box<dyn Codec<E>>,
    hasher: ResourceHasher<R>,
}

impl<R, E> StoreCodecs<R, E> {
    pub fn new(
        resource: impl Codec<R> + 'static,
        entity: impl Codec<E> + 'static,
        hasher: impl Fn(&R) -> ResourceHash + Send + Sync + 'static,
    ) -> Self {
        Self {
            resource: Box::new(resource),
            entity: Box::new(entity),
            hasher: Arc::new(hasher),
        }
    }
}

/// Counters describing a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub name: String,
    pub resources: usize,
    pub entities: usize,
    pub edges: usize,
    /// Journalled slots not yet committed
    pub pending: usize,
}

struct Loaded<R, E> {
    working: StoreState<R, E>,
    journal: Journal,
    invalidated: bool,
}

/// Incremental entity store persisted to `<data_dir>/<name>.db`
pub struct PersistentEntityStore<R, E> {
    conn: Connection,
    name: String,
    path: Option<PathBuf>,
    codecs: StoreCodecs<R, E>,
    loaded: OnceCell<Loaded<R, E>>,
    committed: Arc<RwLock<Arc<StoreState<R, E>>>>,
    /// The database file was unreadable and had to be recreated at open
    recreated: bool,
}

impl<R, E> PersistentEntityStore<R, E>
where
    R: Clone + Debug,
    E: Clone,
{
    /// Open (or create) the named store inside `data_dir`
    pub fn open(data_dir: &Path, name: &str, codecs: StoreCodecs<R, E>) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{name}.db"));

        let (conn, recreated) = match Self::open_connection(&path) {
            Ok(conn) => (conn, false),
            Err(StoreError::Sqlite(err)) if is_not_a_database(&err) => {
                warn!(path = %path.display(), "Store database is unreadable, recreating it");
                remove_database_files(&path)?;
                (Self::open_connection(&path)?, true)
            }
            Err(err) => return Err(err),
        };

        debug!(store = name, path = %path.display(), "Opened entity store");
        Ok(Self::with_connection(conn, name, Some(path), codecs, recreated))
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory(name: &str, codecs: StoreCodecs<R, E>) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        Ok(Self::with_connection(conn, name, None, codecs, false))
    }

    fn with_connection(
        conn: Connection,
        name: &str,
        path: Option<PathBuf>,
        codecs: StoreCodecs<R, E>,
        recreated: bool,
    ) -> Self {
        Self {
            conn,
            name: name.to_string(),
            path,
            codecs,
            loaded: OnceCell::new(),
            committed: Arc::new(RwLock::new(Arc::new(StoreState::default()))),
            recreated,
        }
    }

    fn open_connection(path: &Path) -> StoreResult<Connection> {
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::create_schema(&conn)?;
        Ok(conn)
    }

    fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "cache_size", -32000)?; // 32MB cache
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(SCHEMA_CREATE_RESOURCES, [])?;
        conn.execute(SCHEMA_CREATE_ENTITIES, [])?;
        conn.execute(SCHEMA_CREATE_EDGES, [])?;
        conn.execute(SCHEMA_CREATE_METADATA, [])?;
        conn.execute_batch(SCHEMA_CREATE_INDEXES)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether loading discarded the persisted contents.
    ///
    /// Callers treat an invalidated store as cold and rebuild everything.
    pub fn was_invalidated(&self) -> StoreResult<bool> {
        Ok(self.loaded()?.invalidated)
    }

    /// Handle observing committed state only
    pub fn reader(&self) -> StoreResult<StoreReader<R, E>> {
        self.loaded()?;
        Ok(StoreReader {
            committed: Arc::clone(&self.committed),
            hasher: Arc::clone(&self.codecs.hasher),
        })
    }

    pub fn has_pending_changes(&self) -> bool {
        self.loaded
            .get()
            .map(|l| !l.journal.is_empty())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        let loaded = self.loaded()?;
        let state = &loaded.working;
        Ok(StoreStats {
            name: self.name.clone(),
            resources: state.resources.len(),
            entities: state.entities.len(),
            edges: state.edge_count(),
            pending: loaded.journal.len(),
        })
    }

    /// Every live `(resource, entity)` pair in slot order
    pub fn entries(&self) -> StoreResult<Vec<(R, E)>> {
        let state = &self.loaded()?.working;
        Ok(entries_of(state))
    }

    /// Write all journalled changes in one transaction and publish them
    pub fn commit(&mut self) -> StoreResult<()> {
        let Some(loaded) = self.loaded.get_mut() else {
            return Ok(());
        };
        if loaded.journal.is_empty() {
            return Ok(());
        }

        let journal = &loaded.journal;
        let state = &loaded.working;
        let tx = self.conn.transaction()?;

        if journal.cleared {
            tx.execute_batch(SQL_WIPE_ALL)?;
        }

        {
            let mut insert_resource = tx.prepare(
                "INSERT OR REPLACE INTO resources (id, hash, resource) VALUES (?1, ?2, ?3)",
            )?;
            for slot in &journal.resources {
                if let Some((hash, resource)) = state.resources.get(slot) {
                    let bytes = self.codecs.resource.encode(resource)?;
                    insert_resource.execute(params![slot, &hash.as_bytes()[..], bytes])?;
                }
            }

            let mut upsert_entity =
                tx.prepare("INSERT OR REPLACE INTO entities (id, entity) VALUES (?1, ?2)")?;
            let mut delete_entity = tx.prepare("DELETE FROM entities WHERE id = ?1")?;
            for slot in &journal.entities {
                match state.entities.get(slot) {
                    Some(entity) => {
                        let bytes = self.codecs.entity.encode(entity)?;
                        upsert_entity.execute(params![slot, bytes])?;
                    }
                    None => {
                        delete_entity.execute(params![slot])?;
                    }
                }
            }

            let mut delete_edges = tx.prepare("DELETE FROM edges WHERE from_id = ?1")?;
            let mut insert_edge =
                tx.prepare("INSERT OR IGNORE INTO edges (from_id, to_id) VALUES (?1, ?2)")?;
            for slot in &journal.edges {
                delete_edges.execute(params![slot])?;
                if let Some(succ) = state.successors.get(slot) {
                    for to in succ {
                        insert_edge.execute(params![slot, to])?;
                    }
                }
            }

            let mut set_meta = tx.prepare(
                "INSERT OR REPLACE INTO store_metadata (key, value) VALUES (?1, ?2)",
            )?;
            set_meta.execute(params![META_SCHEMA_VERSION, ENTITY_STORE_SCHEMA_VERSION])?;
            set_meta.execute(params![META_STORE_NAME, self.name])?;
            set_meta.execute(params![META_NEXT_SLOT, state.next_slot.to_string()])?;
        }

        tx.commit()?;

        info!(
            store = %self.name,
            slots = journal.len(),
            cleared = journal.cleared,
            "Committed entity store changes"
        );

        *self.committed.write() = Arc::new(state.clone());
        loaded.journal = Journal::default();
        Ok(())
    }

    /// Throw away uncommitted changes
    pub fn discard(&mut self) {
        if let Some(loaded) = self.loaded.get_mut() {
            if !loaded.journal.is_empty() {
                debug!(store = %self.name, slots = loaded.journal.len(), "Discarding uncommitted changes");
            }
            loaded.working = self.committed.read().as_ref().clone();
            loaded.journal = Journal::default();
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    fn loaded(&self) -> StoreResult<&Loaded<R, E>> {
        self.loaded.get_or_try_init(|| self.load())
    }

    fn loaded_mut(&mut self) -> StoreResult<&mut Loaded<R, E>> {
        self.loaded()?;
        let name = self.name.clone();
        self.loaded.get_mut().ok_or_else(|| StoreError::Corrupt {
            name,
            reason: "working state missing after load".to_string(),
        })
    }

    fn load(&self) -> StoreResult<Loaded<R, E>> {
        let mut invalidated = self.recreated;
        let state = match self.read_state() {
            Ok(state) => state,
            Err(err @ (StoreError::Codec(_) | StoreError::Corrupt { .. })) => {
                warn!(store = %self.name, error = %err, "Discarding invalid store contents");
                self.conn.execute_batch(SQL_WIPE_ALL)?;
                invalidated = true;
                StoreState::default()
            }
            Err(err) => return Err(err),
        };

        debug!(
            store = %self.name,
            resources = state.resources.len(),
            entities = state.entities.len(),
            invalidated,
            "Loaded entity store"
        );

        *self.committed.write() = Arc::new(state.clone());
        Ok(Loaded {
            working: state,
            journal: Journal::default(),
            invalidated,
        })
    }

    fn read_state(&self) -> StoreResult<StoreState<R, E>> {
        if let Some(version) = self.get_metadata(META_SCHEMA_VERSION)? {
            if version != ENTITY_STORE_SCHEMA_VERSION {
                return Err(self.corrupt(format!(
                    "schema version {version}, expected {ENTITY_STORE_SCHEMA_VERSION}"
                )));
            }
        }
        if let Some(stored) = self.get_metadata(META_STORE_NAME)? {
            if stored != self.name {
                return Err(self.corrupt(format!("database belongs to store '{stored}'")));
            }
        }

        let mut state = StoreState::default();

        let mut stmt = self
            .conn
            .prepare("SELECT id, hash, resource FROM resources ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Slot>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;
        for row in rows {
            let (slot, hash, bytes) = row?;
            let hash = ResourceHash::from_slice(&hash)?;
            let resource = self.codecs.resource.decode(&bytes)?;
            if (self.codecs.hasher)(&resource) != hash {
                return Err(self.corrupt(format!("slot {slot} hash does not match its resource")));
            }
            state.slots.insert(hash, slot);
            state.resources.insert(slot, (hash, resource));
            state.next_slot = state.next_slot.max(slot + 1);
        }

        let mut stmt = self.conn.prepare("SELECT id, entity FROM entities")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Slot>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        for row in rows {
            let (slot, bytes) = row?;
            if !state.resources.contains_key(&slot) {
                return Err(self.corrupt(format!("entity at unbound slot {slot}")));
            }
            state.entities.insert(slot, self.codecs.entity.decode(&bytes)?);
        }

        let mut stmt = self.conn.prepare("SELECT from_id, to_id FROM edges")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, Slot>(0)?, row.get::<_, Slot>(1)?)))?;
        for row in rows {
            let (from, to) = row?;
            if !state.entities.contains_key(&from) || !state.resources.contains_key(&to) {
                return Err(self.corrupt(format!("dangling edge {from} -> {to}")));
            }
            state.insert_edge(from, to);
        }

        if let Some(next) = self.get_metadata(META_NEXT_SLOT)? {
            let next: Slot = next
                .parse()
                .map_err(|_| self.corrupt(format!("bad next_slot '{next}'")))?;
            state.next_slot = state.next_slot.max(next);
        }

        Ok(state)
    }

    fn get_metadata(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM store_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            name: self.name.clone(),
            reason,
        }
    }

    // ========================================================================
    // Slot helpers
    // ========================================================================

    fn hash(&self, id: &R) -> ResourceHash {
        (self.codecs.hasher)(id)
    }

    /// Slot for `id`, allocating and journalling a new one when unseen
    fn ensure_slot(loaded: &mut Loaded<R, E>, hash: ResourceHash, id: &R) -> Slot {
        if let Some(slot) = loaded.working.slot(&hash) {
            return slot;
        }
        let slot = loaded.working.next_slot;
        loaded.working.next_slot += 1;
        loaded.working.slots.insert(hash, slot);
        loaded.working.resources.insert(slot, (hash, id.clone()));
        loaded.journal.resources.insert(slot);
        slot
    }

    fn live_slot(state: &StoreState<R, E>, hash: &ResourceHash) -> Option<Slot> {
        state.slot(hash).filter(|s| state.entities.contains_key(s))
    }
}

impl<R, E> IncrementalEntityStore<R, E> for PersistentEntityStore<R, E>
where
    R: Clone + Debug,
    E: Clone,
{
    fn create_entity<F>(&mut self, id: &R, build: F) -> StoreResult<E>
    where
        F: FnOnce(&R) -> E,
    {
        let hash = self.hash(id);
        let loaded = self.loaded_mut()?;
        let slot = Self::ensure_slot(loaded, hash, id);
        let entity = build(id);
        loaded.working.entities.insert(slot, entity.clone());
        loaded.journal.entities.insert(slot);
        Ok(entity)
    }

    fn get_entity(&self, id: &R) -> StoreResult<Option<E>> {
        let hash = self.hash(id);
        Ok(self.loaded()?.working.entity_by_hash(&hash))
    }

    fn modify_entity<F>(&mut self, id: &R, f: F) -> StoreResult<Option<E>>
    where
        F: FnOnce(E) -> E,
    {
        let hash = self.hash(id);
        let loaded = self.loaded_mut()?;
        let Some(slot) = Self::live_slot(&loaded.working, &hash) else {
            return Ok(None);
        };
        let Some(old) = loaded.working.entities.remove(&slot) else {
            return Ok(None);
        };
        let updated = f(old);
        loaded.working.entities.insert(slot, updated.clone());
        loaded.journal.entities.insert(slot);
        Ok(Some(updated))
    }

    fn remove_entity(&mut self, id: &R) -> StoreResult<Option<E>> {
        let hash = self.hash(id);
        let loaded = self.loaded_mut()?;
        let Some(slot) = loaded.working.slot(&hash) else {
            return Ok(None);
        };
        let removed = loaded.working.entities.remove(&slot);
        if removed.is_some() {
            loaded.journal.entities.insert(slot);
        }
        if loaded.working.successors.contains_key(&slot) {
            loaded.working.remove_outgoing(slot);
            loaded.journal.edges.insert(slot);
        }
        Ok(removed)
    }

    fn add_dependency(&mut self, from: &R, to: &R) -> StoreResult<()> {
        let from_hash = self.hash(from);
        let to_hash = self.hash(to);
        let loaded = self.loaded_mut()?;
        let state = &loaded.working;

        let endpoint_error = |missing: &R| StoreError::UnknownEndpoint {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
            missing: format!("{:?}", missing),
        };
        let from_slot = Self::live_slot(state, &from_hash).ok_or_else(|| endpoint_error(from))?;
        let to_slot = Self::live_slot(state, &to_hash).ok_or_else(|| endpoint_error(to))?;

        if state
            .successors
            .get(&from_slot)
            .is_some_and(|succ| succ.contains(&to_slot))
        {
            return Ok(());
        }
        if from_slot == to_slot || state.reaches(to_slot, from_slot) {
            return Err(StoreError::CyclicEdge {
                from: format!("{:?}", from),
                to: format!("{:?}", to),
            });
        }

        loaded.working.insert_edge(from_slot, to_slot);
        loaded.journal.edges.insert(from_slot);
        Ok(())
    }

    fn direct_dependencies(&self, id: &R) -> StoreResult<Vec<R>> {
        let hash = self.hash(id);
        let state = &self.loaded()?.working;
        Ok(state
            .slot(&hash)
            .map(|slot| state.successors_of(slot))
            .unwrap_or_default())
    }

    fn direct_referrers(&self, id: &R) -> StoreResult<Vec<R>> {
        let hash = self.hash(id);
        let state = &self.loaded()?.working;
        Ok(state
            .slot(&hash)
            .map(|slot| state.live_predecessors_of(slot))
            .unwrap_or_default())
    }

    fn transitive_dependants(&self, id: &R) -> StoreResult<Vec<R>> {
        let hash = self.hash(id);
        let state = &self.loaded()?.working;
        Ok(match state.slot(&hash) {
            Some(slot) => state.resources_of(&state.reachable_from(slot)),
            None => Vec::new(),
        })
    }

    fn all_entities(&self) -> StoreResult<Vec<E>> {
        Ok(self.loaded()?.working.entities.values().cloned().collect())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.loaded()?.working.entities.len())
    }

    fn clear(&mut self) -> StoreResult<()> {
        let loaded = self.loaded_mut()?;
        loaded.working = StoreState::default();
        loaded.journal = Journal {
            cleared: true,
            ..Journal::default()
        };
        Ok(())
    }
}

/// Read-only view over the last committed state of a store
pub struct StoreReader<R, E> {
    committed: Arc<RwLock<Arc<StoreState<R, E>>>>,
    hasher: ResourceHasher<R>,
}

impl<R, E> Clone for StoreReader<R, E> {
    fn clone(&self) -> Self {
        Self {
            committed: Arc::clone(&self.committed),
            hasher: Arc::clone(&self.hasher),
        }
    }
}

impl<R: Clone, E: Clone> StoreReader<R, E> {
    fn snapshot(&self) -> Arc<StoreState<R, E>> {
        Arc::clone(&self.committed.read())
    }

    pub fn get_entity(&self, id: &R) -> Option<E> {
        self.snapshot().entity_by_hash(&(self.hasher)(id))
    }

    pub fn direct_dependencies(&self, id: &R) -> Vec<R> {
        let state = self.snapshot();
        state
            .slot(&(self.hasher)(id))
            .map(|slot| state.successors_of(slot))
            .unwrap_or_default()
    }

    pub fn direct_referrers(&self, id: &R) -> Vec<R> {
        let state = self.snapshot();
        state
            .slot(&(self.hasher)(id))
            .map(|slot| state.live_predecessors_of(slot))
            .unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<(R, E)> {
        entries_of(&self.snapshot())
    }

    pub fn len(&self) -> usize {
        self.snapshot().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn entries_of<R: Clone, E: Clone>(state: &StoreState<R, E>) -> Vec<(R, E)> {
    state
        .entities
        .iter()
        .filter_map(|(slot, entity)| Some((state.resource(*slot)?.clone(), entity.clone())))
        .collect()
}

fn is_not_a_database(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::NotADatabase
    )
}

fn remove_database_files(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            std::fs::remove_file(sidecar)?;
        }
    }
    Ok(())
}
