//! SQLite Schema Definitions for Entity Store Persistence
//!
//! Each named store is a self-contained SQLite database. Resource ids and
//! entities are stored as codec-encoded blobs keyed by a dense integer slot;
//! the slot is found through the 128-bit resource hash.

/// Schema version for entity store databases
pub const ENTITY_STORE_SCHEMA_VERSION: &str = "1";

/// SQL to create the resources table
///
/// Maps the structural hash of a resource id to its integer slot. A slot is
/// never reused for a different resource.
pub const SCHEMA_CREATE_RESOURCES: &str = r#"
CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY NOT NULL,
    hash BLOB NOT NULL UNIQUE,
    resource BLOB NOT NULL
)
"#;

/// SQL to create the entities table
pub const SCHEMA_CREATE_ENTITIES: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY NOT NULL,
    entity BLOB NOT NULL
)
"#;

/// SQL to create the dependency edge table
///
/// `from_id` depends on `to_id`.
pub const SCHEMA_CREATE_EDGES: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    from_id INTEGER NOT NULL,
    to_id INTEGER NOT NULL,
    PRIMARY KEY (from_id, to_id)
)
"#;

/// SQL to create indexes for efficient queries
pub const SCHEMA_CREATE_INDEXES: &str = r#"
-- Index on target for referrer lookups
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
"#;

/// SQL to create the metadata table
///
/// Stores schema version, store name and the next free slot.
pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS store_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// SQL wiping every table, used when a cache is found to be invalid
pub const SQL_WIPE_ALL: &str = r#"
DELETE FROM resources;
DELETE FROM entities;
DELETE FROM edges;
DELETE FROM store_metadata;
"#;
