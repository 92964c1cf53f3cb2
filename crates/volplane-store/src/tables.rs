//! Redb table definitions for persistent entry storage.
//!
//! One table ("bucket") per entity kind. Values are bincode-encoded records
//! keyed by the entity id.

use redb::TableDefinition;

/// Table holding one entity kind, keyed by entity id
pub type EntryTable = TableDefinition<'static, &'static str, &'static [u8]>;

// Cluster topology
pub const CLUSTERS: EntryTable = TableDefinition::new("clusters");
pub const NODES: EntryTable = TableDefinition::new("nodes");
pub const DEVICES: EntryTable = TableDefinition::new("devices");
pub const BRICKS: EntryTable = TableDefinition::new("bricks");

// Volumes
pub const VOLUMES: EntryTable = TableDefinition::new("volumes");
pub const BLOCK_VOLUMES: EntryTable = TableDefinition::new("block_volumes");
pub const SNAPSHOTS: EntryTable = TableDefinition::new("snapshots");

// Free-form attributes (schema version markers)
pub const DB_ATTRIBUTES: EntryTable = TableDefinition::new("db_attributes");

// Pending operation ledger
pub const PENDING_OPERATIONS: EntryTable = TableDefinition::new("pending_operations");
// Key: target entity id, Value: pending operation id
pub const PENDING_TARGETS: TableDefinition<&str, &str> = TableDefinition::new("pending_targets");

// Key: "manage:<host>", "storage:<host>", "device:<node>:<name>", "volume:<name>"
// or "snapshot:<name>", Value: owner id
pub const REGISTRATIONS: TableDefinition<&str, &str> = TableDefinition::new("registrations");
