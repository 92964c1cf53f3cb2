//! Persistent entry store backed by redb.
//!
//! Entities implement [`Entry`], which names the table they live in and how
//! they are encoded. All access goes through explicit transactions:
//! [`EntryStore::view`] hands out a consistent read snapshot and
//! [`EntryStore::update`] commits only when the closure returns `Ok`.

use crate::entries::DbAttributeEntry;
use crate::tables::{self, EntryTable};
use redb::{Database, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{debug, warn};

/// Current on-disk schema version, recorded as a db attribute
pub const SCHEMA_VERSION: &str = "1";
pub const ATTR_SCHEMA_VERSION: &str = "schema_version";

/// Error type for entry store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<StoreError> for volplane_common::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::InvalidEntry(msg) => Self::Validation(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A persisted domain record stored in exactly one table, keyed by its id.
pub trait Entry: Serialize + DeserializeOwned {
    /// Human readable kind, used in errors and logs
    const KIND: &'static str;
    /// Table holding every entry of this kind
    const TABLE: EntryTable;

    fn id(&self) -> &str;

    fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Read access shared by read-only and read-write transactions.
pub trait EntryReader {
    /// Load an entry, returning `NotFound` when the id is absent
    fn load<E: Entry>(&self, id: &str) -> StoreResult<E> {
        self.try_load(id)?.ok_or_else(|| StoreError::NotFound {
            kind: E::KIND,
            id: id.to_string(),
        })
    }

    fn try_load<E: Entry>(&self, id: &str) -> StoreResult<Option<E>>;

    /// All ids in the entry's table, in store iteration order
    fn list<E: Entry>(&self) -> StoreResult<Vec<String>>;

    fn load_all<E: Entry>(&self) -> StoreResult<Vec<E>> {
        self.list::<E>()?
            .iter()
            .map(|id| self.load::<E>(id))
            .collect()
    }

    /// Owner id of a registration key, if registered
    fn registration(&self, key: &str) -> StoreResult<Option<String>>;

    /// Pending operation id holding a marker on `id`, if any
    fn marker_for(&self, id: &str) -> StoreResult<Option<String>>;
}

fn list_keys<T: ReadableTable<&'static str, &'static [u8]>>(table: &T) -> StoreResult<Vec<String>> {
    let mut ids = Vec::new();
    for entry in table.iter()? {
        let entry = entry?;
        ids.push(entry.0.value().to_string());
    }
    Ok(ids)
}

/// Read-only transaction observing a single consistent snapshot
pub struct ReadTx {
    txn: redb::ReadTransaction,
}

impl EntryReader for ReadTx {
    fn try_load<E: Entry>(&self, id: &str) -> StoreResult<Option<E>> {
        let table = self.txn.open_table(E::TABLE)?;
        match table.get(id)? {
            Some(val) => Ok(Some(E::decode(val.value())?)),
            None => Ok(None),
        }
    }

    fn list<E: Entry>(&self) -> StoreResult<Vec<String>> {
        let table = self.txn.open_table(E::TABLE)?;
        list_keys(&table)
    }

    fn registration(&self, key: &str) -> StoreResult<Option<String>> {
        let table = self.txn.open_table(tables::REGISTRATIONS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    fn marker_for(&self, id: &str) -> StoreResult<Option<String>> {
        let table = self.txn.open_table(tables::PENDING_TARGETS)?;
        Ok(table.get(id)?.map(|v| v.value().to_string()))
    }
}

/// Read-write transaction; writes become visible only on commit
pub struct WriteTx {
    txn: redb::WriteTransaction,
}

impl EntryReader for WriteTx {
    fn try_load<E: Entry>(&self, id: &str) -> StoreResult<Option<E>> {
        let table = self.txn.open_table(E::TABLE)?;
        let value = table.get(id)?.map(|val| val.value().to_vec());
        value.map(|bytes| E::decode(&bytes)).transpose()
    }

    fn list<E: Entry>(&self) -> StoreResult<Vec<String>> {
        let table = self.txn.open_table(E::TABLE)?;
        list_keys(&table)
    }

    fn registration(&self, key: &str) -> StoreResult<Option<String>> {
        let table = self.txn.open_table(tables::REGISTRATIONS)?;
        let owner = table.get(key)?.map(|v| v.value().to_string());
        Ok(owner)
    }

    fn marker_for(&self, id: &str) -> StoreResult<Option<String>> {
        let table = self.txn.open_table(tables::PENDING_TARGETS)?;
        let op = table.get(id)?.map(|v| v.value().to_string());
        Ok(op)
    }
}

impl WriteTx {
    /// Write the entry's serialized form keyed by its id
    pub fn save<E: Entry>(&mut self, entry: &E) -> StoreResult<()> {
        let id = entry.id();
        if id.is_empty() {
            return Err(StoreError::InvalidEntry(format!(
                "cannot save {} without an id",
                E::KIND
            )));
        }
        let bytes = entry.encode()?;
        let mut table = self.txn.open_table(E::TABLE)?;
        table.insert(id, bytes.as_slice())?;
        Ok(())
    }

    /// Remove an entry, failing with `NotFound` when it is absent
    pub fn delete<E: Entry>(&mut self, id: &str) -> StoreResult<()> {
        let mut table = self.txn.open_table(E::TABLE)?;
        let removed = table.remove(id)?.is_some();
        if !removed {
            return Err(StoreError::NotFound {
                kind: E::KIND,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Claim a uniqueness key for `owner`
    pub fn register(&mut self, key: &str, owner: &str) -> StoreResult<()> {
        let mut table = self.txn.open_table(tables::REGISTRATIONS)?;
        let existing = table.get(key)?.map(|v| v.value().to_string());
        match existing {
            Some(current) if current != owner => Err(StoreError::Conflict(format!(
                "{key} is already registered to {current}"
            ))),
            _ => {
                table.insert(key, owner)?;
                Ok(())
            }
        }
    }

    pub fn unregister(&mut self, key: &str) -> StoreResult<()> {
        let mut table = self.txn.open_table(tables::REGISTRATIONS)?;
        table.remove(key)?;
        Ok(())
    }

    pub(crate) fn set_marker(&mut self, target: &str, op_id: &str) -> StoreResult<()> {
        let mut table = self.txn.open_table(tables::PENDING_TARGETS)?;
        table.insert(target, op_id)?;
        Ok(())
    }

    pub(crate) fn clear_marker(&mut self, target: &str, op_id: &str) -> StoreResult<()> {
        let mut table = self.txn.open_table(tables::PENDING_TARGETS)?;
        let owned = table.get(target)?.is_some_and(|v| v.value() == op_id);
        if owned {
            table.remove(target)?;
        }
        Ok(())
    }
}

/// Durable entry store. One instance is shared by every component.
pub struct EntryStore {
    db: Database,
}

impl EntryStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::CLUSTERS)?;
            let _t = write_txn.open_table(tables::NODES)?;
            let _t = write_txn.open_table(tables::DEVICES)?;
            let _t = write_txn.open_table(tables::BRICKS)?;
            let _t = write_txn.open_table(tables::VOLUMES)?;
            let _t = write_txn.open_table(tables::BLOCK_VOLUMES)?;
            let _t = write_txn.open_table(tables::SNAPSHOTS)?;
            let _t = write_txn.open_table(tables::PENDING_OPERATIONS)?;
            let _t = write_txn.open_table(tables::PENDING_TARGETS)?;
            let _t = write_txn.open_table(tables::REGISTRATIONS)?;
            let mut attrs = write_txn.open_table(tables::DB_ATTRIBUTES)?;
            if attrs.get(ATTR_SCHEMA_VERSION)?.is_none() {
                let attr = DbAttributeEntry::new(ATTR_SCHEMA_VERSION, SCHEMA_VERSION);
                let bytes = attr.encode()?;
                attrs.insert(ATTR_SCHEMA_VERSION, bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        debug!("Opened entry store at {}", path.display());

        Ok(Self { db })
    }

    /// Run `f` against a read-only snapshot.
    pub fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&ReadTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let txn = self.db.begin_read().map_err(StoreError::from)?;
        f(&ReadTx { txn })
    }

    /// Run `f` inside a read-write transaction. Writes commit atomically when
    /// `f` returns `Ok` and are discarded when it returns `Err`.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut WriteTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let txn = self.db.begin_write().map_err(StoreError::from)?;
        let mut tx = WriteTx { txn };
        match f(&mut tx) {
            Ok(value) => {
                tx.txn.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = tx.txn.abort() {
                    warn!("Failed to abort write transaction: {}", abort);
                }
                Err(e)
            }
        }
    }

    /// Read a free-form attribute
    pub fn attribute(&self, key: &str) -> StoreResult<Option<String>> {
        self.view(|tx| Ok(tx.try_load::<DbAttributeEntry>(key)?.map(|a| a.value)))
    }
}
