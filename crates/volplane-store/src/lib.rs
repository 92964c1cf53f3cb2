//! Volplane Entry Store
//!
//! Durable, bucketed persistence for cluster entities backed by redb.
//! Every read happens inside a `view` transaction and every write inside an
//! `update` transaction; the pending-operation ledger shares those
//! transactions so a marker and the state change it guards commit together.

pub mod dump;
pub mod entries;
pub mod pending;
pub mod store;
pub mod tables;

// Re-exports
pub use dump::DbDump;
pub use entries::{
    BlockHostingInfo, BlockVolumeEntry, BrickEntry, ClusterEntry, DbAttributeEntry, DeviceEntry,
    NodeEntry, SnapshotEntry, VolumeEntry,
};
pub use pending::{
    PendingAction, PendingChange, PendingMarker, PendingOperationEntry, PendingState,
};
pub use store::{Entry, EntryReader, EntryStore, ReadTx, StoreError, StoreResult, WriteTx};
