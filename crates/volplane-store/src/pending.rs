//! Pending operation ledger.
//!
//! A pending operation record marks one or more entity ids as the target of
//! an in-progress mutation. The record and its target index live in the same
//! redb database as the entities, so `commit` clears the marker in the very
//! transaction that persists the guarded state change.

use crate::entries::{
    BlockVolumeEntry, BrickEntry, DeviceEntry, NodeEntry, SnapshotEntry, VolumeEntry,
};
use crate::store::{Entry, EntryReader, StoreError, StoreResult, WriteTx};
use crate::tables::{self, EntryTable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use volplane_common::new_id;

/// Kind of mutation a pending operation performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    CreateVolume,
    ExpandVolume,
    DeleteVolume,
    ReplaceBrick,
    CreateBlockVolume,
    ExpandBlockVolume,
    DeleteBlockVolume,
    CreateSnapshot,
    CloneSnapshot,
    DeleteSnapshot,
    AddNode,
    DeleteNode,
    AddDevice,
    DeleteDevice,
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreateVolume => "create-volume",
            Self::ExpandVolume => "expand-volume",
            Self::DeleteVolume => "delete-volume",
            Self::ReplaceBrick => "replace-brick",
            Self::CreateBlockVolume => "create-block-volume",
            Self::ExpandBlockVolume => "expand-block-volume",
            Self::DeleteBlockVolume => "delete-block-volume",
            Self::CreateSnapshot => "create-snapshot",
            Self::CloneSnapshot => "clone-snapshot",
            Self::DeleteSnapshot => "delete-snapshot",
            Self::AddNode => "add-node",
            Self::DeleteNode => "delete-node",
            Self::AddDevice => "add-device",
            Self::DeleteDevice => "delete-device",
        };
        f.write_str(s)
    }
}

/// One step of intent recorded with a pending operation. Enough is kept
/// here for the recovery pass to reconcile the remote side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingChange {
    AddVolume(VolumeEntry),
    AddBrick {
        brick: BrickEntry,
        /// Manage hostname of the node holding the brick
        host: String,
    },
    ExpandVolume {
        volume_id: String,
        previous_brick_count: usize,
        /// Size added to the volume, in GB
        size_gb: u64,
    },
    DeleteVolume {
        volume_id: String,
        /// Manage hostname used for volume-level commands
        host: String,
    },
    DeleteBrick {
        brick: BrickEntry,
        host: String,
    },
    /// Swap of `old_brick_id` for the brick of the accompanying `AddBrick`
    /// change. The old brick is listed in a `DeleteBrick` change.
    ReplaceBrick {
        volume_id: String,
        old_brick_id: String,
        new_brick_id: String,
        /// Manage hostname used for volume-level commands
        host: String,
    },
    AddBlockVolume {
        block_volume: BlockVolumeEntry,
        host: String,
    },
    ExpandBlockVolume {
        block_volume_id: String,
        hosting_volume_id: String,
        host: String,
        /// New total size in GB
        size_gb: u64,
        /// Hosting space taken for the growth, in GB
        added_gb: u64,
    },
    DeleteBlockVolume {
        block_volume_id: String,
        host: String,
    },
    AddSnapshot {
        snapshot: SnapshotEntry,
        host: String,
    },
    /// Clone of `snapshot_id` into the volume of the accompanying
    /// `AddVolume` change
    CloneSnapshot {
        snapshot_id: String,
        snapshot_name: String,
        host: String,
    },
    DeleteSnapshot {
        snapshot_id: String,
        host: String,
    },
    AddNode(NodeEntry),
    DeleteNode {
        node_id: String,
    },
    AddDevice {
        device: DeviceEntry,
        host: String,
    },
    DeleteDevice {
        device_id: String,
        host: String,
    },
}

impl PendingChange {
    /// Existing entity a new entity is attached to. The parent must not be
    /// the target of a pending operation while the child is being added.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::AddVolume(volume) => Some(&volume.cluster_id),
            Self::AddBrick { brick, .. } => Some(&brick.device_id),
            Self::AddBlockVolume { block_volume, .. } => Some(&block_volume.hosting_volume_id),
            Self::AddSnapshot { snapshot, .. } => Some(&snapshot.volume_id),
            Self::AddNode(node) => Some(&node.cluster_id),
            Self::AddDevice { device, .. } => Some(&device.node_id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    Active,
    /// Recovery could not decide; left for an operator
    Quarantined { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperationEntry {
    pub id: String,
    pub action: PendingAction,
    pub targets: Vec<String>,
    pub changes: Vec<PendingChange>,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    pub state: PendingState,
}

impl PendingOperationEntry {
    #[must_use]
    pub const fn is_quarantined(&self) -> bool {
        matches!(self.state, PendingState::Quarantined { .. })
    }

    /// Bricks this operation intended to add
    pub fn added_bricks(&self) -> impl Iterator<Item = (&BrickEntry, &str)> {
        self.changes.iter().filter_map(|c| match c {
            PendingChange::AddBrick { brick, host } => Some((brick, host.as_str())),
            _ => None,
        })
    }

    /// Whether this operation is adding an entity under `parent_id`
    #[must_use]
    pub fn adds_child_of(&self, parent_id: &str) -> bool {
        self.changes
            .iter()
            .any(|c| c.parent_id() == Some(parent_id))
    }

    /// Bricks this operation intended to delete
    pub fn deleted_bricks(&self) -> impl Iterator<Item = (&BrickEntry, &str)> {
        self.changes.iter().filter_map(|c| match c {
            PendingChange::DeleteBrick { brick, host } => Some((brick, host.as_str())),
            _ => None,
        })
    }
}

impl Entry for PendingOperationEntry {
    const KIND: &'static str = "pending operation";
    const TABLE: EntryTable = tables::PENDING_OPERATIONS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Handle returned by [`begin`] and consumed by [`commit`] or [`rollback`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMarker {
    pub op_id: String,
    pub action: PendingAction,
    pub targets: Vec<String>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Record a pending operation over `targets`.
///
/// Fails with `Conflict` without waiting if any target already carries a
/// marker, whatever its action.
pub fn begin(
    tx: &mut WriteTx,
    action: PendingAction,
    targets: Vec<String>,
    changes: Vec<PendingChange>,
) -> StoreResult<PendingMarker> {
    for target in &targets {
        if let Some(holder) = tx.marker_for(target)? {
            return Err(StoreError::Conflict(format!(
                "{target} is the target of pending operation {holder}"
            )));
        }
    }

    let entry = PendingOperationEntry {
        id: new_id(),
        action,
        targets,
        changes,
        created_at: now_secs(),
        state: PendingState::Active,
    };
    for target in &entry.targets {
        tx.set_marker(target, &entry.id)?;
    }
    tx.save(&entry)?;

    Ok(PendingMarker {
        op_id: entry.id,
        action: entry.action,
        targets: entry.targets,
    })
}

fn remove(tx: &mut WriteTx, op_id: &str) -> StoreResult<PendingOperationEntry> {
    let entry: PendingOperationEntry = tx.load(op_id)?;
    for target in &entry.targets {
        tx.clear_marker(target, op_id)?;
    }
    tx.delete::<PendingOperationEntry>(op_id)?;
    Ok(entry)
}

/// Clear the marker as part of the transaction persisting the final state
pub fn commit(tx: &mut WriteTx, marker: &PendingMarker) -> StoreResult<()> {
    remove(tx, &marker.op_id)?;
    Ok(())
}

/// Clear the marker without the guarded mutation having happened
pub fn rollback(tx: &mut WriteTx, marker: &PendingMarker) -> StoreResult<()> {
    remove(tx, &marker.op_id)?;
    warn!(
        "Rolled back pending operation {} ({})",
        marker.op_id, marker.action
    );
    Ok(())
}

/// Remove a record by id; used by the recovery pass after reconciling
pub fn resolve(tx: &mut WriteTx, op_id: &str) -> StoreResult<PendingOperationEntry> {
    remove(tx, op_id)
}

/// Keep the marker but flag the operation for manual attention
pub fn quarantine(tx: &mut WriteTx, op_id: &str, reason: &str) -> StoreResult<()> {
    let mut entry: PendingOperationEntry = tx.load(op_id)?;
    entry.state = PendingState::Quarantined {
        reason: reason.to_string(),
    };
    tx.save(&entry)?;
    info!("Quarantined pending operation {}: {}", op_id, reason);
    Ok(())
}

/// Every pending operation record
pub fn list<R: EntryReader>(tx: &R) -> StoreResult<Vec<PendingOperationEntry>> {
    tx.load_all::<PendingOperationEntry>()
}

impl PendingMarker {
    /// Rebuild a marker for a stored record
    #[must_use]
    pub fn from_entry(entry: &PendingOperationEntry) -> Self {
        Self {
            op_id: entry.id.clone(),
            action: entry.action,
            targets: entry.targets.clone(),
        }
    }
}
