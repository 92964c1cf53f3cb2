//! Operations on clusters, nodes, devices, volumes and block volumes.
//!
//! Mutating operations are split in two halves. A `prepare_*` function
//! validates the request synchronously against the store and builds the
//! in-memory entity; the async half runs inside a job, takes a pending
//! marker through [`PendingGuard`], drives the storage nodes and commits
//! the outcome together with the marker.

pub mod block_volume;
pub mod cluster;
pub mod device;
pub mod node;
pub mod snapshot;
pub mod volume;

use crate::app::App;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};
use volplane_common::{Error, Result};
use volplane_executor::BrickRequest;
use volplane_store::pending::{self, PendingAction, PendingChange, PendingMarker};
use volplane_store::{
    BlockVolumeEntry, BrickEntry, DeviceEntry, EntryReader, EntryStore, NodeEntry, StoreResult,
    VolumeEntry, WriteTx,
};

/// Take the reservations a pending operation holds while it runs:
/// device space for new bricks, hosting space for new block volumes and
/// uniqueness keys for new names. The parents of new entities must not be
/// pending, and entities being deleted must not be gaining children.
///
/// Expansions are measured against the stored entity, not the copy the
/// request was validated with; the recorded change is corrected in place.
pub(crate) fn reserve(tx: &mut WriteTx, changes: &mut [PendingChange]) -> Result<()> {
    for change in changes.iter_mut() {
        if let Some(parent) = change.parent_id() {
            ensure_not_pending(&*tx, parent)?;
        }
        match change {
            PendingChange::AddVolume(volume) => {
                tx.register(&volume.registration_key(), &volume.id)?;
            }
            PendingChange::AddBrick { brick, .. } => {
                let mut device: DeviceEntry = tx.load(&brick.device_id)?;
                device.storage.allocate(brick.total_size_kb())?;
                tx.save(&device)?;
            }
            PendingChange::AddBlockVolume { block_volume, .. } => {
                let mut hosting: VolumeEntry = tx.load(&block_volume.hosting_volume_id)?;
                let info = &mut hosting.block_info;
                if info.free_size_gb < block_volume.size_gb {
                    return Err(Error::NoSpace(format!(
                        "volume {} has {} GB free for block volumes, {} GB requested",
                        hosting.name, info.free_size_gb, block_volume.size_gb
                    )));
                }
                info.free_size_gb -= block_volume.size_gb;
                info.reserved_size_gb += block_volume.size_gb;
                tx.save(&hosting)?;
            }
            PendingChange::ExpandBlockVolume {
                block_volume_id,
                hosting_volume_id,
                size_gb,
                added_gb,
                ..
            } => {
                ensure_not_pending(&*tx, hosting_volume_id)?;
                let stored: BlockVolumeEntry = tx.load(block_volume_id)?;
                if *size_gb <= stored.size_gb {
                    return Err(Error::validation(format!(
                        "new size {} GB must exceed the current {} GB of block volume {}",
                        size_gb, stored.size_gb, stored.name
                    )));
                }
                *added_gb = *size_gb - stored.size_gb;
                let mut hosting: VolumeEntry = tx.load(hosting_volume_id)?;
                let info = &mut hosting.block_info;
                if info.free_size_gb < *added_gb {
                    return Err(Error::NoSpace(format!(
                        "volume {} has {} GB free for block volumes, {} GB more requested",
                        hosting.name, info.free_size_gb, added_gb
                    )));
                }
                info.free_size_gb -= *added_gb;
                info.reserved_size_gb += *added_gb;
                tx.save(&hosting)?;
            }
            PendingChange::AddSnapshot { snapshot, .. } => {
                tx.register(&snapshot.registration_key(), &snapshot.id)?;
            }
            PendingChange::AddNode(node) => {
                tx.register(&node.manage_key(), &node.id)?;
                tx.register(&node.storage_key(), &node.id)?;
            }
            PendingChange::AddDevice { device, .. } => {
                tx.register(&device.registration_key(), &device.id)?;
            }
            PendingChange::DeleteVolume { volume_id, .. } => {
                ensure_no_pending_children(&*tx, volume_id)?;
                let volume: VolumeEntry = tx.load(volume_id)?;
                let info = &volume.block_info;
                if info.reserved_size_gb > 0 || !info.block_volumes.is_empty() {
                    return Err(Error::conflict(format!(
                        "volume {} still hosts block volumes",
                        volume.name
                    )));
                }
                if !volume.snapshots.is_empty() || !volume.clones.is_empty() {
                    return Err(Error::conflict(format!(
                        "volume {} still has snapshots or clones",
                        volume.name
                    )));
                }
            }
            PendingChange::DeleteNode { node_id } => {
                ensure_no_pending_children(&*tx, node_id)?;
            }
            PendingChange::DeleteDevice { device_id, .. } => {
                ensure_no_pending_children(&*tx, device_id)?;
                let device: DeviceEntry = tx.load(device_id)?;
                if device.storage.used > 0 || !device.bricks.is_empty() {
                    return Err(Error::conflict(format!(
                        "device {device_id} has space allocated to bricks"
                    )));
                }
            }
            PendingChange::ExpandVolume {
                volume_id,
                previous_brick_count,
                ..
            } => {
                let stored: VolumeEntry = tx.load(volume_id)?;
                *previous_brick_count = stored.bricks.len();
            }
            PendingChange::ReplaceBrick {
                volume_id,
                old_brick_id,
                ..
            } => {
                let stored: VolumeEntry = tx.load(volume_id)?;
                if !stored.bricks.iter().any(|b| b == &*old_brick_id) {
                    return Err(Error::conflict(format!(
                        "brick {old_brick_id} is no longer part of volume {}",
                        stored.name
                    )));
                }
            }
            PendingChange::DeleteBrick { .. }
            | PendingChange::DeleteBlockVolume { .. }
            | PendingChange::CloneSnapshot { .. }
            | PendingChange::DeleteSnapshot { .. } => {}
        }
    }
    Ok(())
}

/// Give back what [`reserve`] took. Entities that disappeared meanwhile
/// are skipped.
pub(crate) fn release(tx: &mut WriteTx, changes: &[PendingChange]) -> Result<()> {
    for change in changes {
        match change {
            PendingChange::AddVolume(volume) => {
                unregister_owned(tx, &volume.registration_key(), &volume.id)?;
            }
            PendingChange::AddBrick { brick, .. } => {
                if let Some(mut device) = tx.try_load::<DeviceEntry>(&brick.device_id)? {
                    device.storage.release(brick.total_size_kb());
                    tx.save(&device)?;
                }
            }
            PendingChange::AddBlockVolume { block_volume, .. } => {
                if let Some(mut hosting) =
                    tx.try_load::<VolumeEntry>(&block_volume.hosting_volume_id)?
                {
                    let info = &mut hosting.block_info;
                    info.free_size_gb += block_volume.size_gb;
                    info.reserved_size_gb = info.reserved_size_gb.saturating_sub(block_volume.size_gb);
                    tx.save(&hosting)?;
                }
            }
            PendingChange::ExpandBlockVolume {
                hosting_volume_id,
                added_gb,
                ..
            } => {
                if let Some(mut hosting) = tx.try_load::<VolumeEntry>(hosting_volume_id)? {
                    let info = &mut hosting.block_info;
                    info.free_size_gb += added_gb;
                    info.reserved_size_gb = info.reserved_size_gb.saturating_sub(*added_gb);
                    tx.save(&hosting)?;
                }
            }
            PendingChange::AddSnapshot { snapshot, .. } => {
                unregister_owned(tx, &snapshot.registration_key(), &snapshot.id)?;
            }
            PendingChange::AddNode(node) => {
                unregister_owned(tx, &node.manage_key(), &node.id)?;
                unregister_owned(tx, &node.storage_key(), &node.id)?;
            }
            PendingChange::AddDevice { device, .. } => {
                unregister_owned(tx, &device.registration_key(), &device.id)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn unregister_owned(tx: &mut WriteTx, key: &str, owner: &str) -> StoreResult<()> {
    if tx.registration(key)?.as_deref() == Some(owner) {
        tx.unregister(key)?;
    }
    Ok(())
}

/// Roll a pending operation back in the store: release its reservations
/// and drop its marker
pub(crate) fn rollback_pending(
    store: &EntryStore,
    marker: &PendingMarker,
    changes: &[PendingChange],
) -> Result<()> {
    store.update(|tx| -> Result<()> {
        release(tx, changes)?;
        pending::rollback(tx, marker)?;
        Ok(())
    })
}

/// Pending marker held by a running operation.
///
/// Dropping the guard without committing rolls the marker back, so every
/// early return, error and panic releases it.
pub(crate) struct PendingGuard {
    store: Arc<EntryStore>,
    marker: Option<PendingMarker>,
    changes: Vec<PendingChange>,
}

impl PendingGuard {
    /// Record the operation and take its reservations in one transaction.
    /// Fails with `Conflict` if any target, or the parent of a new entity,
    /// is already pending.
    pub(crate) fn begin(
        store: &Arc<EntryStore>,
        action: PendingAction,
        targets: Vec<String>,
        mut changes: Vec<PendingChange>,
    ) -> Result<Self> {
        // Reservations first: parent checks must not see this operation's
        // own markers
        let marker = store.update(|tx| -> Result<PendingMarker> {
            reserve(tx, &mut changes)?;
            Ok(pending::begin(tx, action, targets, changes.clone())?)
        })?;
        info!("Started pending operation {} ({})", marker.op_id, action);
        Ok(Self {
            store: Arc::clone(store),
            marker: Some(marker),
            changes,
        })
    }

    /// Changes as recorded, after [`reserve`] measured them against the store
    pub(crate) fn changes(&self) -> &[PendingChange] {
        &self.changes
    }

    pub(crate) fn op_id(&self) -> &str {
        self.marker.as_ref().map_or("", |m| m.op_id.as_str())
    }

    /// Persist the final state and clear the marker atomically.
    ///
    /// The remote side has already changed when this runs. If the store
    /// cannot be updated the marker is left for the recovery pass and
    /// `CommitFailed` is returned.
    pub(crate) fn commit<F>(mut self, persist: F) -> Result<()>
    where
        F: FnOnce(&mut WriteTx) -> Result<()>,
    {
        let Some(marker) = self.marker.take() else {
            return Err(Error::internal("pending operation already finished"));
        };
        let result = self.store.update(|tx| -> Result<()> {
            persist(tx)?;
            pending::commit(tx, &marker)?;
            Ok(())
        });
        match result {
            Ok(()) => {
                info!("Committed pending operation {} ({})", marker.op_id, marker.action);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Commit of pending operation {} ({}) failed after remote changes: {}",
                    marker.op_id, marker.action, e
                );
                Err(Error::CommitFailed {
                    operation: marker.op_id,
                    message: e.to_string(),
                })
            }
        }
    }
}

impl PendingGuard {
    /// Give up on an operation whose remote changes went past the point
    /// where rolling back is possible. The marker and its reservations stay
    /// for the recovery pass to finish.
    pub(crate) fn abandon(mut self, cause: &Error) -> Error {
        let Some(marker) = self.marker.take() else {
            return Error::internal("pending operation already finished");
        };
        error!(
            "Pending operation {} ({}) left for recovery: {}",
            marker.op_id, marker.action, cause
        );
        Error::Incomplete {
            operation: marker.op_id,
            message: cause.to_string(),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(marker) = self.marker.take() {
            if let Err(e) = rollback_pending(&self.store, &marker, &self.changes) {
                error!(
                    "Unable to roll back pending operation {}: {}",
                    marker.op_id, e
                );
            }
        }
    }
}

/// Command-level description of a stored brick
pub(crate) fn brick_request(brick: &BrickEntry) -> BrickRequest {
    BrickRequest {
        vg_name: brick.vg_name(),
        lv_name: brick.lv_name(),
        tp_name: brick.tp_name(),
        size_kb: brick.size_kb,
        tp_size_kb: brick.tp_size_kb,
        pool_metadata_size_kb: brick.pool_metadata_size_kb,
        path: brick.path.clone(),
    }
}

/// Create bricks in parallel. If any fails, the ones that were created are
/// destroyed again and the first error is returned.
pub(crate) async fn create_bricks(app: &App, bricks: &[(BrickEntry, String)]) -> Result<()> {
    let results = join_all(bricks.iter().map(|(brick, host)| async move {
        app.executor
            .brick_create(host, &brick_request(brick))
            .await
    }))
    .await;

    let mut first_error = None;
    let mut created = Vec::new();
    for (result, brick) in results.into_iter().zip(bricks) {
        match result {
            Ok(()) => created.push(brick.clone()),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        None => Ok(()),
        Some(e) => {
            warn!(
                "Brick creation failed, removing {} created bricks: {}",
                created.len(),
                e
            );
            if destroy_bricks(app, &created).await.is_err() {
                warn!("Some bricks could not be removed after a failed create");
            }
            Err(e.into())
        }
    }
}

/// Destroy bricks in parallel. Every failure is logged; the first one is
/// returned.
pub(crate) async fn destroy_bricks(app: &App, bricks: &[(BrickEntry, String)]) -> Result<()> {
    let results = join_all(bricks.iter().map(|(brick, host)| async move {
        app.executor
            .brick_destroy(host, &brick_request(brick))
            .await
            .map_err(|e| (brick.id.clone(), host.clone(), e))
    }))
    .await;

    let mut first_error = None;
    for result in results {
        if let Err((brick, host, e)) = result {
            error!("Unable to destroy brick {} on {}: {}", brick, host, e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    first_error.map_or(Ok(()), |e| Err(e.into()))
}

/// Manage hostname of a node
pub(crate) fn manage_host<R: EntryReader>(tx: &R, node_id: &str) -> Result<String> {
    let node: NodeEntry = tx.load(node_id)?;
    Ok(node.manage_hostname)
}

/// Host to run volume-level commands for `volume`: the node of its first
/// brick, its origin's host for a clone, or any node of its cluster
pub(crate) fn volume_host<R: EntryReader>(tx: &R, volume: &VolumeEntry) -> Result<String> {
    if let Some(brick_id) = volume.bricks.first() {
        let brick: BrickEntry = tx.load(brick_id)?;
        return manage_host(tx, &brick.node_id);
    }
    if let Some(origin_id) = &volume.clone_of {
        if let Some(origin) = tx.try_load::<VolumeEntry>(origin_id)? {
            return volume_host(tx, &origin);
        }
    }
    let cluster: volplane_store::ClusterEntry = tx.load(&volume.cluster_id)?;
    let node_id = cluster
        .nodes
        .first()
        .ok_or_else(|| Error::conflict(format!("cluster {} has no nodes", cluster.id)))?;
    manage_host(tx, node_id)
}

/// Stored bricks of a volume with the manage host of each
pub(crate) fn volume_bricks<R: EntryReader>(
    tx: &R,
    volume: &VolumeEntry,
) -> Result<Vec<(BrickEntry, String)>> {
    volume
        .bricks
        .iter()
        .map(|id| {
            let brick: BrickEntry = tx.load(id)?;
            let host = manage_host(tx, &brick.node_id)?;
            Ok((brick, host))
        })
        .collect()
}

/// Reject ids that are the target of a pending operation
pub(crate) fn ensure_not_pending<R: EntryReader>(tx: &R, id: &str) -> Result<()> {
    if let Some(op) = tx.marker_for(id)? {
        return Err(Error::conflict(format!(
            "{id} is the target of pending operation {op}"
        )));
    }
    Ok(())
}

/// Reject ids that a pending operation is adding an entity under
pub(crate) fn ensure_no_pending_children<R: EntryReader>(tx: &R, id: &str) -> Result<()> {
    if let Some(op) = pending::list(tx)?.iter().find(|op| op.adds_child_of(id)) {
        return Err(Error::conflict(format!(
            "pending operation {} ({}) is adding to {id}",
            op.id, op.action
        )));
    }
    Ok(())
}
