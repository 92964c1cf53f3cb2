//! Startup reconciliation of pending operations.
//!
//! Every pending record found at startup belongs to a process that is
//! gone. Each one is reconciled against the storage nodes according to its
//! action: completed, rolled back, or quarantined for an operator. Remote
//! errors during reconciliation quarantine the record; quarantined records
//! are never cleared automatically and are reported on every start.

use crate::app::App;
use crate::operations::{block_volume, brick_request, release, snapshot, volume, volume_host};
use tracing::{error, info, warn};
use volplane_common::{Error, Result};
use volplane_store::pending::{
    self, PendingAction, PendingChange, PendingOperationEntry, PendingState,
};
use volplane_executor::BrickLocation;
use volplane_store::{
    BlockVolumeEntry, BrickEntry, EntryReader, NodeEntry, SnapshotEntry, VolumeEntry,
};

/// What one recovery pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub completed: Vec<String>,
    pub rolled_back: Vec<String>,
    pub quarantined: Vec<String>,
}

enum Outcome {
    Completed,
    RolledBack,
    Quarantine(String),
}

/// Reconcile every pending operation in the store
pub async fn recover(app: &App) -> Result<RecoveryReport> {
    let operations = app
        .store
        .view(|tx| -> Result<Vec<PendingOperationEntry>> { Ok(pending::list(tx)?) })?;
    let mut report = RecoveryReport::default();

    for op in operations {
        if let PendingState::Quarantined { reason } = &op.state {
            warn!(
                "Pending operation {} ({}) on {:?} is quarantined: {}",
                op.id, op.action, op.targets, reason
            );
            report.quarantined.push(op.id.clone());
            continue;
        }

        info!(
            "Reconciling pending operation {} ({}) on {:?}",
            op.id, op.action, op.targets
        );
        let outcome = match reconcile(app, &op).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Quarantine(format!("reconciliation failed: {e}")),
        };
        match outcome {
            Outcome::Completed => {
                info!("Completed pending operation {} ({})", op.id, op.action);
                report.completed.push(op.id);
            }
            Outcome::RolledBack => {
                info!("Rolled back pending operation {} ({})", op.id, op.action);
                report.rolled_back.push(op.id);
            }
            Outcome::Quarantine(reason) => {
                app.store
                    .update(|tx| -> Result<()> { Ok(pending::quarantine(tx, &op.id, &reason)?) })?;
                error!(
                    "Quarantined pending operation {} ({}): {}",
                    op.id, op.action, reason
                );
                report.quarantined.push(op.id);
            }
        }
    }

    if !report.quarantined.is_empty() {
        warn!(
            "{} pending operations need manual reconciliation",
            report.quarantined.len()
        );
    }
    Ok(report)
}

async fn reconcile(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    match op.action {
        PendingAction::CreateVolume => rollback_create_volume(app, op).await,
        PendingAction::ExpandVolume => reconcile_expand_volume(app, op).await,
        PendingAction::DeleteVolume => finish_delete_volume(app, op).await,
        PendingAction::ReplaceBrick => reconcile_replace_brick(app, op).await,
        PendingAction::CreateBlockVolume => rollback_create_block_volume(app, op).await,
        PendingAction::ExpandBlockVolume => finish_expand_block_volume(app, op).await,
        PendingAction::DeleteBlockVolume => finish_delete_block_volume(app, op).await,
        PendingAction::CreateSnapshot => rollback_create_snapshot(app, op).await,
        PendingAction::CloneSnapshot => rollback_clone_snapshot(app, op).await,
        PendingAction::DeleteSnapshot => finish_delete_snapshot(app, op).await,
        PendingAction::AddDevice => rollback_add_device(app, op).await,
        PendingAction::AddNode | PendingAction::DeleteNode | PendingAction::DeleteDevice => Ok(
            Outcome::Quarantine(format!("{} requires manual reconciliation", op.action)),
        ),
    }
}

/// Release the record's reservations and drop it
fn drop_record(app: &App, op: &PendingOperationEntry) -> Result<()> {
    app.store.update(|tx| -> Result<()> {
        release(tx, &op.changes)?;
        pending::resolve(tx, &op.id)?;
        Ok(())
    })
}

fn added_bricks(op: &PendingOperationEntry) -> Vec<(BrickEntry, String)> {
    op.added_bricks()
        .map(|(brick, host)| (brick.clone(), host.to_string()))
        .collect()
}

/// Destroy bricks one by one; any failure aborts reconciliation
async fn destroy_bricks_strict(app: &App, bricks: &[(BrickEntry, String)]) -> Result<()> {
    for (brick, host) in bricks {
        app.executor
            .brick_destroy(host, &brick_request(brick))
            .await?;
    }
    Ok(())
}

async fn rollback_create_volume(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let volume = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::AddVolume(volume) => Some(volume),
            _ => None,
        })
        .ok_or_else(|| Error::internal("create-volume record without a volume"))?;
    let bricks = added_bricks(op);

    if let Some((_, host)) = bricks.first() {
        if app.executor.volume_exists(host, &volume.name).await? {
            info!("Destroying volume {} left by operation {}", volume.name, op.id);
            app.executor.volume_destroy(host, &volume.name).await?;
        }
    }
    destroy_bricks_strict(app, &bricks).await?;
    drop_record(app, op)?;
    Ok(Outcome::RolledBack)
}

async fn reconcile_expand_volume(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (volume_id, previous, size_gb) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::ExpandVolume {
                volume_id,
                previous_brick_count,
                size_gb,
            } => Some((volume_id.clone(), *previous_brick_count, *size_gb)),
            _ => None,
        })
        .ok_or_else(|| Error::internal("expand-volume record without a volume"))?;
    let bricks = added_bricks(op);

    let (volume, host) = app.store.view(|tx| -> Result<(VolumeEntry, String)> {
        let volume: VolumeEntry = tx.load(&volume_id)?;
        let host = volume_host(tx, &volume)?;
        Ok((volume, host))
    })?;
    let remote = app.executor.volume_info(&host, &volume.name).await?;

    if remote.brick_count == previous + bricks.len() {
        app.store.update(|tx| -> Result<()> {
            volume::persist_expanded(tx, &volume_id, &bricks, size_gb)?;
            pending::resolve(tx, &op.id)?;
            Ok(())
        })?;
        Ok(Outcome::Completed)
    } else if remote.brick_count == previous {
        destroy_bricks_strict(app, &bricks).await?;
        drop_record(app, op)?;
        Ok(Outcome::RolledBack)
    } else {
        Ok(Outcome::Quarantine(format!(
            "volume {} has {} bricks, expected {} or {}",
            volume.name,
            remote.brick_count,
            previous,
            previous + bricks.len()
        )))
    }
}

async fn finish_delete_volume(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (volume_id, host) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::DeleteVolume { volume_id, host } => {
                Some((volume_id.clone(), host.clone()))
            }
            _ => None,
        })
        .ok_or_else(|| Error::internal("delete-volume record without a volume"))?;
    let bricks: Vec<(BrickEntry, String)> = op
        .deleted_bricks()
        .map(|(brick, host)| (brick.clone(), host.to_string()))
        .collect();

    let volume = app
        .store
        .view(|tx| -> Result<Option<VolumeEntry>> { Ok(tx.try_load(&volume_id)?) })?;
    if let Some(volume) = &volume {
        app.executor.volume_destroy(&host, &volume.name).await?;
    }
    destroy_bricks_strict(app, &bricks).await?;

    app.store.update(|tx| -> Result<()> {
        if volume.is_some() {
            volume::persist_deleted(tx, &volume_id)?;
        }
        pending::resolve(tx, &op.id)?;
        Ok(())
    })?;
    Ok(Outcome::Completed)
}

/// The replacement stands if the volume on the nodes already names the new
/// brick; otherwise the new brick is removed again
async fn reconcile_replace_brick(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (volume_id, old_brick_id, host) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::ReplaceBrick {
                volume_id,
                old_brick_id,
                host,
                ..
            } => Some((volume_id.clone(), old_brick_id.clone(), host.clone())),
            _ => None,
        })
        .ok_or_else(|| Error::internal("replace-brick record without a volume"))?;
    let new_bricks = added_bricks(op);
    let new = new_bricks
        .first()
        .map(|(brick, _)| brick.clone())
        .ok_or_else(|| Error::internal("replace-brick record without a new brick"))?;

    let found = app.store.view(|tx| -> Result<Option<(VolumeEntry, String)>> {
        let Some(volume) = tx.try_load::<VolumeEntry>(&volume_id)? else {
            return Ok(None);
        };
        let node: NodeEntry = tx.load(&new.node_id)?;
        let location = BrickLocation::new(node.storage_hostname, &new.path);
        Ok(Some((volume, location.name())))
    })?;
    let Some((volume, new_name)) = found else {
        destroy_bricks_strict(app, &new_bricks).await?;
        drop_record(app, op)?;
        return Ok(Outcome::RolledBack);
    };

    let remote = app.executor.volume_info(&host, &volume.name).await?;
    if remote.bricks.contains(&new_name) {
        for (brick, brick_host) in op.deleted_bricks() {
            if let Err(e) = app.executor.brick_destroy(brick_host, &brick_request(brick)).await {
                warn!("Old brick {} left on {}: {}", brick.id, brick_host, e);
            }
        }
        app.store.update(|tx| -> Result<()> {
            volume::persist_replaced(tx, &volume_id, &old_brick_id, &new)?;
            pending::resolve(tx, &op.id)?;
            Ok(())
        })?;
        Ok(Outcome::Completed)
    } else {
        destroy_bricks_strict(app, &new_bricks).await?;
        drop_record(app, op)?;
        Ok(Outcome::RolledBack)
    }
}

fn hosting_volume_name(app: &App, block_volume: &BlockVolumeEntry) -> Result<String> {
    app.store.view(|tx| -> Result<String> {
        let hosting: VolumeEntry = tx.load(&block_volume.hosting_volume_id)?;
        Ok(hosting.name)
    })
}

async fn rollback_create_block_volume(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (block_volume, host) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::AddBlockVolume { block_volume, host } => Some((block_volume, host)),
            _ => None,
        })
        .ok_or_else(|| Error::internal("create-block-volume record without a block volume"))?;

    let hosting = hosting_volume_name(app, block_volume)?;
    app.executor
        .block_volume_destroy(host, &hosting, &block_volume.name)
        .await?;
    drop_record(app, op)?;
    Ok(Outcome::RolledBack)
}

/// Block volumes only grow, so an interrupted expansion is finished by
/// repeating the resize
async fn finish_expand_block_volume(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (block_volume_id, host, size_gb, added_gb) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::ExpandBlockVolume {
                block_volume_id,
                host,
                size_gb,
                added_gb,
                ..
            } => Some((block_volume_id.clone(), host.clone(), *size_gb, *added_gb)),
            _ => None,
        })
        .ok_or_else(|| Error::internal("expand-block-volume record without a block volume"))?;

    let Some(block_volume) = app
        .store
        .view(|tx| -> Result<Option<BlockVolumeEntry>> { Ok(tx.try_load(&block_volume_id)?) })?
    else {
        drop_record(app, op)?;
        return Ok(Outcome::RolledBack);
    };
    let hosting = hosting_volume_name(app, &block_volume)?;
    app.executor
        .block_volume_expand(&host, &hosting, &block_volume.name, size_gb)
        .await?;

    app.store.update(|tx| -> Result<()> {
        block_volume::persist_expanded(tx, &block_volume_id, size_gb, added_gb)?;
        pending::resolve(tx, &op.id)?;
        Ok(())
    })?;
    Ok(Outcome::Completed)
}

async fn finish_delete_block_volume(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (block_volume_id, host) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::DeleteBlockVolume {
                block_volume_id,
                host,
            } => Some((block_volume_id.clone(), host.clone())),
            _ => None,
        })
        .ok_or_else(|| Error::internal("delete-block-volume record without a block volume"))?;

    let block_volume = app
        .store
        .view(|tx| -> Result<Option<BlockVolumeEntry>> { Ok(tx.try_load(&block_volume_id)?) })?;
    if let Some(block_volume) = &block_volume {
        let hosting = hosting_volume_name(app, block_volume)?;
        app.executor
            .block_volume_destroy(&host, &hosting, &block_volume.name)
            .await?;
    }

    app.store.update(|tx| -> Result<()> {
        if block_volume.is_some() {
            block_volume::persist_deleted(tx, &block_volume_id)?;
        }
        pending::resolve(tx, &op.id)?;
        Ok(())
    })?;
    Ok(Outcome::Completed)
}

async fn rollback_add_device(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (device, host) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::AddDevice { device, host } => Some((device, host)),
            _ => None,
        })
        .ok_or_else(|| Error::internal("add-device record without a device"))?;

    app.executor
        .device_teardown(host, &device.name, &device.vg_name())
        .await?;
    drop_record(app, op)?;
    Ok(Outcome::RolledBack)
}

async fn rollback_create_snapshot(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (snapshot, host) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::AddSnapshot { snapshot, host } => Some((snapshot, host)),
            _ => None,
        })
        .ok_or_else(|| Error::internal("create-snapshot record without a snapshot"))?;

    if app.executor.snapshot_exists(host, &snapshot.name).await? {
        info!("Deleting snapshot {} left by operation {}", snapshot.name, op.id);
        app.executor.snapshot_destroy(host, &snapshot.name).await?;
    }
    drop_record(app, op)?;
    Ok(Outcome::RolledBack)
}

async fn rollback_clone_snapshot(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let volume = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::AddVolume(volume) => Some(volume),
            _ => None,
        })
        .ok_or_else(|| Error::internal("clone-snapshot record without a volume"))?;
    let (snapshot_name, host) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::CloneSnapshot {
                snapshot_name,
                host,
                ..
            } => Some((snapshot_name, host)),
            _ => None,
        })
        .ok_or_else(|| Error::internal("clone-snapshot record without a snapshot"))?;

    if app.executor.volume_exists(host, &volume.name).await? {
        info!("Destroying clone {} left by operation {}", volume.name, op.id);
        app.executor.volume_destroy(host, &volume.name).await?;
    }
    app.executor.snapshot_deactivate(host, snapshot_name).await?;
    drop_record(app, op)?;
    Ok(Outcome::RolledBack)
}

async fn finish_delete_snapshot(app: &App, op: &PendingOperationEntry) -> Result<Outcome> {
    let (snapshot_id, host) = op
        .changes
        .iter()
        .find_map(|c| match c {
            PendingChange::DeleteSnapshot { snapshot_id, host } => {
                Some((snapshot_id.clone(), host.clone()))
            }
            _ => None,
        })
        .ok_or_else(|| Error::internal("delete-snapshot record without a snapshot"))?;

    let stored = app
        .store
        .view(|tx| -> Result<Option<SnapshotEntry>> { Ok(tx.try_load(&snapshot_id)?) })?;
    if let Some(stored) = &stored {
        app.executor.snapshot_destroy(&host, &stored.name).await?;
    }

    app.store.update(|tx| -> Result<()> {
        if stored.is_some() {
            snapshot::persist_deleted(tx, &snapshot_id)?;
        }
        pending::resolve(tx, &op.id)?;
        Ok(())
    })?;
    Ok(Outcome::Completed)
}
