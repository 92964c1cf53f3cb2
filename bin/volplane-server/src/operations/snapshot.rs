//! Volume snapshot operations.
//!
//! Snapshots are taken on the node that manages the origin volume. A
//! clone turns a snapshot into a new writable volume that shares the
//! origin's thin pools, so the clone owns no brick records and the origin
//! cannot be deleted while clones or snapshots of it exist.

use super::{PendingGuard, ensure_not_pending, volume_host};
use crate::app::App;
use tracing::info;
use volplane_common::api::{SnapshotCloneRequest, SnapshotCreateRequest, SnapshotInfo};
use volplane_common::{Error, Result};
use volplane_store::entries::remove_id;
use volplane_store::pending::{PendingAction, PendingChange};
use volplane_store::{ClusterEntry, EntryReader, SnapshotEntry, VolumeEntry, WriteTx};

/// A validated clone request
#[derive(Debug, Clone)]
pub struct CloneSnapshot {
    pub snapshot: SnapshotEntry,
    pub volume: VolumeEntry,
}

#[must_use]
pub fn to_info(snapshot: SnapshotEntry) -> SnapshotInfo {
    SnapshotInfo {
        id: snapshot.id,
        name: snapshot.name,
        description: snapshot.description,
        volume: snapshot.volume_id,
        cluster: snapshot.cluster_id,
    }
}

pub fn info(app: &App, id: &str) -> Result<SnapshotEntry> {
    app.store
        .view(|tx| -> Result<SnapshotEntry> { Ok(tx.load(id)?) })
}

pub fn list(app: &App) -> Result<Vec<String>> {
    app.store
        .view(|tx| -> Result<Vec<String>> { Ok(tx.list::<SnapshotEntry>()?) })
}

/// Gluster names are single shell words
fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(Error::validation(format!(
            "{kind} name {name:?} must not contain whitespace or '/'"
        )));
    }
    Ok(())
}

/// Validate a snapshot request and build the snapshot entry
pub fn prepare_create(
    app: &App,
    volume_id: &str,
    request: &SnapshotCreateRequest,
) -> Result<SnapshotEntry> {
    validate_name("snapshot", &request.name)?;
    if request.description.contains(['\n', '\r']) {
        return Err(Error::validation(
            "snapshot description must be a single line",
        ));
    }
    app.store.view(|tx| -> Result<SnapshotEntry> {
        let volume: VolumeEntry = tx.load(volume_id)?;
        ensure_not_pending(tx, volume_id)?;
        let snapshot = SnapshotEntry::new(&request.name, &volume, &request.description);
        if let Some(owner) = tx.registration(&snapshot.registration_key())? {
            return Err(Error::conflict(format!(
                "snapshot name {} is already used by {owner}",
                snapshot.name
            )));
        }
        Ok(snapshot)
    })
}

/// Take a snapshot of its volume and persist it
pub async fn create(app: &App, snapshot: SnapshotEntry) -> Result<SnapshotEntry> {
    let (volume, host) = app.store.view(|tx| -> Result<(VolumeEntry, String)> {
        let volume: VolumeEntry = tx.load(&snapshot.volume_id)?;
        let host = volume_host(tx, &volume)?;
        Ok((volume, host))
    })?;

    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::CreateSnapshot,
        vec![snapshot.id.clone(), volume.id.clone()],
        vec![PendingChange::AddSnapshot {
            snapshot: snapshot.clone(),
            host: host.clone(),
        }],
    )?;

    app.executor
        .snapshot_create(&host, &volume.name, &snapshot.name, &snapshot.description)
        .await?;

    guard.commit(|tx| persist_created(tx, &snapshot))?;
    info!("Created snapshot {} of volume {}", snapshot.name, volume.name);
    Ok(snapshot)
}

pub(crate) fn persist_created(tx: &mut WriteTx, snapshot: &SnapshotEntry) -> Result<()> {
    let mut volume: VolumeEntry = tx.load(&snapshot.volume_id)?;
    volume.add_snapshot(&snapshot.id);
    tx.save(&volume)?;
    tx.save(snapshot)?;
    Ok(())
}

/// Check that a snapshot can be deleted
pub fn prepare_delete(app: &App, id: &str) -> Result<SnapshotEntry> {
    app.store.view(|tx| -> Result<SnapshotEntry> {
        let snapshot: SnapshotEntry = tx.load(id)?;
        ensure_not_pending(tx, id)?;
        Ok(snapshot)
    })
}

/// Delete a snapshot from the nodes and the store
pub async fn delete(app: &App, snapshot: SnapshotEntry) -> Result<()> {
    let host = app.store.view(|tx| -> Result<String> {
        let volume: VolumeEntry = tx.load(&snapshot.volume_id)?;
        volume_host(tx, &volume)
    })?;
    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::DeleteSnapshot,
        vec![snapshot.id.clone()],
        vec![PendingChange::DeleteSnapshot {
            snapshot_id: snapshot.id.clone(),
            host: host.clone(),
        }],
    )?;

    app.executor.snapshot_destroy(&host, &snapshot.name).await?;

    guard.commit(|tx| persist_deleted(tx, &snapshot.id))?;
    info!("Deleted snapshot {}", snapshot.name);
    Ok(())
}

pub(crate) fn persist_deleted(tx: &mut WriteTx, snapshot_id: &str) -> Result<()> {
    let snapshot: SnapshotEntry = tx.load(snapshot_id)?;
    if let Some(mut volume) = tx.try_load::<VolumeEntry>(&snapshot.volume_id)? {
        remove_id(&mut volume.snapshots, snapshot_id);
        tx.save(&volume)?;
    }
    let key = snapshot.registration_key();
    if tx.registration(&key)?.as_deref() == Some(snapshot_id) {
        tx.unregister(&key)?;
    }
    tx.delete::<SnapshotEntry>(snapshot_id)?;
    Ok(())
}

/// Validate a clone request and build the entry of the new volume
pub fn prepare_clone(
    app: &App,
    snapshot_id: &str,
    request: &SnapshotCloneRequest,
) -> Result<CloneSnapshot> {
    validate_name("volume", &request.name)?;
    app.store.view(|tx| -> Result<CloneSnapshot> {
        let snapshot: SnapshotEntry = tx.load(snapshot_id)?;
        ensure_not_pending(tx, snapshot_id)?;
        let origin: VolumeEntry = tx.load(&snapshot.volume_id)?;

        let mut volume = VolumeEntry::new(&request.name, &origin.cluster_id, origin.size_gb);
        volume.durability = origin.durability;
        volume.options.clone_from(&origin.options);
        volume.clone_of = Some(origin.id);
        if let Some(owner) = tx.registration(&volume.registration_key())? {
            return Err(Error::conflict(format!(
                "volume name {} is already used by {owner}",
                volume.name
            )));
        }
        Ok(CloneSnapshot { snapshot, volume })
    })
}

/// Clone a snapshot into a new started volume and persist it
pub async fn clone(app: &App, plan: CloneSnapshot) -> Result<VolumeEntry> {
    let CloneSnapshot { snapshot, volume } = plan;
    let host = app.store.view(|tx| volume_host(tx, &volume))?;

    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::CloneSnapshot,
        vec![volume.id.clone(), snapshot.id.clone()],
        vec![
            PendingChange::AddVolume(volume.clone()),
            PendingChange::CloneSnapshot {
                snapshot_id: snapshot.id.clone(),
                snapshot_name: snapshot.name.clone(),
                host: host.clone(),
            },
        ],
    )?;

    app.executor
        .snapshot_clone(&host, &snapshot.name, &volume.name)
        .await?;

    guard.commit(|tx| persist_cloned(tx, &volume))?;
    info!("Cloned snapshot {} into volume {}", snapshot.name, volume.name);
    Ok(volume)
}

pub(crate) fn persist_cloned(tx: &mut WriteTx, volume: &VolumeEntry) -> Result<()> {
    let mut cluster: ClusterEntry = tx.load(&volume.cluster_id)?;
    cluster.add_volume(&volume.id);
    tx.save(&cluster)?;
    if let Some(origin_id) = &volume.clone_of {
        if let Some(mut origin) = tx.try_load::<VolumeEntry>(origin_id)? {
            origin.add_clone(&volume.id);
            tx.save(&origin)?;
        }
    }
    tx.save(volume)?;
    Ok(())
}
