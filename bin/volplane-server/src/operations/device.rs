//! Device operations: turning raw block devices into brick capacity.

use super::{PendingGuard, ensure_no_pending_children, ensure_not_pending, manage_host};
use crate::app::App;
use tracing::info;
use volplane_common::api::{DeviceAddRequest, DeviceInfo};
use volplane_common::{Error, Result, StorageSize};
use volplane_store::entries::remove_id;
use volplane_store::pending::{PendingAction, PendingChange};
use volplane_store::{DeviceEntry, EntryReader, NodeEntry, WriteTx};

#[must_use]
pub fn to_info(device: DeviceEntry) -> DeviceInfo {
    DeviceInfo {
        id: device.id,
        node: device.node_id,
        name: device.name,
        storage: device.storage,
        state: device.state,
        bricks: device.bricks,
    }
}

pub fn info(app: &App, id: &str) -> Result<DeviceEntry> {
    app.store.view(|tx| -> Result<DeviceEntry> { Ok(tx.load(id)?) })
}

/// Validate a device add request and build the device entry
pub fn prepare_add(app: &App, request: &DeviceAddRequest) -> Result<DeviceEntry> {
    if !request.name.starts_with('/') {
        return Err(Error::validation(format!(
            "device name must be an absolute path: {:?}",
            request.name
        )));
    }
    let device = DeviceEntry::new(&request.node, &request.name);
    app.store.view(|tx| -> Result<()> {
        let _node: NodeEntry = tx.load(&request.node)?;
        if let Some(owner) = tx.registration(&device.registration_key())? {
            return Err(Error::conflict(format!(
                "device {} on node {} already exists as {owner}",
                request.name, request.node
            )));
        }
        Ok(())
    })?;
    Ok(device)
}

/// Create the volume group on the node and record the device's capacity
pub async fn add(app: &App, mut device: DeviceEntry) -> Result<DeviceEntry> {
    let host = app
        .store
        .view(|tx| manage_host(tx, &device.node_id))?;
    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::AddDevice,
        vec![device.id.clone()],
        vec![PendingChange::AddDevice {
            device: device.clone(),
            host: host.clone(),
        }],
    )?;

    let info = app
        .executor
        .device_setup(&host, &device.name, &device.vg_name())
        .await?;
    device.storage = StorageSize::new(info.size_kb);
    device.extent_size_kb = info.extent_size_kb;

    guard.commit(|tx| {
        let mut node: NodeEntry = tx.load(&device.node_id)?;
        node.add_device(&device.id);
        tx.save(&node)?;
        tx.save(&device)?;
        Ok(())
    })?;
    info!(
        "Added device {} ({}) on {} with {} KB",
        device.id, device.name, host, device.storage.total
    );
    Ok(device)
}

/// Check that a device can be removed
pub fn prepare_delete(app: &App, id: &str) -> Result<DeviceEntry> {
    app.store.view(|tx| -> Result<DeviceEntry> {
        let device: DeviceEntry = tx.load(id)?;
        ensure_not_pending(tx, id)?;
        ensure_no_pending_children(tx, id)?;
        if !device.bricks.is_empty() {
            return Err(Error::conflict(format!(
                "device {id} still holds {} bricks",
                device.bricks.len()
            )));
        }
        Ok(device)
    })
}

/// Tear down the volume group and remove the device
pub async fn delete(app: &App, device: DeviceEntry) -> Result<()> {
    let host = app
        .store
        .view(|tx| manage_host(tx, &device.node_id))?;
    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::DeleteDevice,
        vec![device.id.clone()],
        vec![PendingChange::DeleteDevice {
            device_id: device.id.clone(),
            host: host.clone(),
        }],
    )?;

    app.executor
        .device_teardown(&host, &device.name, &device.vg_name())
        .await?;

    guard.commit(|tx| persist_deleted(tx, &device.id))?;
    info!("Deleted device {} ({}) on {}", device.id, device.name, host);
    Ok(())
}

fn persist_deleted(tx: &mut WriteTx, device_id: &str) -> Result<()> {
    let device: DeviceEntry = tx.load(device_id)?;
    if !device.bricks.is_empty() {
        return Err(Error::conflict(format!("device {device_id} gained bricks")));
    }
    if let Some(mut node) = tx.try_load::<NodeEntry>(&device.node_id)? {
        remove_id(&mut node.devices, device_id);
        tx.save(&node)?;
    }
    tx.unregister(&device.registration_key())?;
    tx.delete::<DeviceEntry>(device_id)?;
    Ok(())
}
