//! Node operations: joining and leaving the trusted storage pool.

use super::{PendingGuard, ensure_no_pending_children, ensure_not_pending};
use crate::app::App;
use tracing::info;
use volplane_common::api::{NodeAddRequest, NodeInfo};
use volplane_common::{Error, Result};
use volplane_store::entries::remove_id;
use volplane_store::pending::{PendingAction, PendingChange};
use volplane_store::{ClusterEntry, EntryReader, NodeEntry, WriteTx};

#[must_use]
pub fn to_info(node: NodeEntry) -> NodeInfo {
    NodeInfo {
        id: node.id,
        cluster: node.cluster_id,
        zone: node.zone,
        manage_hostname: node.manage_hostname,
        storage_hostname: node.storage_hostname,
        state: node.state,
        devices: node.devices,
    }
}

pub fn info(app: &App, id: &str) -> Result<NodeEntry> {
    app.store.view(|tx| -> Result<NodeEntry> { Ok(tx.load(id)?) })
}

/// Validate a node add request and build the node entry
pub fn prepare_add(app: &App, request: &NodeAddRequest) -> Result<NodeEntry> {
    if request.manage_hostname.trim().is_empty() || request.storage_hostname.trim().is_empty() {
        return Err(Error::validation(
            "manage and storage hostnames are required",
        ));
    }
    if request.zone == 0 {
        return Err(Error::validation("zone must be at least 1"));
    }
    let node = NodeEntry::new(
        &request.cluster,
        request.zone,
        &request.manage_hostname,
        &request.storage_hostname,
    );
    app.store.view(|tx| -> Result<()> {
        let _cluster: ClusterEntry = tx.load(&request.cluster)?;
        for key in [node.manage_key(), node.storage_key()] {
            if let Some(owner) = tx.registration(&key)? {
                return Err(Error::conflict(format!(
                    "{key} is already used by node {owner}"
                )));
            }
        }
        Ok(())
    })?;
    Ok(node)
}

/// Any other node of the cluster, used to run pool membership commands
fn peer_host(app: &App, cluster_id: &str, exclude: &str) -> Result<Option<String>> {
    app.store.view(|tx| -> Result<Option<String>> {
        let cluster: ClusterEntry = tx.load(cluster_id)?;
        let Some(id) = cluster.nodes.iter().find(|id| id.as_str() != exclude) else {
            return Ok(None);
        };
        let node: NodeEntry = tx.load(id)?;
        Ok(Some(node.manage_hostname))
    })
}

/// Check the node's glusterd, join it to the trusted pool and persist it
pub async fn add(app: &App, node: NodeEntry) -> Result<NodeEntry> {
    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::AddNode,
        vec![node.id.clone()],
        vec![PendingChange::AddNode(node.clone())],
    )?;

    app.executor.glusterd_check(&node.manage_hostname).await?;
    if let Some(peer) = peer_host(app, &node.cluster_id, &node.id)? {
        app.executor
            .peer_attach(&peer, &node.storage_hostname)
            .await?;
    }

    guard.commit(|tx| {
        let mut cluster: ClusterEntry = tx.load(&node.cluster_id)?;
        cluster.add_node(&node.id);
        tx.save(&cluster)?;
        tx.save(&node)?;
        Ok(())
    })?;
    info!(
        "Added node {} ({}) to cluster {}",
        node.id, node.manage_hostname, node.cluster_id
    );
    Ok(node)
}

/// Check that a node can be removed
pub fn prepare_delete(app: &App, id: &str) -> Result<NodeEntry> {
    app.store.view(|tx| -> Result<NodeEntry> {
        let node: NodeEntry = tx.load(id)?;
        ensure_not_pending(tx, id)?;
        ensure_no_pending_children(tx, id)?;
        if !node.devices.is_empty() {
            return Err(Error::conflict(format!(
                "node {id} still has {} devices",
                node.devices.len()
            )));
        }
        Ok(node)
    })
}

/// Detach the node from the pool and remove it
pub async fn delete(app: &App, node: NodeEntry) -> Result<()> {
    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::DeleteNode,
        vec![node.id.clone()],
        vec![PendingChange::DeleteNode {
            node_id: node.id.clone(),
        }],
    )?;

    if let Some(peer) = peer_host(app, &node.cluster_id, &node.id)? {
        app.executor
            .peer_detach(&peer, &node.storage_hostname)
            .await?;
    }

    guard.commit(|tx| persist_deleted(tx, &node.id))?;
    info!("Deleted node {} ({})", node.id, node.manage_hostname);
    Ok(())
}

/// Remove a node and its references from the store
fn persist_deleted(tx: &mut WriteTx, node_id: &str) -> Result<()> {
    let node: NodeEntry = tx.load(node_id)?;
    if !node.devices.is_empty() {
        return Err(Error::conflict(format!("node {node_id} gained devices")));
    }
    if let Some(mut cluster) = tx.try_load::<ClusterEntry>(&node.cluster_id)? {
        remove_id(&mut cluster.nodes, node_id);
        tx.save(&cluster)?;
    }
    tx.unregister(&node.manage_key())?;
    tx.unregister(&node.storage_key())?;
    tx.delete::<NodeEntry>(node_id)?;
    Ok(())
}
