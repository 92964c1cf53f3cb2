//! Cluster operations. Clusters only exist in the store, so every
//! operation here is synchronous.

use super::{ensure_no_pending_children, ensure_not_pending};
use crate::app::App;
use tracing::info;
use volplane_common::api::{ClusterCreateRequest, ClusterInfo};
use volplane_common::{Error, Result};
use volplane_store::{ClusterEntry, EntryReader};

#[must_use]
pub fn to_info(cluster: ClusterEntry) -> ClusterInfo {
    ClusterInfo {
        id: cluster.id,
        file: cluster.file,
        block: cluster.block,
        nodes: cluster.nodes,
        volumes: cluster.volumes,
        block_volumes: cluster.block_volumes,
    }
}

pub fn create(app: &App, request: &ClusterCreateRequest) -> Result<ClusterEntry> {
    if !request.file && !request.block {
        return Err(Error::validation(
            "cluster must allow file volumes, block volumes or both",
        ));
    }
    let cluster = ClusterEntry::new(request.file, request.block);
    app.store.update(|tx| -> Result<()> {
        tx.save(&cluster)?;
        Ok(())
    })?;
    info!("Created cluster {}", cluster.id);
    Ok(cluster)
}

pub fn info(app: &App, id: &str) -> Result<ClusterEntry> {
    app.store.view(|tx| -> Result<ClusterEntry> { Ok(tx.load(id)?) })
}

pub fn list(app: &App) -> Result<Vec<String>> {
    app.store
        .view(|tx| -> Result<Vec<String>> { Ok(tx.list::<ClusterEntry>()?) })
}

/// Remove an empty cluster
pub fn delete(app: &App, id: &str) -> Result<()> {
    app.store.update(|tx| -> Result<()> {
        let cluster: ClusterEntry = tx.load(id)?;
        ensure_not_pending(&*tx, id)?;
        ensure_no_pending_children(&*tx, id)?;
        if !cluster.is_empty() {
            return Err(Error::conflict(format!(
                "cluster {id} still has nodes or volumes"
            )));
        }
        tx.delete::<ClusterEntry>(id)?;
        Ok(())
    })?;
    info!("Deleted cluster {}", id);
    Ok(())
}
