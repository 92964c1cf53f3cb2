//! Block volume operations.
//!
//! Block volumes are files inside a block-hosting volume exported over
//! iSCSI by `gluster-block`. Creating one picks a hosting volume with
//! enough free capacity, or creates a new hosting volume first.

use super::volume::{self, BLOCK_HOSTING_OPTION, CreateVolume, candidate_clusters};
use super::{PendingGuard, ensure_not_pending, volume_bricks, volume_host};
use crate::app::App;
use tracing::info;
use volplane_common::api::{BlockVolumeCreateRequest, BlockVolumeInfo};
use volplane_common::{DurabilityPolicy, Error, Result};
use volplane_executor::BlockVolumeRequest;
use volplane_store::entries::remove_id;
use volplane_store::pending::{PendingAction, PendingChange};
use volplane_store::{BlockVolumeEntry, ClusterEntry, EntryReader, VolumeEntry, WriteTx};

/// Default number of targets exporting a block volume
const DEFAULT_HA_COUNT: usize = 3;

/// A validated block volume create request
#[derive(Debug, Clone)]
pub struct CreateBlockVolume {
    pub block_volume: BlockVolumeEntry,
    pub clusters: Vec<String>,
}

#[must_use]
pub fn to_info(block_volume: BlockVolumeEntry) -> BlockVolumeInfo {
    BlockVolumeInfo {
        id: block_volume.id,
        name: block_volume.name,
        cluster: block_volume.cluster_id,
        hosting_volume: block_volume.hosting_volume_id,
        size: block_volume.size_gb,
        hacount: block_volume.hacount,
        hosts: block_volume.hosts,
        iqn: block_volume.iqn,
        username: block_volume.username,
        password: block_volume.password,
    }
}

pub fn info(app: &App, id: &str) -> Result<BlockVolumeEntry> {
    app.store
        .view(|tx| -> Result<BlockVolumeEntry> { Ok(tx.load(id)?) })
}

pub fn list(app: &App) -> Result<Vec<String>> {
    app.store
        .view(|tx| -> Result<Vec<String>> { Ok(tx.list::<BlockVolumeEntry>()?) })
}

/// Validate a create request and build the block volume entry
pub fn prepare_create(app: &App, request: &BlockVolumeCreateRequest) -> Result<CreateBlockVolume> {
    if request.size == 0 {
        return Err(Error::validation(
            "block volume size must be greater than zero",
        ));
    }
    let clusters = app
        .store
        .view(|tx| candidate_clusters(tx, &request.clusters, true))?;
    Ok(CreateBlockVolume {
        block_volume: BlockVolumeEntry::new(
            &request.name,
            request.size,
            request.hacount,
            request.auth,
        ),
        clusters,
    })
}

/// First block-hosting volume in `clusters` with `size_gb` free that no
/// operation is working on
fn find_hosting_volume(app: &App, clusters: &[String], size_gb: u64) -> Result<Option<VolumeEntry>> {
    app.store.view(|tx| -> Result<Option<VolumeEntry>> {
        for cluster_id in clusters {
            let cluster: ClusterEntry = tx.load(cluster_id)?;
            for volume_id in &cluster.volumes {
                let volume: VolumeEntry = tx.load(volume_id)?;
                if volume.block
                    && volume.block_info.free_size_gb >= size_gb
                    && tx.marker_for(volume_id)?.is_none()
                {
                    return Ok(Some(volume));
                }
            }
        }
        Ok(None)
    })
}

/// Create a new block-hosting volume sized from the configuration
async fn create_hosting_volume(app: &App, clusters: &[String], size_gb: u64) -> Result<VolumeEntry> {
    let hosting_size = app.config.allocation.block_hosting_volume_size_gb;
    if hosting_size < size_gb {
        return Err(Error::NoSpace(format!(
            "block volume of {size_gb} GB exceeds the {hosting_size} GB hosting volume size"
        )));
    }
    let mut volume = VolumeEntry::new("", "", hosting_size);
    volume.durability = DurabilityPolicy::Replica {
        replica: DurabilityPolicy::DEFAULT_REPLICA,
    };
    volume.block = true;
    volume.block_info.free_size_gb = hosting_size;
    volume.options.push(BLOCK_HOSTING_OPTION.to_string());
    info!("Creating block-hosting volume {} of {} GB", volume.name, hosting_size);
    volume::create(
        app,
        CreateVolume {
            volume,
            clusters: clusters.to_vec(),
        },
    )
    .await
}

/// Storage hosts of a hosting volume, in brick order without duplicates
fn hosting_targets(app: &App, hosting: &VolumeEntry) -> Result<(String, Vec<String>)> {
    app.store.view(|tx| -> Result<(String, Vec<String>)> {
        let exec_host = volume_host(tx, hosting)?;
        let mut hosts: Vec<String> = Vec::new();
        for (brick, _) in volume_bricks(tx, hosting)? {
            let node: volplane_store::NodeEntry = tx.load(&brick.node_id)?;
            if !hosts.contains(&node.storage_hostname) {
                hosts.push(node.storage_hostname);
            }
        }
        Ok((exec_host, hosts))
    })
}

/// Create a block volume and persist it
pub async fn create(app: &App, plan: CreateBlockVolume) -> Result<BlockVolumeEntry> {
    let CreateBlockVolume {
        mut block_volume,
        clusters,
    } = plan;

    let hosting = match find_hosting_volume(app, &clusters, block_volume.size_gb)? {
        Some(volume) => volume,
        None => create_hosting_volume(app, &clusters, block_volume.size_gb).await?,
    };

    let (exec_host, mut hosts) = hosting_targets(app, &hosting)?;
    let hacount = if block_volume.hacount == 0 {
        hosts.len().min(DEFAULT_HA_COUNT)
    } else {
        block_volume.hacount as usize
    };
    if hacount == 0 || hacount > hosts.len() {
        return Err(Error::validation(format!(
            "hacount {hacount} not satisfiable by {} hosts of volume {}",
            hosts.len(),
            hosting.name
        )));
    }
    hosts.truncate(hacount);

    block_volume.cluster_id.clone_from(&hosting.cluster_id);
    block_volume.hosting_volume_id.clone_from(&hosting.id);
    block_volume.hacount = u32::try_from(hacount).unwrap_or(u32::MAX);
    block_volume.hosts.clone_from(&hosts);

    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::CreateBlockVolume,
        vec![block_volume.id.clone()],
        vec![PendingChange::AddBlockVolume {
            block_volume: block_volume.clone(),
            host: exec_host.clone(),
        }],
    )?;

    let request = BlockVolumeRequest {
        name: block_volume.name.clone(),
        hosting_volume: hosting.name.clone(),
        size_gb: block_volume.size_gb,
        hacount: block_volume.hacount,
        block_hosts: hosts,
        auth: block_volume.auth,
    };
    let created = app
        .executor
        .block_volume_create(&exec_host, &request)
        .await?;
    block_volume.iqn = created.iqn;
    block_volume.username = created.username;
    block_volume.password = created.password;

    guard.commit(|tx| persist_created(tx, &block_volume))?;
    info!(
        "Created block volume {} ({} GB) on volume {}",
        block_volume.name, block_volume.size_gb, hosting.name
    );
    Ok(block_volume)
}

fn persist_created(tx: &mut WriteTx, block_volume: &BlockVolumeEntry) -> Result<()> {
    let mut hosting: VolumeEntry = tx.load(&block_volume.hosting_volume_id)?;
    let info = &mut hosting.block_info;
    info.reserved_size_gb = info.reserved_size_gb.saturating_sub(block_volume.size_gb);
    if !info.block_volumes.contains(&block_volume.id) {
        info.block_volumes.push(block_volume.id.clone());
    }
    tx.save(&hosting)?;
    let mut cluster: ClusterEntry = tx.load(&block_volume.cluster_id)?;
    cluster.add_block_volume(&block_volume.id);
    tx.save(&cluster)?;
    tx.save(block_volume)?;
    Ok(())
}

/// Check that a block volume can grow to `new_size_gb`
pub fn prepare_expand(app: &App, id: &str, new_size_gb: u64) -> Result<BlockVolumeEntry> {
    app.store.view(|tx| -> Result<BlockVolumeEntry> {
        let block_volume: BlockVolumeEntry = tx.load(id)?;
        ensure_not_pending(tx, id)?;
        if new_size_gb <= block_volume.size_gb {
            return Err(Error::validation(format!(
                "new size {new_size_gb} GB must exceed the current {} GB of block volume {}",
                block_volume.size_gb, block_volume.name
            )));
        }
        Ok(block_volume)
    })
}

/// Grow a block volume inside its hosting volume
pub async fn expand(
    app: &App,
    mut block_volume: BlockVolumeEntry,
    new_size_gb: u64,
) -> Result<BlockVolumeEntry> {
    let (hosting, exec_host) = app.store.view(|tx| -> Result<(VolumeEntry, String)> {
        let hosting: VolumeEntry = tx.load(&block_volume.hosting_volume_id)?;
        let host = volume_host(tx, &hosting)?;
        Ok((hosting, host))
    })?;
    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::ExpandBlockVolume,
        vec![block_volume.id.clone()],
        vec![PendingChange::ExpandBlockVolume {
            block_volume_id: block_volume.id.clone(),
            hosting_volume_id: hosting.id.clone(),
            host: exec_host.clone(),
            size_gb: new_size_gb,
            added_gb: 0,
        }],
    )?;
    // Growth as measured against the stored size when the marker was taken
    let added_gb = guard
        .changes()
        .iter()
        .find_map(|c| match c {
            PendingChange::ExpandBlockVolume { added_gb, .. } => Some(*added_gb),
            _ => None,
        })
        .unwrap_or_default();
    let previous_size_gb = new_size_gb - added_gb;

    app.executor
        .block_volume_expand(&exec_host, &hosting.name, &block_volume.name, new_size_gb)
        .await?;

    guard.commit(|tx| persist_expanded(tx, &block_volume.id, new_size_gb, added_gb))?;
    info!(
        "Expanded block volume {} from {} GB to {} GB",
        block_volume.name, previous_size_gb, new_size_gb
    );
    block_volume.size_gb = new_size_gb;
    Ok(block_volume)
}

/// Record the new size, turning the reserved hosting space into used space
pub(crate) fn persist_expanded(
    tx: &mut WriteTx,
    block_volume_id: &str,
    size_gb: u64,
    added_gb: u64,
) -> Result<()> {
    let mut block_volume: BlockVolumeEntry = tx.load(block_volume_id)?;
    let mut hosting: VolumeEntry = tx.load(&block_volume.hosting_volume_id)?;
    let info = &mut hosting.block_info;
    info.reserved_size_gb = info.reserved_size_gb.saturating_sub(added_gb);
    tx.save(&hosting)?;
    block_volume.size_gb = size_gb;
    tx.save(&block_volume)?;
    Ok(())
}

/// Check that a block volume can be deleted
pub fn prepare_delete(app: &App, id: &str) -> Result<BlockVolumeEntry> {
    app.store.view(|tx| -> Result<BlockVolumeEntry> {
        let block_volume: BlockVolumeEntry = tx.load(id)?;
        ensure_not_pending(tx, id)?;
        Ok(block_volume)
    })
}

/// Delete a block volume and return its space to the hosting volume
pub async fn delete(app: &App, block_volume: BlockVolumeEntry) -> Result<()> {
    let (hosting, exec_host) = app.store.view(|tx| -> Result<(VolumeEntry, String)> {
        let hosting: VolumeEntry = tx.load(&block_volume.hosting_volume_id)?;
        let host = volume_host(tx, &hosting)?;
        Ok((hosting, host))
    })?;
    let guard = PendingGuard::begin(
        &app.store,
        PendingAction::DeleteBlockVolume,
        vec![block_volume.id.clone()],
        vec![PendingChange::DeleteBlockVolume {
            block_volume_id: block_volume.id.clone(),
            host: exec_host.clone(),
        }],
    )?;

    app.executor
        .block_volume_destroy(&exec_host, &hosting.name, &block_volume.name)
        .await?;

    guard.commit(|tx| persist_deleted(tx, &block_volume.id))?;
    info!(
        "Deleted block volume {} from volume {}",
        block_volume.name, hosting.name
    );
    Ok(())
}

/// Remove a block volume from the store, returning its space to the
/// hosting volume
pub(crate) fn persist_deleted(tx: &mut WriteTx, block_volume_id: &str) -> Result<()> {
    let block_volume: BlockVolumeEntry = tx.load(block_volume_id)?;
    if let Some(mut hosting) = tx.try_load::<VolumeEntry>(&block_volume.hosting_volume_id)? {
        if remove_id(&mut hosting.block_info.block_volumes, block_volume_id) {
            hosting.block_info.free_size_gb += block_volume.size_gb;
        }
        tx.save(&hosting)?;
    }
    if let Some(mut cluster) = tx.try_load::<ClusterEntry>(&block_volume.cluster_id)? {
        remove_id(&mut cluster.block_volumes, block_volume_id);
        tx.save(&cluster)?;
    }
    tx.delete::<BlockVolumeEntry>(block_volume_id)?;
    Ok(())
}
