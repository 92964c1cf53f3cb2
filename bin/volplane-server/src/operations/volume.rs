//! Volume operations.
//!
//! A volume is created by placing its bricks, reserving device space under
//! a pending marker, creating the bricks and the gluster volume on the
//! nodes, and finally persisting everything in the transaction that clears
//! the marker.

use super::{
    PendingGuard, create_bricks, destroy_bricks, ensure_not_pending, volume_bricks, volume_host,
};
use crate::allocator::DeviceCandidate;
use crate::app::App;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use volplane_common::api::{BrickHealInfo, BrickInfo, HealInfo, VolumeCreateRequest, VolumeInfo};
use volplane_common::{DurabilityPolicy, EntryState, Error, KB_PER_GB, Result};
use volplane_executor::{BrickLocation, VolumeRequest};
use volplane_store::entries::{brick_footprint_kb, remove_id};
use volplane_store::pending::{PendingAction, PendingChange};
use volplane_store::{
    BrickEntry, ClusterEntry, DeviceEntry, EntryReader, NodeEntry, ReadTx, VolumeEntry, WriteTx,
};

/// Option applied to volumes that host block volumes
pub const BLOCK_HOSTING_OPTION: &str = "group gluster-block";

/// A validated volume create request
#[derive(Debug, Clone)]
pub struct CreateVolume {
    pub volume: VolumeEntry,
    /// Clusters to try, in order
    pub clusters: Vec<String>,
}

/// A brick chosen for a volume together with its node
type PlacedBrick = (BrickEntry, NodeEntry);

/// Storage hostname clients mount `volume` from. Clones without bricks of
/// their own are served by their origin's nodes.
fn mount_host<R: EntryReader>(tx: &R, volume: &VolumeEntry) -> Result<Option<String>> {
    if let Some(brick_id) = volume.bricks.first() {
        let brick: BrickEntry = tx.load(brick_id)?;
        let node: NodeEntry = tx.load(&brick.node_id)?;
        return Ok(Some(node.storage_hostname));
    }
    match &volume.clone_of {
        Some(origin_id) => match tx.try_load::<VolumeEntry>(origin_id)? {
            Some(origin) => mount_host(tx, &origin),
            None => Ok(None),
        },
        None => Ok(None),
    }
}

pub fn to_info(app: &App, volume: VolumeEntry) -> Result<VolumeInfo> {
    let (bricks, host) = app.store.view(|tx| -> Result<(Vec<BrickEntry>, Option<String>)> {
        let bricks = volume
            .bricks
            .iter()
            .map(|id| Ok(tx.load::<BrickEntry>(id)?))
            .collect::<Result<Vec<_>>>()?;
        Ok((bricks, mount_host(tx, &volume)?))
    })?;
    let mount = host
        .map(|host| format!("{}:{}", host, volume.name))
        .unwrap_or_default();
    Ok(VolumeInfo {
        id: volume.id,
        name: volume.name,
        cluster: volume.cluster_id,
        size: volume.size_gb,
        durability: volume.durability,
        gluster_volume_options: volume.options,
        block: volume.block,
        bricks: bricks
            .into_iter()
            .map(|brick| BrickInfo {
                id: brick.id,
                node: brick.node_id,
                device: brick.device_id,
                path: brick.path,
                size: brick.size_kb,
            })
            .collect(),
        mount,
        snapshots: volume.snapshots,
        clone_of: volume.clone_of,
    })
}

pub fn info(app: &App, id: &str) -> Result<VolumeEntry> {
    app.store.view(|tx| -> Result<VolumeEntry> { Ok(tx.load(id)?) })
}

pub fn list(app: &App) -> Result<Vec<String>> {
    app.store
        .view(|tx| -> Result<Vec<String>> { Ok(tx.list::<VolumeEntry>()?) })
}

fn validate_options(options: &[String]) -> Result<()> {
    for option in options {
        if option.split_whitespace().count() < 2 {
            return Err(Error::validation(format!(
                "volume option {option:?} must be \"<key> <value>\""
            )));
        }
    }
    Ok(())
}

/// Clusters able to host a volume, either the requested ones or every
/// cluster accepting the volume type
pub(crate) fn candidate_clusters(tx: &ReadTx, requested: &[String], block: bool) -> Result<Vec<String>> {
    if !requested.is_empty() {
        for id in requested {
            let _cluster: ClusterEntry = tx.load(id)?;
        }
        return Ok(requested.to_vec());
    }
    let clusters: Vec<String> = tx
        .load_all::<ClusterEntry>()?
        .into_iter()
        .filter(|c| if block { c.block } else { c.file })
        .map(|c| c.id)
        .collect();
    if clusters.is_empty() {
        return Err(Error::NoSpace(format!(
            "no cluster accepts {} volumes",
            if block { "block-hosting" } else { "file" }
        )));
    }
    Ok(clusters)
}

/// Validate a create request and build the volume entry
pub fn prepare_create(app: &App, request: &VolumeCreateRequest) -> Result<CreateVolume> {
    if request.size == 0 {
        return Err(Error::validation("volume size must be greater than zero"));
    }
    request.durability.validate()?;
    validate_options(&request.gluster_volume_options)?;

    let mut volume = VolumeEntry::new(&request.name, "", request.size);
    volume.durability = request.durability;
    volume.options.clone_from(&request.gluster_volume_options);
    if request.block {
        volume.block = true;
        volume.block_info.free_size_gb = request.size;
        if !volume.options.iter().any(|o| o == BLOCK_HOSTING_OPTION) {
            volume.options.push(BLOCK_HOSTING_OPTION.to_string());
        }
    }

    let clusters = app.store.view(|tx| -> Result<Vec<String>> {
        if let Some(owner) = tx.registration(&volume.registration_key())? {
            return Err(Error::conflict(format!(
                "volume name {} is already used by {owner}",
                volume.name
            )));
        }
        candidate_clusters(tx, &request.clusters, request.block)
    })?;

    Ok(CreateVolume { volume, clusters })
}

/// Online devices of a cluster with the nodes that hold them
fn cluster_devices(
    tx: &ReadTx,
    cluster_id: &str,
) -> Result<(Vec<DeviceCandidate>, HashMap<String, (DeviceEntry, NodeEntry)>)> {
    let cluster: ClusterEntry = tx.load(cluster_id)?;
    let mut candidates = Vec::new();
    let mut devices = HashMap::new();
    for node_id in &cluster.nodes {
        let node: NodeEntry = tx.load(node_id)?;
        if node.state != EntryState::Online {
            continue;
        }
        for device_id in &node.devices {
            let device: DeviceEntry = tx.load(device_id)?;
            if device.state != EntryState::Online {
                continue;
            }
            candidates.push(DeviceCandidate {
                node_id: node.id.clone(),
                device_id: device.id.clone(),
                zone: node.zone,
                free_kb: device.storage.free,
            });
            devices.insert(device.id.clone(), (device, node.clone()));
        }
    }
    Ok((candidates, devices))
}

/// Place bricks for `size_kb` of capacity.
///
/// Starts with one redundancy set and doubles the set count, shrinking the
/// bricks, until the allocator finds room, the bricks would drop below the
/// minimum size or the set limit is reached.
fn place_bricks(
    app: &App,
    tx: &ReadTx,
    cluster_id: &str,
    volume_id: &str,
    size_kb: u64,
    durability: DurabilityPolicy,
) -> Result<Vec<PlacedBrick>> {
    let (candidates, devices) = cluster_devices(tx, cluster_id)?;
    let allocation = &app.config.allocation;
    let min_brick_kb = allocation.min_brick_size_gb * KB_PER_GB;
    let max_sets = allocation.max_sets_per_volume.max(1);
    let set_size = durability.set_size();

    let mut num_sets = 1;
    loop {
        let brick_kb = durability.brick_size_kb(size_kb, num_sets as u64);
        if brick_kb == 0 || brick_kb < min_brick_kb {
            return Err(Error::NoSpace(format!(
                "cluster {cluster_id} cannot fit bricks of at least {} GB",
                allocation.min_brick_size_gb
            )));
        }
        match app
            .allocator
            .place(&candidates, brick_footprint_kb(brick_kb), num_sets, set_size)
        {
            Ok(placed) => {
                let mount_base = app.mount_base();
                return placed
                    .iter()
                    .map(|candidate| {
                        let (device, node) = devices.get(&candidate.device_id).ok_or_else(|| {
                            Error::internal(format!(
                                "allocator chose unknown device {}",
                                candidate.device_id
                            ))
                        })?;
                        let brick = BrickEntry::new(device, volume_id, brick_kb, &mount_base);
                        Ok((brick, node.clone()))
                    })
                    .collect();
            }
            Err(Error::NoSpace(reason)) if num_sets * 2 <= max_sets => {
                debug!(
                    "No room for {} sets in cluster {} ({}), trying {}",
                    num_sets,
                    cluster_id,
                    reason,
                    num_sets * 2
                );
                num_sets *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Place bricks in the first cluster of `clusters` that has room
fn allocate(
    app: &App,
    clusters: &[String],
    volume_id: &str,
    size_kb: u64,
    durability: DurabilityPolicy,
) -> Result<(String, Vec<PlacedBrick>)> {
    app.store.view(|tx| -> Result<(String, Vec<PlacedBrick>)> {
        let mut last_error = None;
        for cluster_id in clusters {
            match place_bricks(app, tx, cluster_id, volume_id, size_kb, durability) {
                Ok(placed) => return Ok((cluster_id.clone(), placed)),
                Err(e @ Error::NoSpace(_)) => {
                    debug!("Cluster {} cannot host volume {}: {}", cluster_id, volume_id, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::NoSpace("no candidate clusters".to_string())))
    })
}

fn brick_locations(placed: &[PlacedBrick]) -> Vec<BrickLocation> {
    placed
        .iter()
        .map(|(brick, node)| BrickLocation::new(&node.storage_hostname, &brick.path))
        .collect()
}

fn with_hosts(placed: &[PlacedBrick]) -> Vec<(BrickEntry, String)> {
    placed
        .iter()
        .map(|(brick, node)| (brick.clone(), node.manage_hostname.clone()))
        .collect()
}

fn add_brick_changes(bricks: &[(BrickEntry, String)]) -> impl Iterator<Item = PendingChange> + '_ {
    bricks.iter().map(|(brick, host)| PendingChange::AddBrick {
        brick: brick.clone(),
        host: host.clone(),
    })
}

/// Create a volume on the storage nodes and persist it
pub async fn create(app: &App, plan: CreateVolume) -> Result<VolumeEntry> {
    let CreateVolume {
        mut volume,
        clusters,
    } = plan;
    let (cluster_id, placed) = allocate(
        app,
        &clusters,
        &volume.id,
        volume.size_kb(),
        volume.durability,
    )?;
    volume.cluster_id = cluster_id;
    volume.bricks = placed.iter().map(|(brick, _)| brick.id.clone()).collect();
    let bricks = with_hosts(&placed);

    let mut changes = vec![PendingChange::AddVolume(volume.clone())];
    changes.extend(add_brick_changes(&bricks));
    let mut targets = vec![volume.id.clone()];
    targets.extend(volume.bricks.iter().cloned());
    let guard = PendingGuard::begin(&app.store, PendingAction::CreateVolume, targets, changes)?;
    info!(
        "Creating volume {} ({}, {} bricks) in cluster {} as operation {}",
        volume.name,
        volume.durability,
        bricks.len(),
        volume.cluster_id,
        guard.op_id()
    );

    create_bricks(app, &bricks).await?;

    let exec_host = bricks
        .first()
        .map(|(_, host)| host.clone())
        .ok_or_else(|| Error::internal("volume placed without bricks"))?;
    let request = VolumeRequest {
        name: volume.name.clone(),
        durability: volume.durability,
        bricks: brick_locations(&placed),
        options: volume.options.clone(),
    };
    if let Err(e) = app.executor.volume_create(&exec_host, &request).await {
        if destroy_bricks(app, &bricks).await.is_err() {
            warn!("Bricks of failed volume {} were not all removed", volume.name);
        }
        return Err(e.into());
    }

    guard.commit(|tx| persist_created(tx, &volume, &bricks))?;
    info!("Created volume {} ({})", volume.name, volume.id);
    Ok(volume)
}

fn persist_bricks(tx: &mut WriteTx, bricks: &[(BrickEntry, String)]) -> Result<()> {
    for (brick, _) in bricks {
        let mut device: DeviceEntry = tx.load(&brick.device_id)?;
        device.add_brick(&brick.id);
        tx.save(&device)?;
        tx.save(brick)?;
    }
    Ok(())
}

/// Store a created volume with its bricks. Device space was reserved when
/// the operation began.
pub(crate) fn persist_created(
    tx: &mut WriteTx,
    volume: &VolumeEntry,
    bricks: &[(BrickEntry, String)],
) -> Result<()> {
    persist_bricks(tx, bricks)?;
    let mut cluster: ClusterEntry = tx.load(&volume.cluster_id)?;
    cluster.add_volume(&volume.id);
    tx.save(&cluster)?;
    tx.save(volume)?;
    Ok(())
}

/// Validate an expand request
pub fn prepare_expand(app: &App, id: &str, expand_size_gb: u64) -> Result<VolumeEntry> {
    if expand_size_gb == 0 {
        return Err(Error::validation("expand size must be greater than zero"));
    }
    app.store.view(|tx| -> Result<VolumeEntry> {
        let volume: VolumeEntry = tx.load(id)?;
        ensure_not_pending(tx, id)?;
        if volume.clone_of.is_some() {
            return Err(Error::validation(format!(
                "volume {} is a snapshot clone and cannot be expanded",
                volume.name
            )));
        }
        Ok(volume)
    })
}

/// Add bricks for `expand_size_gb` more capacity to a volume
pub async fn expand(app: &App, volume: VolumeEntry, expand_size_gb: u64) -> Result<VolumeEntry> {
    let (_, placed) = allocate(
        app,
        std::slice::from_ref(&volume.cluster_id),
        &volume.id,
        expand_size_gb * KB_PER_GB,
        volume.durability,
    )?;
    let bricks = with_hosts(&placed);
    let exec_host = app.store.view(|tx| volume_host(tx, &volume))?;

    let mut changes = vec![PendingChange::ExpandVolume {
        volume_id: volume.id.clone(),
        previous_brick_count: volume.bricks.len(),
        size_gb: expand_size_gb,
    }];
    changes.extend(add_brick_changes(&bricks));
    let mut targets = vec![volume.id.clone()];
    targets.extend(bricks.iter().map(|(brick, _)| brick.id.clone()));
    let guard = PendingGuard::begin(&app.store, PendingAction::ExpandVolume, targets, changes)?;

    create_bricks(app, &bricks).await?;

    let request = VolumeRequest {
        name: volume.name.clone(),
        durability: volume.durability,
        bricks: brick_locations(&placed),
        options: Vec::new(),
    };
    if let Err(e) = app.executor.volume_expand(&exec_host, &request).await {
        warn!(
            "Expansion of volume {} failed, removing new bricks: {}",
            volume.name, e
        );
        if destroy_bricks(app, &bricks).await.is_err() {
            warn!("New bricks of volume {} were not all removed", volume.name);
        }
        return Err(e.into());
    }

    guard.commit(|tx| persist_expanded(tx, &volume.id, &bricks, expand_size_gb))?;
    info!(
        "Expanded volume {} by {} GB with {} bricks",
        volume.name,
        expand_size_gb,
        bricks.len()
    );
    info(app, &volume.id)
}

/// Record bricks added to a volume by an expansion
pub(crate) fn persist_expanded(
    tx: &mut WriteTx,
    volume_id: &str,
    bricks: &[(BrickEntry, String)],
    size_gb: u64,
) -> Result<()> {
    let mut volume: VolumeEntry = tx.load(volume_id)?;
    persist_bricks(tx, bricks)?;
    volume
        .bricks
        .extend(bricks.iter().map(|(brick, _)| brick.id.clone()));
    volume.size_gb += size_gb;
    if volume.block {
        volume.block_info.free_size_gb += size_gb;
    }
    tx.save(&volume)?;
    Ok(())
}

/// A validated brick replacement
#[derive(Debug, Clone)]
pub struct ReplaceBrick {
    pub volume: VolumeEntry,
    pub brick: BrickEntry,
}

/// Check that `brick_id` of volume `id` can be swapped for a new brick
pub fn prepare_replace_brick(app: &App, id: &str, brick_id: &str) -> Result<ReplaceBrick> {
    app.store.view(|tx| -> Result<ReplaceBrick> {
        let volume: VolumeEntry = tx.load(id)?;
        ensure_not_pending(tx, id)?;
        if volume.durability == DurabilityPolicy::None {
            return Err(Error::validation(format!(
                "volume {} has no redundancy to rebuild a replaced brick from",
                volume.name
            )));
        }
        if !volume.bricks.iter().any(|b| b == brick_id) {
            return Err(Error::not_found(
                "brick",
                format!("{brick_id} in volume {}", volume.name),
            ));
        }
        let brick: BrickEntry = tx.load(brick_id)?;
        Ok(ReplaceBrick { volume, brick })
    })
}

/// Where a replacement brick goes and how to reach both bricks
struct Replacement {
    new: PlacedBrick,
    old_node: NodeEntry,
    exec_host: String,
}

/// Place one brick like `old` on a node holding no brick of its set
fn place_replacement(
    app: &App,
    tx: &ReadTx,
    volume: &VolumeEntry,
    old: &BrickEntry,
) -> Result<Replacement> {
    let set_size = volume.durability.set_size().max(1);
    let index = volume
        .bricks
        .iter()
        .position(|id| *id == old.id)
        .ok_or_else(|| {
            Error::conflict(format!("brick {} left volume {}", old.id, volume.name))
        })?;
    let start = index - index % set_size;
    let end = (start + set_size).min(volume.bricks.len());
    let mut set_nodes = Vec::with_capacity(set_size);
    for id in &volume.bricks[start..end] {
        let brick: BrickEntry = tx.load(id)?;
        set_nodes.push(brick.node_id);
    }

    let (candidates, devices) = cluster_devices(tx, &volume.cluster_id)?;
    let candidates: Vec<DeviceCandidate> = candidates
        .into_iter()
        .filter(|c| !set_nodes.contains(&c.node_id))
        .collect();
    let chosen = app
        .allocator
        .place(&candidates, brick_footprint_kb(old.size_kb), 1, 1)?;
    let candidate = chosen
        .first()
        .ok_or_else(|| Error::internal("allocator placed no brick"))?;
    let (device, node) = devices.get(&candidate.device_id).ok_or_else(|| {
        Error::internal(format!("allocator chose unknown device {}", candidate.device_id))
    })?;
    let brick = BrickEntry::new(device, &volume.id, old.size_kb, &app.mount_base());

    // Volume commands go through a node that keeps its brick
    let mut exec_host = None;
    for id in &volume.bricks {
        let brick: BrickEntry = tx.load(id)?;
        if brick.node_id != old.node_id {
            let node: NodeEntry = tx.load(&brick.node_id)?;
            exec_host = Some(node.manage_hostname);
            break;
        }
    }
    let exec_host = match exec_host {
        Some(host) => host,
        None => volume_host(tx, volume)?,
    };

    Ok(Replacement {
        new: (brick, node.clone()),
        old_node: tx.load(&old.node_id)?,
        exec_host,
    })
}

/// Swap a brick for a new one on another node. Self-heal rebuilds the new
/// brick from the rest of its redundancy set.
pub async fn replace_brick(app: &App, plan: ReplaceBrick) -> Result<VolumeEntry> {
    let ReplaceBrick { volume, brick: old } = plan;
    let Replacement {
        new: (new, new_node),
        old_node,
        exec_host,
    } = app
        .store
        .view(|tx| place_replacement(app, tx, &volume, &old))?;
    let old_location = BrickLocation::new(&old_node.storage_hostname, &old.path);
    let new_location = BrickLocation::new(&new_node.storage_hostname, &new.path);
    let new_bricks = vec![(new.clone(), new_node.manage_hostname.clone())];

    let changes = vec![
        PendingChange::ReplaceBrick {
            volume_id: volume.id.clone(),
            old_brick_id: old.id.clone(),
            new_brick_id: new.id.clone(),
            host: exec_host.clone(),
        },
        PendingChange::AddBrick {
            brick: new.clone(),
            host: new_node.manage_hostname.clone(),
        },
        PendingChange::DeleteBrick {
            brick: old.clone(),
            host: old_node.manage_hostname.clone(),
        },
    ];
    let targets = vec![volume.id.clone(), old.id.clone(), new.id.clone()];
    let guard = PendingGuard::begin(&app.store, PendingAction::ReplaceBrick, targets, changes)?;
    info!(
        "Replacing brick {} of volume {} with {} as operation {}",
        old_location.name(),
        volume.name,
        new_location.name(),
        guard.op_id()
    );

    create_bricks(app, &new_bricks).await?;
    if let Err(e) = app
        .executor
        .volume_replace_brick(&exec_host, &volume.name, &old_location, &new_location)
        .await
    {
        warn!(
            "Replacing brick {} of volume {} failed, removing new brick: {}",
            old_location.name(),
            volume.name,
            e
        );
        if destroy_bricks(app, &new_bricks).await.is_err() {
            warn!("New brick {} was not removed", new_location.name());
        }
        return Err(e.into());
    }

    // A replaced brick often sits on a failed node
    let old_bricks = [(old.clone(), old_node.manage_hostname.clone())];
    if let Err(e) = destroy_bricks(app, &old_bricks).await {
        warn!(
            "Old brick {} of volume {} left on its node: {}",
            old_location.name(),
            volume.name,
            e
        );
    }

    guard.commit(|tx| persist_replaced(tx, &volume.id, &old.id, &new))?;
    info(app, &volume.id)
}

/// Put `new` in the slot of `old_brick_id` and forget the old brick,
/// returning its space to its device
pub(crate) fn persist_replaced(
    tx: &mut WriteTx,
    volume_id: &str,
    old_brick_id: &str,
    new: &BrickEntry,
) -> Result<()> {
    let mut volume: VolumeEntry = tx.load(volume_id)?;
    let slot = volume
        .bricks
        .iter()
        .position(|id| id == old_brick_id)
        .ok_or_else(|| {
            Error::conflict(format!(
                "brick {old_brick_id} is not part of volume {}",
                volume.name
            ))
        })?;
    volume.bricks[slot] = new.id.clone();

    let mut device: DeviceEntry = tx.load(&new.device_id)?;
    device.add_brick(&new.id);
    tx.save(&device)?;
    tx.save(new)?;

    if let Some(old) = tx.try_load::<BrickEntry>(old_brick_id)? {
        if let Some(mut device) = tx.try_load::<DeviceEntry>(&old.device_id)? {
            remove_id(&mut device.bricks, old_brick_id);
            device.storage.release(old.total_size_kb());
            tx.save(&device)?;
        }
        tx.delete::<BrickEntry>(old_brick_id)?;
    }
    tx.save(&volume)?;
    Ok(())
}

/// Check that a volume can be deleted
pub fn prepare_delete(app: &App, id: &str) -> Result<VolumeEntry> {
    app.store.view(|tx| -> Result<VolumeEntry> {
        let volume: VolumeEntry = tx.load(id)?;
        ensure_not_pending(tx, id)?;
        if !volume.block_info.block_volumes.is_empty() {
            return Err(Error::conflict(format!(
                "volume {} still hosts {} block volumes",
                volume.name,
                volume.block_info.block_volumes.len()
            )));
        }
        if !volume.snapshots.is_empty() {
            return Err(Error::conflict(format!(
                "volume {} still has {} snapshots",
                volume.name,
                volume.snapshots.len()
            )));
        }
        if !volume.clones.is_empty() {
            return Err(Error::conflict(format!(
                "volume {} still has {} clones sharing its bricks",
                volume.name,
                volume.clones.len()
            )));
        }
        Ok(volume)
    })
}

/// Stop and delete a volume, destroy its bricks and forget it
pub async fn delete(app: &App, volume: VolumeEntry) -> Result<()> {
    let (exec_host, bricks) = app.store.view(|tx| -> Result<_> {
        Ok((volume_host(tx, &volume)?, volume_bricks(tx, &volume)?))
    })?;

    let mut changes = vec![PendingChange::DeleteVolume {
        volume_id: volume.id.clone(),
        host: exec_host.clone(),
    }];
    changes.extend(bricks.iter().map(|(brick, host)| PendingChange::DeleteBrick {
        brick: brick.clone(),
        host: host.clone(),
    }));
    let mut targets = vec![volume.id.clone()];
    targets.extend(volume.bricks.iter().cloned());
    let guard = PendingGuard::begin(&app.store, PendingAction::DeleteVolume, targets, changes)?;

    app.executor
        .volume_destroy_check(&exec_host, &volume.name)
        .await?;
    app.executor
        .volume_destroy(&exec_host, &volume.name)
        .await?;
    // The volume is gone from the nodes; from here on the delete only
    // moves forward
    if let Err(e) = destroy_bricks(app, &bricks).await {
        return Err(guard.abandon(&e));
    }

    guard.commit(|tx| persist_deleted(tx, &volume.id))?;
    info!("Deleted volume {} ({})", volume.name, volume.id);
    Ok(())
}

/// Remove a volume and its bricks from the store, returning brick space
/// to the devices
pub(crate) fn persist_deleted(tx: &mut WriteTx, volume_id: &str) -> Result<()> {
    let volume: VolumeEntry = tx.load(volume_id)?;
    for brick_id in &volume.bricks {
        let Some(brick) = tx.try_load::<BrickEntry>(brick_id)? else {
            continue;
        };
        if let Some(mut device) = tx.try_load::<DeviceEntry>(&brick.device_id)? {
            remove_id(&mut device.bricks, brick_id);
            device.storage.release(brick.total_size_kb());
            tx.save(&device)?;
        }
        tx.delete::<BrickEntry>(brick_id)?;
    }
    if let Some(mut cluster) = tx.try_load::<ClusterEntry>(&volume.cluster_id)? {
        remove_id(&mut cluster.volumes, volume_id);
        tx.save(&cluster)?;
    }
    if let Some(origin_id) = &volume.clone_of {
        if let Some(mut origin) = tx.try_load::<VolumeEntry>(origin_id)? {
            remove_id(&mut origin.clones, volume_id);
            tx.save(&origin)?;
        }
    }
    if tx.registration(&volume.registration_key())?.as_deref() == Some(volume_id) {
        tx.unregister(&volume.registration_key())?;
    }
    tx.delete::<VolumeEntry>(volume_id)?;
    Ok(())
}

/// Self-heal state of a volume's bricks, read from the nodes
pub async fn heal_info(app: &App, id: &str) -> Result<HealInfo> {
    let (volume, host) = app.store.view(|tx| -> Result<(VolumeEntry, String)> {
        let volume: VolumeEntry = tx.load(id)?;
        let host = volume_host(tx, &volume)?;
        Ok((volume, host))
    })?;
    let bricks = app.executor.heal_info(&host, &volume.name).await?;
    debug!("Heal info of volume {} lists {} bricks", volume.name, bricks.len());
    Ok(HealInfo {
        volume: volume.name,
        bricks: bricks
            .into_iter()
            .map(|b| BrickHealInfo {
                name: b.name,
                status: b.status,
                entries: b.entries,
            })
            .collect(),
    })
}
