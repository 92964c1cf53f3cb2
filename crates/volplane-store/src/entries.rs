//! Persisted entity records.
//!
//! Relations between entities are stored as id lists on both sides; the
//! operation that creates or destroys an entity updates the referencing
//! records in the same transaction.

use crate::store::Entry;
use crate::tables::{self, EntryTable};
use serde::{Deserialize, Serialize};
use volplane_common::{DurabilityPolicy, EntryState, KB_PER_GB, StorageSize, new_id};

/// Remove `id` from a relation list, returning whether it was present
pub fn remove_id(ids: &mut Vec<String>, id: &str) -> bool {
    let before = ids.len();
    ids.retain(|x| x != id);
    ids.len() != before
}

fn add_id(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|x| x == id) {
        ids.push(id.to_string());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub id: String,
    /// Cluster may host file volumes
    pub file: bool,
    /// Cluster may host block-hosting volumes
    pub block: bool,
    pub nodes: Vec<String>,
    pub volumes: Vec<String>,
    pub block_volumes: Vec<String>,
}

impl ClusterEntry {
    #[must_use]
    pub fn new(file: bool, block: bool) -> Self {
        Self {
            id: new_id(),
            file,
            block,
            nodes: Vec::new(),
            volumes: Vec::new(),
            block_volumes: Vec::new(),
        }
    }

    pub fn add_node(&mut self, id: &str) {
        add_id(&mut self.nodes, id);
    }

    pub fn add_volume(&mut self, id: &str) {
        add_id(&mut self.volumes, id);
    }

    pub fn add_block_volume(&mut self, id: &str) {
        add_id(&mut self.block_volumes, id);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.volumes.is_empty() && self.block_volumes.is_empty()
    }
}

impl Entry for ClusterEntry {
    const KIND: &'static str = "cluster";
    const TABLE: EntryTable = tables::CLUSTERS;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: String,
    pub cluster_id: String,
    pub zone: u32,
    /// Hostname used to run management commands
    pub manage_hostname: String,
    /// Hostname or address used in brick paths
    pub storage_hostname: String,
    pub state: EntryState,
    pub devices: Vec<String>,
}

impl NodeEntry {
    #[must_use]
    pub fn new(cluster_id: &str, zone: u32, manage: &str, storage: &str) -> Self {
        Self {
            id: new_id(),
            cluster_id: cluster_id.to_string(),
            zone,
            manage_hostname: manage.to_string(),
            storage_hostname: storage.to_string(),
            state: EntryState::Online,
            devices: Vec::new(),
        }
    }

    #[must_use]
    pub fn manage_key(&self) -> String {
        format!("manage:{}", self.manage_hostname)
    }

    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("storage:{}", self.storage_hostname)
    }

    pub fn add_device(&mut self, id: &str) {
        add_id(&mut self.devices, id);
    }
}

impl Entry for NodeEntry {
    const KIND: &'static str = "node";
    const TABLE: EntryTable = tables::NODES;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub node_id: String,
    /// Block device path on the node, e.g. /dev/sdb
    pub name: String,
    pub storage: StorageSize,
    pub extent_size_kb: u64,
    pub state: EntryState,
    pub bricks: Vec<String>,
}

impl DeviceEntry {
    #[must_use]
    pub fn new(node_id: &str, name: &str) -> Self {
        Self {
            id: new_id(),
            node_id: node_id.to_string(),
            name: name.to_string(),
            storage: StorageSize::default(),
            extent_size_kb: 4096,
            state: EntryState::Online,
            bricks: Vec::new(),
        }
    }

    /// Registration key making (node, device name) unique
    #[must_use]
    pub fn registration_key(&self) -> String {
        format!("device:{}:{}", self.node_id, self.name)
    }

    /// LVM volume group created on this device
    #[must_use]
    pub fn vg_name(&self) -> String {
        vg_name(&self.id)
    }

    pub fn add_brick(&mut self, id: &str) {
        add_id(&mut self.bricks, id);
    }
}

impl Entry for DeviceEntry {
    const KIND: &'static str = "device";
    const TABLE: EntryTable = tables::DEVICES;

    fn id(&self) -> &str {
        &self.id
    }
}

/// LVM volume group name of a device
#[must_use]
pub fn vg_name(device_id: &str) -> String {
    format!("vg_{device_id}")
}

/// Thin pool metadata for a brick of `size_kb`: ~0.5% of the pool, at least 16 MB
#[must_use]
pub fn pool_metadata_size_kb(size_kb: u64) -> u64 {
    (size_kb / 200).max(16 * 1024)
}

/// Device space a brick of `size_kb` consumes, metadata included
#[must_use]
pub fn brick_footprint_kb(size_kb: u64) -> u64 {
    size_kb + pool_metadata_size_kb(size_kb)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickEntry {
    pub id: String,
    pub node_id: String,
    pub device_id: String,
    pub volume_id: String,
    /// Mount path of the brick filesystem on the node
    pub path: String,
    pub size_kb: u64,
    pub tp_size_kb: u64,
    pub pool_metadata_size_kb: u64,
}

impl BrickEntry {
    /// Build a brick on `device` for `volume_id`, sized for a thin pool.
    #[must_use]
    pub fn new(device: &DeviceEntry, volume_id: &str, size_kb: u64, mount_base: &str) -> Self {
        let id = new_id();
        let pool_metadata_size_kb = pool_metadata_size_kb(size_kb);
        let path = format!(
            "{}/{}/brick_{}/brick",
            mount_base.trim_end_matches('/'),
            device.vg_name(),
            id
        );
        Self {
            id,
            node_id: device.node_id.clone(),
            device_id: device.id.clone(),
            volume_id: volume_id.to_string(),
            path,
            size_kb,
            tp_size_kb: size_kb,
            pool_metadata_size_kb,
        }
    }

    /// Space taken from the device, including thin pool metadata
    #[must_use]
    pub const fn total_size_kb(&self) -> u64 {
        self.tp_size_kb + self.pool_metadata_size_kb
    }

    #[must_use]
    pub fn vg_name(&self) -> String {
        vg_name(&self.device_id)
    }

    #[must_use]
    pub fn lv_name(&self) -> String {
        format!("brick_{}", self.id)
    }

    #[must_use]
    pub fn tp_name(&self) -> String {
        format!("tp_{}", self.id)
    }
}

impl Entry for BrickEntry {
    const KIND: &'static str = "brick";
    const TABLE: EntryTable = tables::BRICKS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Capacity bookkeeping for volumes that host block volumes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHostingInfo {
    pub free_size_gb: u64,
    pub reserved_size_gb: u64,
    pub block_volumes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    pub size_gb: u64,
    pub durability: DurabilityPolicy,
    /// Gluster volume options as `key value` strings, applied in order
    pub options: Vec<String>,
    pub bricks: Vec<String>,
    /// Volume hosts block volumes
    pub block: bool,
    pub block_info: BlockHostingInfo,
    #[serde(default)]
    pub snapshots: Vec<String>,
    /// Volumes cloned from snapshots of this volume; they share its thin pools
    #[serde(default)]
    pub clones: Vec<String>,
    /// Origin volume of a snapshot clone. Clones own no brick records.
    #[serde(default)]
    pub clone_of: Option<String>,
}

impl VolumeEntry {
    /// New volume entry; an empty name is replaced by `vol_<id>`.
    #[must_use]
    pub fn new(name: &str, cluster_id: &str, size_gb: u64) -> Self {
        let id = new_id();
        let name = if name.is_empty() {
            format!("vol_{id}")
        } else {
            name.to_string()
        };
        Self {
            id,
            name,
            cluster_id: cluster_id.to_string(),
            size_gb,
            durability: DurabilityPolicy::default(),
            options: Vec::new(),
            bricks: Vec::new(),
            block: false,
            block_info: BlockHostingInfo::default(),
            snapshots: Vec::new(),
            clones: Vec::new(),
            clone_of: None,
        }
    }

    pub fn add_snapshot(&mut self, id: &str) {
        add_id(&mut self.snapshots, id);
    }

    pub fn add_clone(&mut self, id: &str) {
        add_id(&mut self.clones, id);
    }

    #[must_use]
    pub const fn size_kb(&self) -> u64 {
        self.size_gb * KB_PER_GB
    }

    /// Registration key making volume names unique
    #[must_use]
    pub fn registration_key(&self) -> String {
        format!("volume:{}", self.name)
    }
}

impl Entry for VolumeEntry {
    const KIND: &'static str = "volume";
    const TABLE: EntryTable = tables::VOLUMES;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVolumeEntry {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    pub hosting_volume_id: String,
    pub size_gb: u64,
    pub hacount: u32,
    /// Storage hostnames exporting the block volume
    pub hosts: Vec<String>,
    pub auth: bool,
    pub iqn: String,
    pub username: String,
    pub password: String,
}

impl BlockVolumeEntry {
    #[must_use]
    pub fn new(name: &str, size_gb: u64, hacount: u32, auth: bool) -> Self {
        let id = new_id();
        let name = if name.is_empty() {
            format!("blockvol_{id}")
        } else {
            name.to_string()
        };
        Self {
            id,
            name,
            cluster_id: String::new(),
            hosting_volume_id: String::new(),
            size_gb,
            hacount,
            hosts: Vec::new(),
            auth,
            iqn: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Entry for BlockVolumeEntry {
    const KIND: &'static str = "blockvolume";
    const TABLE: EntryTable = tables::BLOCK_VOLUMES;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Point-in-time gluster snapshot of a volume
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: String,
    pub name: String,
    pub volume_id: String,
    pub cluster_id: String,
    pub description: String,
}

impl SnapshotEntry {
    /// New snapshot of `volume`; an empty name is replaced by `snap_<id>`.
    #[must_use]
    pub fn new(name: &str, volume: &VolumeEntry, description: &str) -> Self {
        let id = new_id();
        let name = if name.is_empty() {
            format!("snap_{id}")
        } else {
            name.to_string()
        };
        Self {
            id,
            name,
            volume_id: volume.id.clone(),
            cluster_id: volume.cluster_id.clone(),
            description: description.to_string(),
        }
    }

    /// Registration key making snapshot names unique
    #[must_use]
    pub fn registration_key(&self) -> String {
        format!("snapshot:{}", self.name)
    }
}

impl Entry for SnapshotEntry {
    const KIND: &'static str = "snapshot";
    const TABLE: EntryTable = tables::SNAPSHOTS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Free-form key/value attribute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbAttributeEntry {
    pub key: String,
    pub value: String,
}

impl DbAttributeEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Entry for DbAttributeEntry {
    const KIND: &'static str = "attribute";
    const TABLE: EntryTable = tables::DB_ATTRIBUTES;

    fn id(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntryReader, EntryStore, StoreResult};

    #[test]
    fn test_every_kind_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntryStore::open(dir.path().join("e.redb")).unwrap();

        let cluster = ClusterEntry::new(true, true);
        let node = NodeEntry::new(&cluster.id, 1, "mgmt1", "10.0.0.1");
        let mut device = DeviceEntry::new(&node.id, "/dev/sdb");
        device.storage = StorageSize::new(500 * KB_PER_GB);
        let mut volume = VolumeEntry::new("", &cluster.id, 10);
        volume.durability = DurabilityPolicy::Replica { replica: 3 };
        volume.options.push("performance.read-ahead off".into());
        let brick = BrickEntry::new(&device, &volume.id, 10 * KB_PER_GB, "/mnt");
        let block = BlockVolumeEntry::new("bv", 5, 3, true);
        let snapshot = SnapshotEntry::new("", &volume, "nightly");
        volume.add_snapshot(&snapshot.id);

        store
            .update(|tx| -> StoreResult<()> {
                tx.save(&cluster)?;
                tx.save(&node)?;
                tx.save(&device)?;
                tx.save(&volume)?;
                tx.save(&brick)?;
                tx.save(&block)?;
                tx.save(&snapshot)
            })
            .unwrap();

        store
            .view(|tx| -> StoreResult<()> {
                assert_eq!(tx.load::<ClusterEntry>(&cluster.id)?, cluster);
                assert_eq!(tx.load::<NodeEntry>(&node.id)?, node);
                assert_eq!(tx.load::<DeviceEntry>(&device.id)?, device);
                assert_eq!(tx.load::<VolumeEntry>(&volume.id)?, volume);
                assert_eq!(tx.load::<BrickEntry>(&brick.id)?, brick);
                assert_eq!(tx.load::<BlockVolumeEntry>(&block.id)?, block);
                assert_eq!(tx.load::<SnapshotEntry>(&snapshot.id)?, snapshot);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_default_volume_name() {
        let volume = VolumeEntry::new("", "c1", 1);
        assert_eq!(volume.name, format!("vol_{}", volume.id));
        let snapshot = SnapshotEntry::new("", &volume, "");
        assert_eq!(snapshot.name, format!("snap_{}", snapshot.id));
        assert_eq!(snapshot.registration_key(), format!("snapshot:{}", snapshot.name));
        assert_eq!(snapshot.cluster_id, "c1");
    }

    #[test]
    fn test_brick_path_uses_volume_group() {
        let device = DeviceEntry::new("n1", "/dev/sdc");
        let brick = BrickEntry::new(&device, "v1", 1024 * 1024, "/var/lib/mounts/");
        assert!(brick.path.starts_with(&format!("/var/lib/mounts/vg_{}/", device.id)));
        assert!(brick.path.ends_with("/brick"));
        assert!(brick.total_size_kb() > brick.size_kb);
    }

    #[test]
    fn test_relation_helpers() {
        let mut cluster = ClusterEntry::new(true, false);
        cluster.add_volume("v1");
        cluster.add_volume("v1");
        assert_eq!(cluster.volumes.len(), 1);
        assert!(remove_id(&mut cluster.volumes, "v1"));
        assert!(!remove_id(&mut cluster.volumes, "v1"));
        assert!(cluster.is_empty());
    }
}
