//! Full-store export and import.

use crate::entries::{
    BlockVolumeEntry, BrickEntry, ClusterEntry, DbAttributeEntry, DeviceEntry, NodeEntry,
    SnapshotEntry, VolumeEntry,
};
use crate::pending::PendingOperationEntry;
use crate::store::{EntryReader, EntryStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Every bucket's entities as ordered lists
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbDump {
    pub clusters: Vec<ClusterEntry>,
    pub volumes: Vec<VolumeEntry>,
    pub bricks: Vec<BrickEntry>,
    pub nodes: Vec<NodeEntry>,
    pub devices: Vec<DeviceEntry>,
    pub block_volumes: Vec<BlockVolumeEntry>,
    pub attributes: Vec<DbAttributeEntry>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotEntry>,
    #[serde(default)]
    pub pending_operations: Vec<PendingOperationEntry>,
}

impl DbDump {
    pub fn read_json(path: impl AsRef<Path>) -> StoreResult<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

impl EntryStore {
    /// Snapshot every bucket in one read transaction
    pub fn export(&self) -> StoreResult<DbDump> {
        self.view(|tx| {
            Ok(DbDump {
                clusters: tx.load_all()?,
                volumes: tx.load_all()?,
                bricks: tx.load_all()?,
                nodes: tx.load_all()?,
                devices: tx.load_all()?,
                block_volumes: tx.load_all()?,
                attributes: tx.load_all()?,
                snapshots: tx.load_all()?,
                pending_operations: tx.load_all()?,
            })
        })
    }

    /// Load a dump into a store that holds no clusters yet.
    ///
    /// Entities are written in dependency order: clusters, volumes, bricks,
    /// nodes (with hostname registration), devices (with registration),
    /// block volumes, snapshots (with registration), then attributes. The
    /// import is a single transaction.
    pub fn import(&self, dump: &DbDump) -> StoreResult<()> {
        self.update(|tx| {
            if !tx.list::<ClusterEntry>()?.is_empty() {
                return Err(StoreError::Conflict(
                    "import requires an empty store".to_string(),
                ));
            }

            for cluster in &dump.clusters {
                tx.save(cluster)?;
            }
            for volume in &dump.volumes {
                volume.durability.validate().map_err(|e| {
                    StoreError::InvalidEntry(format!("volume {}: {e}", volume.id))
                })?;
                tx.register(&volume.registration_key(), &volume.id)?;
                tx.save(volume)?;
            }
            for brick in &dump.bricks {
                tx.save(brick)?;
            }
            for node in &dump.nodes {
                tx.register(&node.manage_key(), &node.id)?;
                tx.register(&node.storage_key(), &node.id)?;
                tx.save(node)?;
            }
            for device in &dump.devices {
                tx.register(&device.registration_key(), &device.id)?;
                tx.save(device)?;
            }
            for block_volume in &dump.block_volumes {
                tx.save(block_volume)?;
            }
            for snapshot in &dump.snapshots {
                tx.register(&snapshot.registration_key(), &snapshot.id)?;
                tx.save(snapshot)?;
            }
            for attr in &dump.attributes {
                tx.save(attr)?;
            }
            for op in &dump.pending_operations {
                for target in &op.targets {
                    tx.set_marker(target, &op.id)?;
                }
                tx.save(op)?;
            }
            Ok(())
        })?;

        info!(
            "Imported {} clusters, {} nodes, {} devices, {} volumes, {} bricks, {} block volumes",
            dump.clusters.len(),
            dump.nodes.len(),
            dump.devices.len(),
            dump.volumes.len(),
            dump.bricks.len(),
            dump.block_volumes.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::{self, PendingAction};
    use volplane_common::DurabilityPolicy;

    fn populated_store(dir: &tempfile::TempDir) -> EntryStore {
        let store = EntryStore::open(dir.path().join("src.redb")).unwrap();
        let mut cluster = ClusterEntry::new(true, false);
        let mut node = NodeEntry::new(&cluster.id, 1, "m1", "s1");
        let mut device = DeviceEntry::new(&node.id, "/dev/sdb");
        let mut volume = VolumeEntry::new("vol", &cluster.id, 5);
        volume.durability = DurabilityPolicy::Dispersion {
            data: 4,
            redundancy: 2,
        };
        let brick = BrickEntry::new(&device, &volume.id, 1024, "/mnt");
        let snapshot = SnapshotEntry::new("snap1", &volume, "");
        volume.add_snapshot(&snapshot.id);
        volume.bricks.push(brick.id.clone());
        device.add_brick(&brick.id);
        node.add_device(&device.id);
        cluster.add_node(&node.id);
        cluster.add_volume(&volume.id);

        store
            .update(|tx| -> StoreResult<()> {
                tx.save(&cluster)?;
                tx.save(&node)?;
                tx.save(&device)?;
                tx.save(&volume)?;
                tx.save(&brick)?;
                tx.save(&snapshot)?;
                pending::begin(tx, PendingAction::DeleteVolume, vec![volume.id.clone()], vec![])?;
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_export_import_preserves_entities() {
        let dir = tempfile::tempdir().unwrap();
        let source = populated_store(&dir);
        let dump = source.export().unwrap();
        assert_eq!(dump.clusters.len(), 1);
        assert_eq!(dump.pending_operations.len(), 1);

        let path = dir.path().join("dump.json");
        dump.write_json(&path).unwrap();
        let read_back = DbDump::read_json(&path).unwrap();
        assert_eq!(read_back, dump);

        let target = EntryStore::open(dir.path().join("dst.redb")).unwrap();
        target.import(&read_back).unwrap();
        let exported = target.export().unwrap();
        assert_eq!(exported.volumes, dump.volumes);
        assert_eq!(exported.nodes, dump.nodes);
        assert_eq!(exported.snapshots, dump.snapshots);

        // Registrations and markers came along
        let node = &dump.nodes[0];
        let owner = target.view(|tx| tx.registration(&node.manage_key())).unwrap();
        assert_eq!(owner.as_deref(), Some(node.id.as_str()));
        let snapshot = &dump.snapshots[0];
        let owner = target
            .view(|tx| tx.registration(&snapshot.registration_key()))
            .unwrap();
        assert_eq!(owner.as_deref(), Some(snapshot.id.as_str()));
        let holder = target
            .view(|tx| tx.marker_for(&dump.volumes[0].id))
            .unwrap();
        assert!(holder.is_some());
    }

    #[test]
    fn test_import_into_populated_store_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = populated_store(&dir);
        let dump = store.export().unwrap();
        let err = store.import(&dump).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_import_rejects_invalid_durability() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = VolumeEntry::new("bad", "c1", 1);
        volume.durability = DurabilityPolicy::Replica { replica: 0 };
        let dump = DbDump {
            volumes: vec![volume],
            ..DbDump::default()
        };
        let store = EntryStore::open(dir.path().join("x.redb")).unwrap();
        let err = store.import(&dump).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntry(_)));
        assert!(store.export().unwrap().volumes.is_empty());
    }
}
