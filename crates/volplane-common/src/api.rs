//! Request and response bodies of the HTTP API
//!
//! Shared by the server and the client so both sides agree on the JSON.

use crate::types::{DurabilityPolicy, EntryState, StorageSize};
use serde::{Deserialize, Serialize};

/// Header set to `"true"` on poll responses for jobs still running
pub const PENDING_HEADER: &str = "X-Pending";

/// Default route prefix of job handles
pub const QUEUE_PREFIX: &str = "/queue";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCreateRequest {
    #[serde(default = "default_true")]
    pub file: bool,
    #[serde(default)]
    pub block: bool,
}

impl Default for ClusterCreateRequest {
    fn default() -> Self {
        Self {
            file: true,
            block: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub id: String,
    pub file: bool,
    pub block: bool,
    pub nodes: Vec<String>,
    pub volumes: Vec<String>,
    pub block_volumes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterList {
    pub clusters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAddRequest {
    pub cluster: String,
    #[serde(default = "default_zone")]
    pub zone: u32,
    pub manage_hostname: String,
    pub storage_hostname: String,
}

const fn default_zone() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub cluster: String,
    pub zone: u32,
    pub manage_hostname: String,
    pub storage_hostname: String,
    pub state: EntryState,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAddRequest {
    pub node: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub node: String,
    pub name: String,
    pub storage: StorageSize,
    pub state: EntryState,
    pub bricks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCreateRequest {
    /// Size in GB
    pub size: u64,
    #[serde(default)]
    pub name: String,
    /// Cluster to place the volume in; any file cluster when empty
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default = "default_durability")]
    pub durability: DurabilityPolicy,
    #[serde(default)]
    pub gluster_volume_options: Vec<String>,
    /// Create the volume as a block-hosting volume
    #[serde(default)]
    pub block: bool,
}

const fn default_durability() -> DurabilityPolicy {
    DurabilityPolicy::Replica {
        replica: DurabilityPolicy::DEFAULT_REPLICA,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeExpandRequest {
    /// Additional size in GB
    pub expand_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrickReplaceRequest {
    /// Id of the brick to move to another node
    pub brick: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickInfo {
    pub id: String,
    pub node: String,
    pub device: String,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: String,
    pub name: String,
    pub cluster: String,
    pub size: u64,
    pub durability: DurabilityPolicy,
    pub gluster_volume_options: Vec<String>,
    pub block: bool,
    pub bricks: Vec<BrickInfo>,
    /// `host:volume` mount string using the first storage host
    pub mount: String,
    #[serde(default)]
    pub snapshots: Vec<String>,
    /// Origin volume when this volume is a snapshot clone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_of: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeList {
    pub volumes: Vec<String>,
}

/// Self-heal state of one brick; `entries` is unknown while the brick is
/// disconnected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickHealInfo {
    pub name: String,
    pub status: String,
    pub entries: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealInfo {
    pub volume: String,
    pub bricks: Vec<BrickHealInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotCreateRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotCloneRequest {
    /// Name of the new volume
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Volume the snapshot was taken of
    pub volume: String,
    pub cluster: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotList {
    pub snapshots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockVolumeCreateRequest {
    /// Size in GB
    pub size: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub hacount: u32,
    #[serde(default)]
    pub auth: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVolumeInfo {
    pub id: String,
    pub name: String,
    pub cluster: String,
    pub hosting_volume: String,
    pub size: u64,
    pub hacount: u32,
    pub hosts: Vec<String>,
    pub iqn: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockVolumeExpandRequest {
    /// New total size in GB
    pub new_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockVolumeList {
    pub block_volumes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_request_defaults() {
        let req: VolumeCreateRequest = serde_json::from_str(r#"{"size": 10}"#).unwrap();
        assert_eq!(req.durability, DurabilityPolicy::Replica { replica: 3 });
        assert!(req.name.is_empty());
        assert!(!req.block);
    }

    #[test]
    fn test_volume_request_dispersion() {
        let req: VolumeCreateRequest = serde_json::from_str(
            r#"{"size": 10, "durability": {"dispersion": {"data": 4, "redundancy": 2}}}"#,
        )
        .unwrap();
        assert_eq!(
            req.durability,
            DurabilityPolicy::Dispersion {
                data: 4,
                redundancy: 2
            }
        );
    }

    #[test]
    fn test_snapshot_request_defaults() {
        let req: SnapshotCreateRequest = serde_json::from_str("{}").unwrap();
        assert!(req.name.is_empty());
        assert!(req.description.is_empty());

        let info: VolumeInfo = serde_json::from_str(
            r#"{"id": "v", "name": "vol1", "cluster": "c", "size": 1,
                "durability": "none", "gluster_volume_options": [], "block": false,
                "bricks": [], "mount": "s0:vol1"}"#,
        )
        .unwrap();
        assert!(info.snapshots.is_empty());
        assert!(info.clone_of.is_none());
    }
}
