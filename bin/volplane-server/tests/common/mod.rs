//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;
use volplane_common::api::{
    ClusterCreateRequest, DeviceAddRequest, NodeAddRequest, VolumeCreateRequest,
};
use volplane_common::{Config, DurabilityPolicy};
use volplane_executor::RemoteCommandTransport;
use volplane_executor::testing::RecordingTransport;
use volplane_server::App;
use volplane_server::operations::{cluster, device, node};
use volplane_store::pending::{self, PendingOperationEntry};
use volplane_store::{EntryStore, StoreError};

/// `vgdisplay -c` line for a volume group with 1 TB free in 4 MB extents
pub const VGDISPLAY: &str =
    "  vg:r/w:772:-1:0:0:0:-1:0:1:1:1073741824:4096:262144:0:262144:Uy4x-Qm1\n";

pub const DEVICE_SIZE_KB: u64 = 262_144 * 4096;

pub const NO_SNAPSHOTS: &str =
    "<cliOutput><opRet>0</opRet><snapList><count>0</count></snapList></cliOutput>";

pub const BLOCK_CREATED: &str = r#"{"IQN":"iqn.2016-12.org.gluster-block:blk1","USERNAME":"user1","PASSWORD":"secret","PORTAL(S)":["s0:3260","s1:3260","s2:3260"],"RESULT":"SUCCESS"}"#;

/// `gluster volume info --xml` output reporting `bricks` bricks
pub fn volume_info_xml(name: &str, bricks: usize) -> String {
    format!(
        "<cliOutput><opRet>0</opRet><volInfo><volumes><volume><name>{name}</name>\
         <id>0d3e</id><statusStr>Started</statusStr><typeStr>Replicate</typeStr>\
         <brickCount>{bricks}</brickCount></volume></volumes></volInfo></cliOutput>"
    )
}

pub struct Harness {
    pub app: App,
    pub transport: Arc<RecordingTransport>,
    pub cluster: String,
    pub nodes: Vec<String>,
    pub devices: Vec<String>,
    _dir: TempDir,
}

/// An app over a fresh store with no topology
pub fn empty_app() -> (App, Arc<RecordingTransport>, TempDir) {
    empty_app_with(RecordingTransport::new())
}

pub fn empty_app_with(transport: RecordingTransport) -> (App, Arc<RecordingTransport>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = EntryStore::open(dir.path().join("volplane.redb")).unwrap();
    let transport = Arc::new(transport);
    transport.respond("vgdisplay", VGDISPLAY);
    transport.respond("snapshot list", NO_SNAPSHOTS);
    transport.respond("gluster-block create", BLOCK_CREATED);
    let mut config = Config::default();
    config.executor.mount_base = dir.path().join("mounts");
    let app = App::new(
        config,
        store,
        Arc::clone(&transport) as Arc<dyn RemoteCommandTransport>,
    );
    (app, transport, dir)
}

/// A file and block cluster with three nodes in three zones, one 1 TB
/// device each
pub async fn harness() -> Harness {
    harness_with(RecordingTransport::new()).await
}

pub async fn harness_with(transport: RecordingTransport) -> Harness {
    let (app, transport, dir) = empty_app_with(transport);
    let cluster = cluster::create(
        &app,
        &ClusterCreateRequest {
            file: true,
            block: true,
        },
    )
    .unwrap();

    let mut nodes = Vec::new();
    let mut devices = Vec::new();
    for i in 0..3u32 {
        let request = NodeAddRequest {
            cluster: cluster.id.clone(),
            zone: i + 1,
            manage_hostname: format!("m{i}"),
            storage_hostname: format!("s{i}"),
        };
        let prepared = node::prepare_add(&app, &request).unwrap();
        let added = node::add(&app, prepared).await.unwrap();

        let request = DeviceAddRequest {
            node: added.id.clone(),
            name: "/dev/sdb".to_string(),
        };
        let prepared = device::prepare_add(&app, &request).unwrap();
        let dev = device::add(&app, prepared).await.unwrap();
        nodes.push(added.id);
        devices.push(dev.id);
    }

    Harness {
        app,
        transport,
        cluster: cluster.id,
        nodes,
        devices,
        _dir: dir,
    }
}

/// Volume create request for a replica 3 volume of `size` GB
pub fn volume_request(name: &str, size: u64) -> VolumeCreateRequest {
    VolumeCreateRequest {
        size,
        name: name.to_string(),
        clusters: Vec::new(),
        durability: DurabilityPolicy::Replica { replica: 3 },
        gluster_volume_options: Vec::new(),
        block: false,
    }
}

pub fn device_free_kb(app: &App, id: &str) -> u64 {
    device::info(app, id).unwrap().storage.free
}

pub fn pending_operations(app: &App) -> Vec<PendingOperationEntry> {
    app.store
        .view(|tx| -> Result<Vec<PendingOperationEntry>, StoreError> { pending::list(tx) })
        .unwrap()
}
