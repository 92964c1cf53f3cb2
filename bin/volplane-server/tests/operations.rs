//! End-to-end operation tests against a recording transport

mod common;

use common::{
    DEVICE_SIZE_KB, device_free_kb, harness, harness_with, pending_operations, volume_request,
};
use std::time::Duration;
use volplane_common::api::{BlockVolumeCreateRequest, DeviceAddRequest, NodeAddRequest};
use volplane_common::{DurabilityPolicy, Error, KB_PER_GB};
use volplane_executor::testing::RecordingTransport;
use volplane_server::operations::{block_volume, cluster, device, node, volume};
use volplane_server::{App, recover};
use volplane_store::entries::{brick_footprint_kb, remove_id};
use volplane_store::pending::{self, PendingAction, PendingChange};
use volplane_store::{ClusterEntry, EntryReader, NodeEntry, StoreError};

async fn add_bare_node(app: &App, cluster: &str, i: u32) -> NodeEntry {
    let request = NodeAddRequest {
        cluster: cluster.to_string(),
        zone: i + 1,
        manage_hostname: format!("m{i}"),
        storage_hostname: format!("s{i}"),
    };
    let prepared = node::prepare_add(app, &request).unwrap();
    node::add(app, prepared).await.unwrap()
}

fn device_request(node: &NodeEntry) -> DeviceAddRequest {
    DeviceAddRequest {
        node: node.id.clone(),
        name: "/dev/sdc".to_string(),
    }
}

#[tokio::test]
async fn test_volume_create_runs_bricks_then_volume() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    assert_eq!(created.bricks.len(), 3);
    assert_eq!(created.cluster_id, h.cluster);
    assert_eq!(h.transport.commands_matching("lvcreate").len(), 3);
    assert_eq!(h.transport.commands_matching("mkfs.xfs").len(), 3);
    let creates = h.transport.commands_matching("volume create vol1");
    assert_eq!(creates.len(), 1);
    assert!(creates[0].contains("replica 3"));
    assert_eq!(h.transport.commands_matching("volume start vol1").len(), 1);

    let footprint = brick_footprint_kb(10 * KB_PER_GB);
    for id in &h.devices {
        assert_eq!(device_free_kb(&h.app, id), DEVICE_SIZE_KB - footprint);
    }
    assert!(pending_operations(&h.app).is_empty());

    let info = volume::to_info(&h.app, volume::info(&h.app, &created.id).unwrap()).unwrap();
    assert_eq!(info.name, "vol1");
    assert_eq!(info.bricks.len(), 3);
    assert!(info.mount.ends_with(":vol1"));
    assert_eq!(volume::list(&h.app).unwrap(), vec![created.id]);
}

#[tokio::test]
async fn test_volume_create_failure_compensates() {
    let h = harness().await;
    h.transport.fail_on("volume start", "volume start: vol1: failed");

    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let err = volume::create(&h.app, plan).await.unwrap_err();
    assert!(matches!(err, Error::RemoteExecution { .. }), "{err}");

    // Partial volume and bricks are removed again
    assert_eq!(h.transport.commands_matching("volume stop vol1").len(), 1);
    assert_eq!(h.transport.commands_matching("volume delete vol1").len(), 1);
    assert_eq!(h.transport.commands_matching("umount").len(), 3);

    assert!(volume::list(&h.app).unwrap().is_empty());
    for id in &h.devices {
        assert_eq!(device_free_kb(&h.app, id), DEVICE_SIZE_KB);
    }
    assert!(pending_operations(&h.app).is_empty());

    // The name is free again
    h.transport.clear_rules();
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    volume::create(&h.app, plan).await.unwrap();
}

#[tokio::test]
async fn test_brick_failure_destroys_created_bricks() {
    let h = harness().await;
    h.transport.fail_on("mkfs.xfs", "mkfs failed");

    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    assert!(volume::create(&h.app, plan).await.is_err());

    assert!(h.transport.commands_matching("volume create").is_empty());
    assert!(volume::list(&h.app).unwrap().is_empty());
    for id in &h.devices {
        assert_eq!(device_free_kb(&h.app, id), DEVICE_SIZE_KB);
    }
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_duplicate_volume_name_is_conflict() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    volume::create(&h.app, plan).await.unwrap();

    let err = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_volume_too_large_is_no_space() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("big", 2000)).unwrap();
    let err = volume::create(&h.app, plan).await.unwrap_err();
    assert!(matches!(err, Error::NoSpace(_)), "{err}");
    assert!(h.transport.commands_matching("lvcreate").is_empty());
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let h = harness().await;
    let mut request = volume_request("vol1", 0);
    assert!(matches!(
        volume::prepare_create(&h.app, &request),
        Err(Error::Validation(_))
    ));

    request.size = 10;
    request.durability = DurabilityPolicy::Replica { replica: 0 };
    assert!(matches!(
        volume::prepare_create(&h.app, &request),
        Err(Error::Validation(_))
    ));

    request.durability = DurabilityPolicy::Dispersion {
        data: u32::MAX,
        redundancy: 1,
    };
    assert!(matches!(
        volume::prepare_create(&h.app, &request),
        Err(Error::Validation(_))
    ));

    request.durability = DurabilityPolicy::Replica { replica: 3 };
    request.gluster_volume_options = vec!["performance.readdir-ahead".to_string()];
    assert!(matches!(
        volume::prepare_create(&h.app, &request),
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_volume_expand_adds_a_set() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    let entry = volume::prepare_expand(&h.app, &created.id, 10).unwrap();
    let expanded = volume::expand(&h.app, entry, 10).await.unwrap();

    assert_eq!(expanded.size_gb, 20);
    assert_eq!(expanded.bricks.len(), 6);
    assert_eq!(h.transport.commands_matching("add-brick vol1").len(), 1);
    assert!(h.transport.commands_matching("rebalance").is_empty());
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_expand_records_stored_brick_count() {
    let h = harness_with(RecordingTransport::new().with_delay(Duration::from_millis(20))).await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    // Both requests validated against the three-brick volume
    let first = volume::prepare_expand(&h.app, &created.id, 10).unwrap();
    let second = volume::prepare_expand(&h.app, &created.id, 10).unwrap();
    assert_eq!(second.bricks.len(), 3);
    volume::expand(&h.app, first, 10).await.unwrap();

    let (expanded, recorded) = tokio::join!(volume::expand(&h.app, second, 10), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        pending_operations(&h.app)
    });
    assert_eq!(recorded.len(), 1);
    assert!(matches!(
        recorded[0].changes[0],
        PendingChange::ExpandVolume {
            previous_brick_count: 6,
            ..
        }
    ));

    let expanded = expanded.unwrap();
    assert_eq!(expanded.bricks.len(), 9);
    assert_eq!(expanded.size_gb, 30);
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_replace_brick_moves_brick_to_new_node() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    // Every node already holds a brick of the only set
    let old_id = created.bricks[0].clone();
    let plan = volume::prepare_replace_brick(&h.app, &created.id, &old_id).unwrap();
    let err = volume::replace_brick(&h.app, plan).await.unwrap_err();
    assert!(matches!(err, Error::NoSpace(_)), "{err}");
    assert!(pending_operations(&h.app).is_empty());

    let m3 = add_bare_node(&h.app, &h.cluster, 3).await;
    let dev = device::prepare_add(&h.app, &device_request(&m3)).unwrap();
    let spare = device::add(&h.app, dev).await.unwrap();
    let info = volume::to_info(&h.app, created.clone()).unwrap();
    let old_device = info.bricks[0].device.clone();
    let old_path = info.bricks[0].path.clone();

    let plan = volume::prepare_replace_brick(&h.app, &created.id, &old_id).unwrap();
    let replaced = volume::replace_brick(&h.app, plan).await.unwrap();

    assert_eq!(replaced.bricks.len(), 3);
    assert_ne!(replaced.bricks[0], old_id);
    assert_eq!(replaced.bricks[1..], created.bricks[1..]);
    let replaces = h.transport.commands_matching("volume replace-brick vol1 ");
    assert_eq!(replaces.len(), 1);
    assert!(replaces[0].contains(&format!(":{old_path} s3:")), "{}", replaces[0]);
    assert!(replaces[0].ends_with("commit force"));
    assert_eq!(h.transport.commands_matching("lvremove").len(), 2);

    let footprint = brick_footprint_kb(10 * KB_PER_GB);
    assert_eq!(device_free_kb(&h.app, &old_device), DEVICE_SIZE_KB);
    assert!(device::info(&h.app, &old_device).unwrap().bricks.is_empty());
    let spare = device::info(&h.app, &spare.id).unwrap();
    assert_eq!(spare.bricks, vec![replaced.bricks[0].clone()]);
    assert_eq!(spare.storage.free, spare.storage.total - footprint);
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_failed_replace_brick_removes_new_brick() {
    let h = harness().await;
    h.transport
        .fail_on("replace-brick", "volume replace-brick: failed: Commit failed on s3");
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();
    let m3 = add_bare_node(&h.app, &h.cluster, 3).await;
    let dev = device::prepare_add(&h.app, &device_request(&m3)).unwrap();
    let spare = device::add(&h.app, dev).await.unwrap();

    let plan = volume::prepare_replace_brick(&h.app, &created.id, &created.bricks[1]).unwrap();
    let err = volume::replace_brick(&h.app, plan).await.unwrap_err();
    assert!(err.to_string().contains("Commit failed"), "{err}");

    assert_eq!(volume::info(&h.app, &created.id).unwrap().bricks, created.bricks);
    assert_eq!(h.transport.commands_matching("lvremove").len(), 2);
    let spare = device::info(&h.app, &spare.id).unwrap();
    assert!(spare.bricks.is_empty());
    assert_eq!(spare.storage.free, spare.storage.total);
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_replace_brick_requests_are_checked() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();
    let err = volume::prepare_replace_brick(&h.app, &created.id, "missing").unwrap_err();
    assert!(err.is_not_found());

    let mut request = volume_request("plain", 10);
    request.durability = DurabilityPolicy::None;
    let plan = volume::prepare_create(&h.app, &request).unwrap();
    let plain = volume::create(&h.app, plan).await.unwrap();
    let err = volume::prepare_replace_brick(&h.app, &plain.id, &plain.bricks[0]).unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_volume_delete_releases_space() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    let entry = volume::prepare_delete(&h.app, &created.id).unwrap();
    volume::delete(&h.app, entry).await.unwrap();

    assert_eq!(h.transport.commands_matching("snapshot list vol1").len(), 1);
    assert_eq!(h.transport.commands_matching("volume stop vol1").len(), 1);
    assert_eq!(h.transport.commands_matching("volume delete vol1").len(), 1);
    assert_eq!(h.transport.commands_matching("lvremove").len(), 6);

    assert!(volume::info(&h.app, &created.id).unwrap_err().is_not_found());
    assert!(cluster::info(&h.app, &h.cluster).unwrap().volumes.is_empty());
    for id in &h.devices {
        let info = device::info(&h.app, id).unwrap();
        assert_eq!(info.storage.free, DEVICE_SIZE_KB);
        assert!(info.bricks.is_empty());
    }

    // Name can be reused
    volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
}

#[tokio::test]
async fn test_volume_with_snapshots_is_not_deleted() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    h.transport.clear_rules();
    h.transport.respond(
        "snapshot list",
        "<cliOutput><opRet>0</opRet><snapList><count>2</count></snapList></cliOutput>",
    );
    let entry = volume::prepare_delete(&h.app, &created.id).unwrap();
    let err = volume::delete(&h.app, entry).await.unwrap_err();

    assert!(err.is_conflict(), "{err}");
    assert!(h.transport.commands_matching("volume delete").is_empty());
    assert!(volume::info(&h.app, &created.id).is_ok());
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_pending_target_is_conflict() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    h.app
        .store
        .update(|tx| {
            pending::begin(
                tx,
                PendingAction::DeleteVolume,
                vec![created.id.clone()],
                Vec::new(),
            )
        })
        .unwrap();

    assert!(volume::prepare_delete(&h.app, &created.id).unwrap_err().is_conflict());
    assert!(volume::prepare_expand(&h.app, &created.id, 10).unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_concurrent_deletes_have_one_winner() {
    let h = harness_with(RecordingTransport::new().with_delay(Duration::from_millis(20))).await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    let first = volume::prepare_delete(&h.app, &created.id).unwrap();
    let second = volume::prepare_delete(&h.app, &created.id).unwrap();
    let (a, b) = tokio::join!(
        volume::delete(&h.app, first),
        volume::delete(&h.app, second)
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| r.as_ref().is_err_and(Error::is_conflict))
    );
    assert_eq!(h.transport.commands_matching("volume delete vol1").len(), 1);
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_block_volume_creates_hosting_volume() {
    let h = harness().await;
    let request = BlockVolumeCreateRequest {
        size: 5,
        name: "blk1".to_string(),
        clusters: Vec::new(),
        hacount: 0,
        auth: true,
    };
    let plan = block_volume::prepare_create(&h.app, &request).unwrap();
    let first = block_volume::create(&h.app, plan).await.unwrap();

    assert_eq!(first.hacount, 3);
    assert_eq!(first.hosts.len(), 3);
    assert_eq!(first.iqn, "iqn.2016-12.org.gluster-block:blk1");
    assert_eq!(first.username, "user1");
    let creates = h.transport.commands_matching("gluster-block create");
    assert_eq!(creates.len(), 1);
    assert!(creates[0].contains("auth enable"));
    assert!(creates[0].contains("5GiB"));

    let volumes = volume::list(&h.app).unwrap();
    assert_eq!(volumes.len(), 1);
    let hosting = volume::info(&h.app, &volumes[0]).unwrap();
    assert!(hosting.block);
    assert_eq!(hosting.size_gb, 100);
    assert_eq!(hosting.block_info.free_size_gb, 95);
    assert_eq!(hosting.block_info.reserved_size_gb, 0);
    assert_eq!(hosting.block_info.block_volumes, vec![first.id.clone()]);
    assert_eq!(
        h.transport
            .commands_matching("volume set")
            .iter()
            .filter(|c| c.contains("group gluster-block"))
            .count(),
        1
    );

    // A second block volume reuses the hosting volume
    let request = BlockVolumeCreateRequest {
        name: "blk2".to_string(),
        ..request
    };
    let plan = block_volume::prepare_create(&h.app, &request).unwrap();
    let second = block_volume::create(&h.app, plan).await.unwrap();
    assert_eq!(second.hosting_volume_id, hosting.id);
    assert_eq!(volume::list(&h.app).unwrap().len(), 1);

    // The hosting volume cannot go while it holds block volumes
    assert!(volume::prepare_delete(&h.app, &hosting.id).unwrap_err().is_conflict());

    let entry = block_volume::prepare_delete(&h.app, &first.id).unwrap();
    block_volume::delete(&h.app, entry).await.unwrap();
    assert_eq!(
        h.transport
            .commands_matching(&format!("gluster-block delete {}/blk1", hosting.name))
            .len(),
        1
    );
    let hosting = volume::info(&h.app, &hosting.id).unwrap();
    assert_eq!(hosting.block_info.free_size_gb, 95);
    assert_eq!(hosting.block_info.block_volumes, vec![second.id.clone()]);
    assert_eq!(block_volume::list(&h.app).unwrap(), vec![second.id]);
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_block_volume_failure_releases_hosting_space() {
    let h = harness().await;
    let request = BlockVolumeCreateRequest {
        size: 5,
        name: "blk1".to_string(),
        clusters: Vec::new(),
        hacount: 0,
        auth: false,
    };
    let plan = block_volume::prepare_create(&h.app, &request).unwrap();
    block_volume::create(&h.app, plan).await.unwrap();

    h.transport.clear_rules();
    h.transport.respond(
        "gluster-block create",
        r#"{"RESULT":"FAIL","errMsg":"target creation failed"}"#,
    );
    let request = BlockVolumeCreateRequest {
        name: "blk2".to_string(),
        ..request
    };
    let plan = block_volume::prepare_create(&h.app, &request).unwrap();
    let err = block_volume::create(&h.app, plan).await.unwrap_err();
    assert!(err.to_string().contains("target creation failed"), "{err}");

    assert_eq!(h.transport.commands_matching("gluster-block delete").len(), 1);
    let hosting = volume::info(&h.app, &volume::list(&h.app).unwrap()[0]).unwrap();
    assert_eq!(hosting.block_info.free_size_gb, 95);
    assert_eq!(hosting.block_info.reserved_size_gb, 0);
    assert_eq!(block_volume::list(&h.app).unwrap().len(), 1);
}

#[tokio::test]
async fn test_topology_changes_respect_dependencies() {
    let h = harness().await;
    assert_eq!(h.transport.commands_matching(" peer ").len(), 2);
    assert_eq!(h.transport.commands_matching("vgcreate").len(), 3);

    let duplicate = NodeAddRequest {
        cluster: h.cluster.clone(),
        zone: 1,
        manage_hostname: "m0".to_string(),
        storage_hostname: "other".to_string(),
    };
    assert!(node::prepare_add(&h.app, &duplicate).unwrap_err().is_conflict());

    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    assert!(device::prepare_delete(&h.app, &h.devices[0]).unwrap_err().is_conflict());
    assert!(node::prepare_delete(&h.app, &h.nodes[0]).unwrap_err().is_conflict());
    assert!(cluster::delete(&h.app, &h.cluster).unwrap_err().is_conflict());

    let entry = volume::prepare_delete(&h.app, &created.id).unwrap();
    volume::delete(&h.app, entry).await.unwrap();

    let entry = device::prepare_delete(&h.app, &h.devices[0]).unwrap();
    device::delete(&h.app, entry).await.unwrap();
    assert_eq!(h.transport.commands_matching("vgremove").len(), 1);

    let entry = node::prepare_delete(&h.app, &h.nodes[0]).unwrap();
    node::delete(&h.app, entry).await.unwrap();
    assert_eq!(h.transport.commands_matching("peer detach s0").len(), 1);

    let cluster = cluster::info(&h.app, &h.cluster).unwrap();
    assert_eq!(cluster.nodes.len(), 2);
    assert!(pending_operations(&h.app).is_empty());

    // The hostnames are free again
    node::prepare_add(&h.app, &duplicate).unwrap();
}

#[tokio::test]
async fn test_delete_interrupted_after_volume_destroy_is_finished_by_recovery() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    h.transport.unreachable_on("umount");
    let entry = volume::prepare_delete(&h.app, &created.id).unwrap();
    let err = volume::delete(&h.app, entry).await.unwrap_err();
    assert!(matches!(err, Error::Incomplete { .. }), "{err}");

    // The record stays so nobody else touches the half-deleted volume
    let ops = pending_operations(&h.app);
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].action, PendingAction::DeleteVolume);
    assert!(volume::info(&h.app, &created.id).is_ok());
    assert!(volume::prepare_delete(&h.app, &created.id).unwrap_err().is_conflict());

    h.transport.clear_rules();
    h.transport.fail_on("volume stop", "volume stop: vol1: failed: Volume vol1 does not exist");
    h.transport.fail_on("volume delete", "volume delete: vol1: failed: Volume vol1 does not exist");
    let report = recover(&h.app).await.unwrap();
    assert_eq!(report.completed, vec![ops[0].id.clone()]);

    assert!(volume::info(&h.app, &created.id).unwrap_err().is_not_found());
    for id in &h.devices {
        assert_eq!(device_free_kb(&h.app, id), DEVICE_SIZE_KB);
    }
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_delete_failed_before_completion_can_be_retried() {
    let h = harness().await;
    let plan = volume::prepare_create(&h.app, &volume_request("vol1", 10)).unwrap();
    let created = volume::create(&h.app, plan).await.unwrap();

    // The delete reached the node but the answer was lost
    h.transport.unreachable_on("volume delete");
    let entry = volume::prepare_delete(&h.app, &created.id).unwrap();
    let err = volume::delete(&h.app, entry).await.unwrap_err();
    assert!(matches!(err, Error::RemoteExecution { .. }), "{err}");
    assert!(pending_operations(&h.app).is_empty());

    h.transport.clear_rules();
    h.transport.fail_on("snapshot list", "Volume (vol1) does not exist");
    h.transport.fail_on("volume stop", "volume stop: vol1: failed: Volume vol1 does not exist");
    h.transport.fail_on("volume delete", "volume delete: vol1: failed: Volume vol1 does not exist");
    let entry = volume::prepare_delete(&h.app, &created.id).unwrap();
    volume::delete(&h.app, entry).await.unwrap();

    assert!(volume::info(&h.app, &created.id).unwrap_err().is_not_found());
    for id in &h.devices {
        assert_eq!(device_free_kb(&h.app, id), DEVICE_SIZE_KB);
    }
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_node_delete_and_device_add_exclude_each_other() {
    let h = harness_with(RecordingTransport::new().with_delay(Duration::from_millis(20))).await;
    let m3 = add_bare_node(&h.app, &h.cluster, 3).await;
    let m4 = add_bare_node(&h.app, &h.cluster, 4).await;

    // Device add first: the node delete must not pull the node away
    let dev = device::prepare_add(&h.app, &device_request(&m3)).unwrap();
    let gone = node::prepare_delete(&h.app, &m3.id).unwrap();
    let (added, deleted) = tokio::join!(device::add(&h.app, dev), node::delete(&h.app, gone));
    let added = added.unwrap();
    assert!(deleted.unwrap_err().is_conflict());
    assert_eq!(node::info(&h.app, &m3.id).unwrap().devices, vec![added.id]);

    // Node delete first: the device has nowhere to go
    let gone = node::prepare_delete(&h.app, &m4.id).unwrap();
    let dev = device::prepare_add(&h.app, &device_request(&m4)).unwrap();
    let (deleted, added) = tokio::join!(node::delete(&h.app, gone), device::add(&h.app, dev));
    deleted.unwrap();
    assert!(added.unwrap_err().is_conflict());
    assert!(node::info(&h.app, &m4.id).unwrap_err().is_not_found());

    assert_eq!(h.transport.commands_matching("vgcreate").len(), 4);
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_pending_block_volume_blocks_hosting_volume_delete() {
    let h = harness_with(RecordingTransport::new().with_delay(Duration::from_millis(20))).await;
    let request = BlockVolumeCreateRequest {
        size: 5,
        name: "blk1".to_string(),
        clusters: Vec::new(),
        hacount: 0,
        auth: false,
    };
    let plan = block_volume::prepare_create(&h.app, &request).unwrap();
    let first = block_volume::create(&h.app, plan).await.unwrap();
    let entry = block_volume::prepare_delete(&h.app, &first.id).unwrap();
    block_volume::delete(&h.app, entry).await.unwrap();

    let hosting = volume::info(&h.app, &first.hosting_volume_id).unwrap();
    let request = BlockVolumeCreateRequest {
        name: "blk2".to_string(),
        ..request
    };
    let plan = block_volume::prepare_create(&h.app, &request).unwrap();
    let entry = volume::prepare_delete(&h.app, &hosting.id).unwrap();
    let (created, deleted) = tokio::join!(
        block_volume::create(&h.app, plan),
        volume::delete(&h.app, entry)
    );
    let created = created.unwrap();
    assert!(deleted.unwrap_err().is_conflict());
    assert!(h.transport.commands_matching("volume delete").is_empty());

    let hosting = volume::info(&h.app, &hosting.id).unwrap();
    assert_eq!(hosting.block_info.block_volumes, vec![created.id]);
    assert!(pending_operations(&h.app).is_empty());
}

#[tokio::test]
async fn test_failed_commit_keeps_marker_for_recovery() {
    let h = harness_with(RecordingTransport::new().with_delay(Duration::from_millis(50))).await;
    let m3 = add_bare_node(&h.app, &h.cluster, 3).await;
    let dev = device::prepare_add(&h.app, &device_request(&m3)).unwrap();

    // The node disappears from the store while its device is being set up
    let remove_node = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.app
            .store
            .update(|tx| -> Result<(), StoreError> {
                let mut cluster: ClusterEntry = tx.load(&h.cluster)?;
                remove_id(&mut cluster.nodes, &m3.id);
                tx.save(&cluster)?;
                tx.delete::<NodeEntry>(&m3.id)?;
                Ok(())
            })
            .unwrap();
    };
    let (added, ()) = tokio::join!(device::add(&h.app, dev.clone()), remove_node);
    let err = added.unwrap_err();
    assert!(matches!(err, Error::CommitFailed { .. }), "{err}");

    let ops = pending_operations(&h.app);
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].action, PendingAction::AddDevice);
    assert_eq!(ops[0].targets, vec![dev.id.clone()]);

    let report = recover(&h.app).await.unwrap();
    assert_eq!(report.rolled_back, vec![ops[0].id.clone()]);
    let teardown = h.transport.commands_matching(&format!("vgremove -qq {}", dev.vg_name()));
    assert_eq!(teardown.len(), 1);
    assert!(device::info(&h.app, &dev.id).unwrap_err().is_not_found());
    assert!(pending_operations(&h.app).is_empty());
}
