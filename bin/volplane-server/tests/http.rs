//! The HTTP API driven through the client library

mod common;

use common::{empty_app, volume_request};
use std::time::Duration;
use tokio::net::TcpListener;
use volplane_client::{Client, ClientError};
use volplane_common::api::{
    BlockVolumeCreateRequest, BlockVolumeExpandRequest, BrickReplaceRequest, ClusterCreateRequest,
    DeviceAddRequest, NodeAddRequest, SnapshotCloneRequest, SnapshotCreateRequest,
    VolumeExpandRequest,
};
use volplane_server::{App, router};

async fn serve(app: App) -> Client {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(app)).await.unwrap();
    });
    Client::new(format!("http://{addr}"))
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
}

/// Cluster of three nodes with one device each, built over HTTP
async fn build_cluster(client: &Client) -> String {
    let cluster = client
        .cluster_create(&ClusterCreateRequest {
            file: true,
            block: true,
        })
        .await
        .unwrap();
    for i in 0..3u32 {
        let node = client
            .node_add(&NodeAddRequest {
                cluster: cluster.id.clone(),
                zone: i + 1,
                manage_hostname: format!("m{i}"),
                storage_hostname: format!("s{i}"),
            })
            .await
            .unwrap();
        assert_eq!(node.manage_hostname, format!("m{i}"));
        client
            .device_add(&DeviceAddRequest {
                node: node.id,
                name: "/dev/sdb".to_string(),
            })
            .await
            .unwrap();
    }
    cluster.id
}

#[tokio::test]
async fn test_volume_lifecycle_over_http() {
    let (app, transport, _dir) = empty_app();
    let client = serve(app).await;
    let cluster = build_cluster(&client).await;

    let info = client.cluster_info(&cluster).await.unwrap();
    assert_eq!(info.nodes.len(), 3);

    let volume = client
        .volume_create(&volume_request("vol1", 10))
        .await
        .unwrap();
    assert_eq!(volume.name, "vol1");
    assert_eq!(volume.bricks.len(), 3);
    assert!(volume.mount.ends_with(":vol1"));
    assert_eq!(transport.commands_matching("volume start vol1").len(), 1);

    let expanded = client
        .volume_expand(&volume.id, &VolumeExpandRequest { expand_size: 10 })
        .await
        .unwrap();
    assert_eq!(expanded.size, 20);
    assert_eq!(expanded.bricks.len(), 6);

    assert_eq!(client.volume_list().await.unwrap().volumes, vec![volume.id.clone()]);

    let dump = client.db_dump().await.unwrap();
    assert_eq!(dump["volumes"].as_array().unwrap().len(), 1);
    assert_eq!(dump["bricks"].as_array().unwrap().len(), 6);

    client.volume_delete(&volume.id).await.unwrap();
    assert!(client.volume_list().await.unwrap().volumes.is_empty());
    match client.volume_info(&volume.id).await {
        Err(ClientError::Api { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected 404, got {other:?}"),
    }
}

#[tokio::test]
async fn test_replace_brick_over_http() {
    let (app, transport, _dir) = empty_app();
    let client = serve(app).await;
    let cluster = build_cluster(&client).await;
    let volume = client
        .volume_create(&volume_request("vol1", 10))
        .await
        .unwrap();

    let missing = BrickReplaceRequest {
        brick: "missing".to_string(),
    };
    match client.volume_replace_brick(&volume.id, &missing).await {
        Err(ClientError::Api { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected 404, got {other:?}"),
    }

    let spare = client
        .node_add(&NodeAddRequest {
            cluster,
            zone: 4,
            manage_hostname: "m3".to_string(),
            storage_hostname: "s3".to_string(),
        })
        .await
        .unwrap();
    client
        .device_add(&DeviceAddRequest {
            node: spare.id.clone(),
            name: "/dev/sdb".to_string(),
        })
        .await
        .unwrap();

    let old = volume.bricks[1].id.clone();
    let replaced = client
        .volume_replace_brick(&volume.id, &BrickReplaceRequest { brick: old.clone() })
        .await
        .unwrap();
    assert_eq!(replaced.bricks.len(), 3);
    assert_ne!(replaced.bricks[1].id, old);
    assert_eq!(replaced.bricks[1].node, spare.id);
    assert_eq!(transport.commands_matching("volume replace-brick vol1").len(), 1);
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let (app, transport, _dir) = empty_app();
    let client = serve(app).await;
    build_cluster(&client).await;
    transport.fail_on("volume start", "volume start: vol1: failed");

    match client.volume_create(&volume_request("vol1", 10)).await {
        Err(ClientError::JobFailed(message)) => {
            assert!(message.contains("volume start: vol1: failed"), "{message}");
        }
        other => panic!("expected a failed job, got {other:?}"),
    }
    assert!(client.volume_list().await.unwrap().volumes.is_empty());
}

#[tokio::test]
async fn test_request_errors_map_to_status() {
    let (app, _transport, _dir) = empty_app();
    let client = serve(app).await;

    // No cluster accepts the volume yet
    match client.volume_create(&volume_request("vol1", 10)).await {
        Err(ClientError::Api { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected 503, got {other:?}"),
    }

    let cluster = build_cluster(&client).await;
    match client.volume_create(&volume_request("vol1", 0)).await {
        Err(ClientError::Api { status, .. }) => assert_eq!(status, 400),
        other => panic!("expected 400, got {other:?}"),
    }
    match client.cluster_delete(&cluster).await {
        Err(ClientError::Api { status, .. }) => assert_eq!(status, 409),
        other => panic!("expected 409, got {other:?}"),
    }
    match client.poll_job("/queue/missing").await {
        Err(ClientError::UnknownJob(_)) => {}
        other => panic!("expected unknown job, got {other:?}"),
    }
}

#[tokio::test]
async fn test_block_volume_over_http() {
    let (app, transport, _dir) = empty_app();
    let client = serve(app).await;
    build_cluster(&client).await;

    let block = client
        .block_volume_create(&BlockVolumeCreateRequest {
            size: 5,
            name: "blk1".to_string(),
            clusters: Vec::new(),
            hacount: 2,
            auth: false,
        })
        .await
        .unwrap();
    assert_eq!(block.hacount, 2);
    assert_eq!(block.hosts.len(), 2);
    assert!(!block.iqn.is_empty());
    assert_eq!(
        client.block_volume_list().await.unwrap().block_volumes,
        vec![block.id.clone()]
    );

    transport.respond(
        "gluster-block modify",
        r#"{"IQN":"iqn.2016-12.org.gluster-block:blk1","SIZE":"7.0 GiB","RESULT":"SUCCESS"}"#,
    );
    let grown = client
        .block_volume_expand(&block.id, &BlockVolumeExpandRequest { new_size: 7 })
        .await
        .unwrap();
    assert_eq!(grown.size, 7);

    client.block_volume_delete(&block.id).await.unwrap();
    assert_eq!(transport.commands_matching("gluster-block delete").len(), 1);
    assert!(client.block_volume_list().await.unwrap().block_volumes.is_empty());
}

#[tokio::test]
async fn test_snapshot_and_clone_over_http() {
    let (app, transport, _dir) = empty_app();
    transport.respond(
        "snapshot ",
        "<cliOutput><opRet>0</opRet><opErrno>0</opErrno><opErrstr/></cliOutput>",
    );
    let client = serve(app).await;
    build_cluster(&client).await;
    let volume = client
        .volume_create(&volume_request("vol1", 10))
        .await
        .unwrap();

    let snap = client
        .snapshot_create(
            &volume.id,
            &SnapshotCreateRequest {
                name: "snap1".to_string(),
                description: String::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(snap.name, "snap1");
    assert_eq!(snap.volume, volume.id);
    assert_eq!(client.snapshot_list().await.unwrap().snapshots, vec![snap.id.clone()]);

    let clone = client
        .snapshot_clone(
            &snap.id,
            &SnapshotCloneRequest {
                name: "clone1".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(clone.clone_of.as_deref(), Some(volume.id.as_str()));
    assert_eq!(client.volume_info(&volume.id).await.unwrap().snapshots, vec![snap.id.clone()]);

    // Snapshots and clones keep the origin alive
    match client.volume_delete(&volume.id).await {
        Err(ClientError::Api { status, .. }) => assert_eq!(status, 409),
        other => panic!("expected 409, got {other:?}"),
    }

    client.volume_delete(&clone.id).await.unwrap();
    client.snapshot_delete(&snap.id).await.unwrap();
    client.volume_delete(&volume.id).await.unwrap();
    assert!(client.snapshot_list().await.unwrap().snapshots.is_empty());
    assert!(client.volume_list().await.unwrap().volumes.is_empty());
}
