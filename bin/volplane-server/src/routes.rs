//! HTTP surface.
//!
//! Reads and cluster changes answer directly. Everything that touches the
//! storage nodes is validated in the handler, started as a job and
//! answered with `202 Accepted` and a `Location` under the job prefix
//! (`/queue` unless configured). Polling that location reports the job:
//! `200` with `X-Pending: true` while it runs, `303` to the produced
//! resource or `204` on success, `500` with the error text on failure and
//! `404` once the handle is gone.

use crate::app::App;
use crate::jobs::JobPoll;
use crate::operations::{block_volume, cluster, device, node, snapshot, volume};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::future::Future;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};
use volplane_common::api::{
    BlockVolumeCreateRequest, BlockVolumeExpandRequest, BlockVolumeInfo, BlockVolumeList,
    BrickReplaceRequest, ClusterCreateRequest, ClusterInfo, ClusterList, DeviceAddRequest, DeviceInfo, HealInfo,
    NodeAddRequest, NodeInfo, PENDING_HEADER, SnapshotCloneRequest, SnapshotCreateRequest,
    SnapshotInfo, SnapshotList, VolumeCreateRequest, VolumeExpandRequest, VolumeInfo, VolumeList,
};
use volplane_common::{Error, Result};
use volplane_store::DbDump;

/// Error returned by handlers; rendered with the taxonomy's status code
pub struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the API router
pub fn router(app: App) -> Router {
    let queue_route = app.config.jobs.location("{id}");
    Router::new()
        .route("/clusters", post(cluster_create).get(cluster_list))
        .route("/clusters/{id}", get(cluster_info).delete(cluster_delete))
        .route("/nodes", post(node_add))
        .route("/nodes/{id}", get(node_info).delete(node_delete))
        .route("/devices", post(device_add))
        .route("/devices/{id}", get(device_info).delete(device_delete))
        .route("/volumes", post(volume_create).get(volume_list))
        .route("/volumes/{id}", get(volume_info).delete(volume_delete))
        .route("/volumes/{id}/expand", post(volume_expand))
        .route("/volumes/{id}/replacebrick", post(volume_replace_brick))
        .route("/volumes/{id}/healinfo", get(volume_heal_info))
        .route("/volumes/{id}/snapshot", post(snapshot_create))
        .route("/snapshots", get(snapshot_list))
        .route("/snapshots/{id}", get(snapshot_info).delete(snapshot_delete))
        .route("/snapshots/{id}/clone", post(snapshot_clone))
        .route("/blockvolumes", post(block_volume_create).get(block_volume_list))
        .route(
            "/blockvolumes/{id}",
            get(block_volume_info).delete(block_volume_delete),
        )
        .route("/blockvolumes/{id}/expand", post(block_volume_expand))
        .route(&queue_route, get(queue_status))
        .route("/db/dump", get(db_dump))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Start `job` and answer with its handle
fn start_job<F>(app: &App, job: F) -> Response
where
    F: Future<Output = Result<Option<String>>> + Send + 'static,
{
    let id = app.jobs.spawn(job);
    (
        StatusCode::ACCEPTED,
        [(header::LOCATION, app.config.jobs.location(&id))],
    )
        .into_response()
}

async fn queue_status(State(app): State<App>, Path(id): Path<String>) -> Response {
    match app.jobs.poll(&id) {
        JobPoll::Pending => (StatusCode::OK, [(PENDING_HEADER, "true")]).into_response(),
        JobPoll::Completed(Some(location)) => {
            (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
        }
        JobPoll::Completed(None) => StatusCode::NO_CONTENT.into_response(),
        JobPoll::Failed(message) => (StatusCode::INTERNAL_SERVER_ERROR, message).into_response(),
        JobPoll::Unknown => (StatusCode::NOT_FOUND, format!("job {id} not found")).into_response(),
    }
}

// Clusters

async fn cluster_create(
    State(app): State<App>,
    Json(request): Json<ClusterCreateRequest>,
) -> ApiResult<(StatusCode, Json<ClusterInfo>)> {
    let created = cluster::create(&app, &request)?;
    Ok((StatusCode::CREATED, Json(cluster::to_info(created))))
}

async fn cluster_list(State(app): State<App>) -> ApiResult<Json<ClusterList>> {
    Ok(Json(ClusterList {
        clusters: cluster::list(&app)?,
    }))
}

async fn cluster_info(
    State(app): State<App>,
    Path(id): Path<String>,
) -> ApiResult<Json<ClusterInfo>> {
    Ok(Json(cluster::to_info(cluster::info(&app, &id)?)))
}

async fn cluster_delete(State(app): State<App>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    cluster::delete(&app, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// Nodes

async fn node_add(
    State(app): State<App>,
    Json(request): Json<NodeAddRequest>,
) -> ApiResult<Response> {
    let prepared = node::prepare_add(&app, &request)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let added = node::add(&job_app, prepared).await?;
        Ok(Some(format!("/nodes/{}", added.id)))
    }))
}

async fn node_info(State(app): State<App>, Path(id): Path<String>) -> ApiResult<Json<NodeInfo>> {
    Ok(Json(node::to_info(node::info(&app, &id)?)))
}

async fn node_delete(State(app): State<App>, Path(id): Path<String>) -> ApiResult<Response> {
    let prepared = node::prepare_delete(&app, &id)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        node::delete(&job_app, prepared).await?;
        Ok(None)
    }))
}

// Devices

async fn device_add(
    State(app): State<App>,
    Json(request): Json<DeviceAddRequest>,
) -> ApiResult<Response> {
    let prepared = device::prepare_add(&app, &request)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let added = device::add(&job_app, prepared).await?;
        Ok(Some(format!("/devices/{}", added.id)))
    }))
}

async fn device_info(
    State(app): State<App>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeviceInfo>> {
    Ok(Json(device::to_info(device::info(&app, &id)?)))
}

async fn device_delete(State(app): State<App>, Path(id): Path<String>) -> ApiResult<Response> {
    let prepared = device::prepare_delete(&app, &id)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        device::delete(&job_app, prepared).await?;
        Ok(None)
    }))
}

// Volumes

async fn volume_create(
    State(app): State<App>,
    Json(request): Json<VolumeCreateRequest>,
) -> ApiResult<Response> {
    let plan = volume::prepare_create(&app, &request)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let created = volume::create(&job_app, plan).await?;
        Ok(Some(format!("/volumes/{}", created.id)))
    }))
}

async fn volume_list(State(app): State<App>) -> ApiResult<Json<VolumeList>> {
    Ok(Json(VolumeList {
        volumes: volume::list(&app)?,
    }))
}

async fn volume_info(
    State(app): State<App>,
    Path(id): Path<String>,
) -> ApiResult<Json<VolumeInfo>> {
    let entry = volume::info(&app, &id)?;
    Ok(Json(volume::to_info(&app, entry)?))
}

async fn volume_expand(
    State(app): State<App>,
    Path(id): Path<String>,
    Json(request): Json<VolumeExpandRequest>,
) -> ApiResult<Response> {
    let entry = volume::prepare_expand(&app, &id, request.expand_size)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let expanded = volume::expand(&job_app, entry, request.expand_size).await?;
        Ok(Some(format!("/volumes/{}", expanded.id)))
    }))
}

async fn volume_replace_brick(
    State(app): State<App>,
    Path(id): Path<String>,
    Json(request): Json<BrickReplaceRequest>,
) -> ApiResult<Response> {
    let plan = volume::prepare_replace_brick(&app, &id, &request.brick)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let volume = volume::replace_brick(&job_app, plan).await?;
        Ok(Some(format!("/volumes/{}", volume.id)))
    }))
}

async fn volume_delete(State(app): State<App>, Path(id): Path<String>) -> ApiResult<Response> {
    let entry = volume::prepare_delete(&app, &id)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        volume::delete(&job_app, entry).await?;
        Ok(None)
    }))
}

async fn volume_heal_info(
    State(app): State<App>,
    Path(id): Path<String>,
) -> ApiResult<Json<HealInfo>> {
    Ok(Json(volume::heal_info(&app, &id).await?))
}

// Snapshots

async fn snapshot_create(
    State(app): State<App>,
    Path(volume_id): Path<String>,
    Json(request): Json<SnapshotCreateRequest>,
) -> ApiResult<Response> {
    let prepared = snapshot::prepare_create(&app, &volume_id, &request)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let created = snapshot::create(&job_app, prepared).await?;
        Ok(Some(format!("/snapshots/{}", created.id)))
    }))
}

async fn snapshot_list(State(app): State<App>) -> ApiResult<Json<SnapshotList>> {
    Ok(Json(SnapshotList {
        snapshots: snapshot::list(&app)?,
    }))
}

async fn snapshot_info(
    State(app): State<App>,
    Path(id): Path<String>,
) -> ApiResult<Json<SnapshotInfo>> {
    Ok(Json(snapshot::to_info(snapshot::info(&app, &id)?)))
}

async fn snapshot_clone(
    State(app): State<App>,
    Path(id): Path<String>,
    Json(request): Json<SnapshotCloneRequest>,
) -> ApiResult<Response> {
    let plan = snapshot::prepare_clone(&app, &id, &request)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let cloned = snapshot::clone(&job_app, plan).await?;
        Ok(Some(format!("/volumes/{}", cloned.id)))
    }))
}

async fn snapshot_delete(State(app): State<App>, Path(id): Path<String>) -> ApiResult<Response> {
    let entry = snapshot::prepare_delete(&app, &id)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        snapshot::delete(&job_app, entry).await?;
        Ok(None)
    }))
}

// Block volumes

async fn block_volume_create(
    State(app): State<App>,
    Json(request): Json<BlockVolumeCreateRequest>,
) -> ApiResult<Response> {
    let plan = block_volume::prepare_create(&app, &request)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let created = block_volume::create(&job_app, plan).await?;
        Ok(Some(format!("/blockvolumes/{}", created.id)))
    }))
}

async fn block_volume_list(State(app): State<App>) -> ApiResult<Json<BlockVolumeList>> {
    Ok(Json(BlockVolumeList {
        block_volumes: block_volume::list(&app)?,
    }))
}

async fn block_volume_info(
    State(app): State<App>,
    Path(id): Path<String>,
) -> ApiResult<Json<BlockVolumeInfo>> {
    Ok(Json(block_volume::to_info(block_volume::info(&app, &id)?)))
}

async fn block_volume_expand(
    State(app): State<App>,
    Path(id): Path<String>,
    Json(request): Json<BlockVolumeExpandRequest>,
) -> ApiResult<Response> {
    let entry = block_volume::prepare_expand(&app, &id, request.new_size)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        let expanded = block_volume::expand(&job_app, entry, request.new_size).await?;
        Ok(Some(format!("/blockvolumes/{}", expanded.id)))
    }))
}

async fn block_volume_delete(
    State(app): State<App>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let entry = block_volume::prepare_delete(&app, &id)?;
    let job_app = app.clone();
    Ok(start_job(&app, async move {
        block_volume::delete(&job_app, entry).await?;
        Ok(None)
    }))
}

// Database

async fn db_dump(State(app): State<App>) -> ApiResult<Json<DbDump>> {
    Ok(Json(app.store.export()?))
}
