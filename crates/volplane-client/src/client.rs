//! Volplane API client.
//!
//! Long-running operations answer `202 Accepted` with a job handle in the
//! `Location` header. [`Client::wait_for_job`] polls the handle: a pending
//! job answers `200` with `X-Pending: true`, a finished job redirects
//! (`303`) to the resource it produced or answers `204` when there is none,
//! and a failed job answers with an error status and message.

use crate::error::ClientError;
use crate::retry::{RetryPolicy, retry_rate_limited};
use reqwest::header::LOCATION;
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;
use volplane_common::api::{
    BlockVolumeCreateRequest, BlockVolumeExpandRequest, BlockVolumeInfo, BlockVolumeList,
    BrickReplaceRequest, ClusterCreateRequest, ClusterInfo, ClusterList, DeviceAddRequest, DeviceInfo, HealInfo,
    NodeAddRequest, NodeInfo, PENDING_HEADER, SnapshotCloneRequest, SnapshotCreateRequest,
    SnapshotInfo, SnapshotList, VolumeCreateRequest, VolumeExpandRequest, VolumeInfo, VolumeList,
};

/// Upper bound on requests in flight from one client
pub const MAX_CONCURRENT_REQUESTS: usize = 32;

/// Single observation of a job handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// Finished; carries the resource location if the job produced one
    Completed(Option<String>),
    Failed(String),
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    poll_interval: Duration,
    throttle: Arc<Semaphore>,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        // Redirects are job results; follow them explicitly
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            throttle: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ClientError> {
        let _permit = self
            .throttle
            .acquire()
            .await
            .map_err(|_| ClientError::Closed)?;
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        Ok(response)
    }

    /// Send a request. Idempotent methods are retried while the server
    /// rate limits them; a rate-limited `POST` is returned as
    /// [`ClientError::RateLimited`].
    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ClientError> {
        let url = self.url(path);
        let body = body.map(serde_json::to_value).transpose()?;
        if !method.is_idempotent() {
            return self.send_once(method, &url, body.as_ref()).await;
        }
        retry_rate_limited(&self.retry, || {
            self.send_once(method.clone(), &url, body.as_ref())
        })
        .await
    }

    async fn api_error(response: Response) -> ClientError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_default()
            .trim()
            .to_string();
        ClientError::Api { status, message }
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        Self::json(response).await
    }

    /// Observe a job handle once
    pub async fn poll_job(&self, location: &str) -> Result<JobStatus, ClientError> {
        let response = self.send::<()>(Method::GET, location, None).await?;
        let pending = response
            .headers()
            .get(PENDING_HEADER)
            .and_then(|v| v.to_str().ok())
            == Some("true");
        let status = response.status();

        if pending {
            if status != StatusCode::OK {
                return Err(Self::api_error(response).await);
            }
            return Ok(JobStatus::Pending);
        }
        match status {
            StatusCode::SEE_OTHER => {
                let target = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(ClientError::MissingLocation)?;
                Ok(JobStatus::Completed(Some(target.to_string())))
            }
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(JobStatus::Completed(None)),
            StatusCode::NOT_FOUND => Err(ClientError::UnknownJob(location.to_string())),
            _ => {
                let message = response.text().await.unwrap_or_default();
                Ok(JobStatus::Failed(message.trim().to_string()))
            }
        }
    }

    /// Poll a job handle until it finishes
    pub async fn wait_for_job(&self, location: &str) -> Result<Option<String>, ClientError> {
        loop {
            match self.poll_job(location).await? {
                JobStatus::Pending => {
                    debug!("Job {} pending", location);
                    tokio::time::sleep(self.poll_interval).await;
                }
                JobStatus::Completed(target) => return Ok(target),
                JobStatus::Failed(message) => return Err(ClientError::JobFailed(message)),
            }
        }
    }

    /// Submit an asynchronous request and wait for its job
    async fn run_job<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Option<String>, ClientError> {
        let response = self.send(method, path, body).await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(Self::api_error(response).await);
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ClientError::MissingLocation)?
            .to_string();
        self.wait_for_job(&location).await
    }

    async fn run_job_for<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let location = self
            .run_job(Method::POST, path, Some(body))
            .await?
            .ok_or(ClientError::MissingLocation)?;
        self.get(&location).await
    }

    // Clusters

    pub async fn cluster_create(&self, request: &ClusterCreateRequest) -> Result<ClusterInfo, ClientError> {
        let response = self.send(Method::POST, "/clusters", Some(request)).await?;
        Self::json(response).await
    }

    pub async fn cluster_info(&self, id: &str) -> Result<ClusterInfo, ClientError> {
        self.get(&format!("/clusters/{id}")).await
    }

    pub async fn cluster_list(&self) -> Result<ClusterList, ClientError> {
        self.get("/clusters").await
    }

    pub async fn cluster_delete(&self, id: &str) -> Result<(), ClientError> {
        let response = self
            .send::<()>(Method::DELETE, &format!("/clusters/{id}"), None)
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(())
    }

    // Nodes

    pub async fn node_add(&self, request: &NodeAddRequest) -> Result<NodeInfo, ClientError> {
        self.run_job_for("/nodes", request).await
    }

    pub async fn node_info(&self, id: &str) -> Result<NodeInfo, ClientError> {
        self.get(&format!("/nodes/{id}")).await
    }

    pub async fn node_delete(&self, id: &str) -> Result<(), ClientError> {
        self.run_job::<()>(Method::DELETE, &format!("/nodes/{id}"), None)
            .await
            .map(|_| ())
    }

    // Devices

    pub async fn device_add(&self, request: &DeviceAddRequest) -> Result<DeviceInfo, ClientError> {
        self.run_job_for("/devices", request).await
    }

    pub async fn device_info(&self, id: &str) -> Result<DeviceInfo, ClientError> {
        self.get(&format!("/devices/{id}")).await
    }

    pub async fn device_delete(&self, id: &str) -> Result<(), ClientError> {
        self.run_job::<()>(Method::DELETE, &format!("/devices/{id}"), None)
            .await
            .map(|_| ())
    }

    // Volumes

    pub async fn volume_create(&self, request: &VolumeCreateRequest) -> Result<VolumeInfo, ClientError> {
        self.run_job_for("/volumes", request).await
    }

    pub async fn volume_expand(
        &self,
        id: &str,
        request: &VolumeExpandRequest,
    ) -> Result<VolumeInfo, ClientError> {
        self.run_job_for(&format!("/volumes/{id}/expand"), request)
            .await
    }

    /// Move one brick of a volume to another node
    pub async fn volume_replace_brick(
        &self,
        id: &str,
        request: &BrickReplaceRequest,
    ) -> Result<VolumeInfo, ClientError> {
        self.run_job_for(&format!("/volumes/{id}/replacebrick"), request)
            .await
    }

    pub async fn volume_info(&self, id: &str) -> Result<VolumeInfo, ClientError> {
        self.get(&format!("/volumes/{id}")).await
    }

    pub async fn volume_list(&self) -> Result<VolumeList, ClientError> {
        self.get("/volumes").await
    }

    pub async fn volume_delete(&self, id: &str) -> Result<(), ClientError> {
        self.run_job::<()>(Method::DELETE, &format!("/volumes/{id}"), None)
            .await
            .map(|_| ())
    }

    pub async fn volume_heal_info(&self, id: &str) -> Result<HealInfo, ClientError> {
        self.get(&format!("/volumes/{id}/healinfo")).await
    }

    // Snapshots

    pub async fn snapshot_create(
        &self,
        volume_id: &str,
        request: &SnapshotCreateRequest,
    ) -> Result<SnapshotInfo, ClientError> {
        self.run_job_for(&format!("/volumes/{volume_id}/snapshot"), request)
            .await
    }

    /// Clone a snapshot into a new volume
    pub async fn snapshot_clone(
        &self,
        id: &str,
        request: &SnapshotCloneRequest,
    ) -> Result<VolumeInfo, ClientError> {
        self.run_job_for(&format!("/snapshots/{id}/clone"), request)
            .await
    }

    pub async fn snapshot_info(&self, id: &str) -> Result<SnapshotInfo, ClientError> {
        self.get(&format!("/snapshots/{id}")).await
    }

    pub async fn snapshot_list(&self) -> Result<SnapshotList, ClientError> {
        self.get("/snapshots").await
    }

    pub async fn snapshot_delete(&self, id: &str) -> Result<(), ClientError> {
        self.run_job::<()>(Method::DELETE, &format!("/snapshots/{id}"), None)
            .await
            .map(|_| ())
    }

    // Block volumes

    pub async fn block_volume_create(
        &self,
        request: &BlockVolumeCreateRequest,
    ) -> Result<BlockVolumeInfo, ClientError> {
        self.run_job_for("/blockvolumes", request).await
    }

    pub async fn block_volume_expand(
        &self,
        id: &str,
        request: &BlockVolumeExpandRequest,
    ) -> Result<BlockVolumeInfo, ClientError> {
        self.run_job_for(&format!("/blockvolumes/{id}/expand"), request)
            .await
    }

    pub async fn block_volume_info(&self, id: &str) -> Result<BlockVolumeInfo, ClientError> {
        self.get(&format!("/blockvolumes/{id}")).await
    }

    pub async fn block_volume_list(&self) -> Result<BlockVolumeList, ClientError> {
        self.get("/blockvolumes").await
    }

    pub async fn block_volume_delete(&self, id: &str) -> Result<(), ClientError> {
        self.run_job::<()>(Method::DELETE, &format!("/blockvolumes/{id}"), None)
            .await
            .map(|_| ())
    }

    /// Full store dump as JSON
    pub async fn db_dump(&self) -> Result<serde_json::Value, ClientError> {
        self.get("/db/dump").await
    }
}
