//! Configuration types for Volplane
//!
//! This module defines configuration structures used across components.
//! Every section deserializes with defaults so that a partial file (or no
//! file at all) yields a usable configuration.

use crate::api::QUEUE_PREFIX;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Root configuration for Volplane
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Remote executor configuration
    pub executor: ExecutorConfig,
    /// Brick allocation configuration
    pub allocation: AllocationConfig,
    /// Async job configuration
    pub jobs: JobsConfig,
}

/// HTTP server and database configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the HTTP API
    pub listen: SocketAddr,
    /// Path of the redb database file
    pub db_path: PathBuf,
    /// Default log level (overridden by RUST_LOG)
    pub log_level: String,
    /// Run the pending-operation recovery pass at startup
    pub auto_recover: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            db_path: PathBuf::from("/var/lib/volplane/volplane.redb"),
            log_level: "info".to_string(),
            auto_recover: true,
        }
    }
}

/// Which transport runs administrative commands on storage nodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorBackend {
    /// Run commands on the local machine
    #[default]
    Local,
    /// Run commands over SSH
    Ssh,
    /// Run commands inside a storage pod
    Kubernetes,
}

/// Remote executor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub backend: ExecutorBackend,
    /// Trigger a rebalance after adding bricks to a volume
    pub rebalance_on_expansion: bool,
    /// Hard snapshot limit applied to new volumes (0 = leave unset)
    pub snapshot_limit: u32,
    /// Timeout passed to the gluster CLI (seconds)
    pub cli_timeout_secs: u32,
    /// Per-command execution timeout enforced by the transport (seconds)
    pub command_timeout_secs: u64,
    /// Directory under which bricks are mounted
    pub mount_base: PathBuf,
    /// fstab file updated when bricks are created
    pub fstab: PathBuf,
    pub ssh: SshConfig,
    pub kubernetes: KubeConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend: ExecutorBackend::Local,
            rebalance_on_expansion: false,
            snapshot_limit: 0,
            // Longer than the gluster CLI default of 120s; busy clusters need it
            cli_timeout_secs: 600,
            command_timeout_secs: 10 * 60,
            mount_base: PathBuf::from("/var/lib/volplane/mounts"),
            fstab: PathBuf::from("/etc/fstab"),
            ssh: SshConfig::default(),
            kubernetes: KubeConfig::default(),
        }
    }
}

/// SSH transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    /// Private key used for authentication
    pub keyfile: PathBuf,
    /// Prefix commands with sudo
    pub sudo: bool,
    pub connect_timeout_secs: u64,
    /// known_hosts file node keys are verified against; unset accepts any key
    pub known_hosts: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            keyfile: PathBuf::from("/etc/volplane/ssh_key"),
            sudo: false,
            connect_timeout_secs: 10,
            known_hosts: None,
        }
    }
}

/// Kubernetes exec transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeConfig {
    /// Namespace of the storage pods (defaults to the client's namespace)
    pub namespace: Option<String>,
    /// Label key whose value is the node hostname
    pub pod_label_key: String,
    /// Treat the host name as the pod name directly
    pub use_pod_names: bool,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            pod_label_key: "glusterfs-node".to_string(),
            use_pod_names: false,
        }
    }
}

/// Brick allocation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Size of automatically created block-hosting volumes (GB)
    pub block_hosting_volume_size_gb: u64,
    /// Smallest brick the allocator will create (GB)
    pub min_brick_size_gb: u64,
    /// Upper bound on redundancy sets per volume
    pub max_sets_per_volume: usize,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            block_hosting_volume_size_gb: 100,
            min_brick_size_gb: 1,
            max_sets_per_volume: 32,
        }
    }
}

/// Async job configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Route prefix under which job handles are polled
    pub route_prefix: String,
}

impl JobsConfig {
    /// Location of the job handle `id`
    #[must_use]
    pub fn location(&self, id: &str) -> String {
        format!("{}/{id}", self.route_prefix.trim_end_matches('/'))
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            route_prefix: QUEUE_PREFIX.to_string(),
        }
    }
}
