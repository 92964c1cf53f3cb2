//! Volplane Executor - Running administrative commands on storage nodes
//!
//! This crate provides:
//! - The [`RemoteCommandTransport`] capability and its local, SSH and
//!   Kubernetes exec backends
//! - Per-host admission control
//! - Command planning that keeps volume command lines bounded
//! - [`CmdExecutor`], the node/device/brick/volume/snapshot/block-volume
//!   command set

pub mod backend;
pub mod cli_output;
pub mod cmdexec;
pub mod error;
pub mod planner;
pub mod testing;
pub mod throttle;
pub mod transport;

pub use cli_output::{BlockVolumeInfo, BrickHealStatus, DeviceInfo, SnapshotInfo, VolumeInfo};
pub use cmdexec::{BlockVolumeRequest, BrickRequest, CmdExecutor};
pub use error::ExecError;
pub use planner::{BrickLocation, CommandPlanner, VolumeRequest};
pub use throttle::HostThrottle;
pub use transport::{CommandOutput, RemoteCommandTransport, TransportSettings};
