//! Volplane Server - storage control plane service
//!
//! This crate provides:
//! - The asynchronous job engine behind long-running HTTP requests
//! - Brick placement
//! - Cluster, node, device, volume, snapshot and block volume operations
//!   guarded by pending-operation markers
//! - Startup recovery of operations interrupted by a crash
//! - The HTTP API and configuration loading

pub mod allocator;
pub mod app;
pub mod jobs;
pub mod operations;
pub mod recovery;
pub mod routes;
pub mod settings;

pub use app::App;
pub use jobs::{AsyncJobManager, JobPoll, JobState};
pub use recovery::{RecoveryReport, recover};
pub use routes::router;
