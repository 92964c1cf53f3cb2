//! Volplane Client
//!
//! HTTP client for the Volplane API. Requests answered with `429 Too Many
//! Requests` are retried after a randomized delay; asynchronous operations
//! are followed through their job handle until they finish.

pub mod client;
pub mod error;
pub mod retry;

pub use client::{Client, JobStatus, MAX_CONCURRENT_REQUESTS};
pub use error::ClientError;
pub use retry::{RetryPolicy, retry_rate_limited};
