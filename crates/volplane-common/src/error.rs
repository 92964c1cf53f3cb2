//! Error types for Volplane
//!
//! This module defines the error taxonomy shared by the store, the
//! executor layer and the operation engine.

use thiserror::Error;

/// Common result type for Volplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Volplane
#[derive(Debug, Error)]
pub enum Error {
    // Entity errors
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no space: {0}")]
    NoSpace(String),

    // Remote execution errors
    #[error("remote execution failed on {host} at step {step} ({command}): {message}")]
    RemoteExecution {
        host: String,
        step: usize,
        command: String,
        message: String,
        /// Output collected from the steps that completed before the failure
        output: Vec<String>,
    },

    // Client errors
    #[error("rate limited")]
    RateLimited,

    #[error("retries exhausted after {attempts} attempts")]
    Exhausted { attempts: usize },

    // Persistence errors
    #[error("storage error: {0}")]
    Storage(String),

    /// The remote side changed but the durable record could not be updated.
    /// The pending marker is left in place for the recovery pass.
    #[error("commit failed after remote changes for operation {operation}: {message}")]
    CommitFailed { operation: String, message: String },

    /// The operation stopped after a remote change that cannot be undone.
    /// The pending marker is kept so the recovery pass finishes the work.
    #[error("operation {operation} stopped after remote changes: {message}")]
    Incomplete { operation: String, message: String },

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not found error for an entity kind
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Only a rate-limit signal may be retried by clients
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Get HTTP status code for the API surface
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::Validation(_) => 400,

            // 404 Not Found
            Self::NotFound { .. } => 404,

            // 409 Conflict
            Self::Conflict(_) => 409,

            // 429 Too Many Requests
            Self::RateLimited => 429,

            // 500 Internal Server Error
            Self::Internal(_)
            | Self::Storage(_)
            | Self::CommitFailed { .. }
            | Self::Incomplete { .. }
            | Self::RemoteExecution { .. }
            | Self::Exhausted { .. } => 500,

            // 503 Service Unavailable
            Self::NoSpace(_) | Self::Configuration(_) => 503,
        }
    }
}
