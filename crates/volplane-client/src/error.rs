//! Client error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered 429; the only condition that is retried
    #[error("rate limited")]
    RateLimited,

    #[error("failed to complete requested operation after {attempts} attempts")]
    Exhausted { attempts: usize },

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("unknown job handle: {0}")]
    UnknownJob(String),

    #[error("response missing location header")]
    MissingLocation,

    #[error("client is shut down")]
    Closed,
}

impl From<ClientError> for volplane_common::Error {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::RateLimited => Self::RateLimited,
            ClientError::Exhausted { attempts } => Self::Exhausted { attempts },
            ClientError::Api {
                status: 400,
                message,
            } => Self::Validation(message),
            ClientError::Api {
                status: 404,
                message,
            } => Self::NotFound {
                kind: "resource",
                id: message,
            },
            ClientError::Api {
                status: 409,
                message,
            } => Self::Conflict(message),
            ClientError::UnknownJob(handle) => Self::NotFound {
                kind: "job",
                id: handle,
            },
            other => Self::Internal(other.to_string()),
        }
    }
}
