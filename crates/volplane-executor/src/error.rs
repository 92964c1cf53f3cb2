//! Executor error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised while running commands on a storage node
#[derive(Debug, Error)]
pub enum ExecError {
    /// A command exited unsuccessfully. `output` holds the results of the
    /// steps that completed before it.
    #[error("command failed on {host} at step {step} ({command}): {stderr}")]
    CommandFailed {
        host: String,
        step: usize,
        command: String,
        output: Vec<String>,
        stderr: String,
    },

    #[error("commands on {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("unable to parse output from {host}: {message}")]
    Parse { host: String, message: String },

    /// The request cannot be turned into commands
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The node refused the operation in its current state
    #[error("refused: {0}")]
    Refused(String),
}

impl ExecError {
    pub fn connection(host: &str, err: impl std::fmt::Display) -> Self {
        Self::Connection {
            host: host.to_string(),
            message: err.to_string(),
        }
    }

    pub fn parse(host: &str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            host: host.to_string(),
            message: err.to_string(),
        }
    }

    /// Node could not be reached at all, as opposed to a command failing
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Failure text mentions that the object is already gone. Gluster XML
    /// output reports this through `opErrstr`, which surfaces as a parse
    /// error.
    #[must_use]
    pub fn is_missing_object(&self) -> bool {
        self.mentions_any(&["does not exist", "doesn't exist", "not found", "failed to find"])
    }

    /// Command failure or gluster error text contains one of `needles`,
    /// ignoring case
    #[must_use]
    pub fn mentions_any(&self, needles: &[&str]) -> bool {
        let text = match self {
            Self::CommandFailed { stderr, .. } => stderr,
            Self::Parse { message, .. } => message,
            _ => return false,
        };
        let text = text.to_ascii_lowercase();
        needles.iter().any(|n| text.contains(n))
    }
}

impl From<ExecError> for volplane_common::Error {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::CommandFailed {
                host,
                step,
                command,
                output,
                stderr,
            } => Self::RemoteExecution {
                host,
                step,
                command,
                message: stderr,
                output,
            },
            ExecError::Timeout { host, timeout } => Self::RemoteExecution {
                host,
                step: 0,
                command: String::new(),
                message: format!("timed out after {timeout:?}"),
                output: Vec::new(),
            },
            ExecError::Connection { host, message } | ExecError::Parse { host, message } => {
                Self::RemoteExecution {
                    host,
                    step: 0,
                    command: String::new(),
                    message,
                    output: Vec::new(),
                }
            }
            ExecError::InvalidRequest(msg) => Self::Validation(msg),
            ExecError::Refused(msg) => Self::Conflict(msg),
        }
    }
}
