//! Transport abstraction for running command batches on a host.

use crate::error::ExecError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use volplane_common::config::ExecutorConfig;

/// Raw result of running one command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit status; `None` when the transport could not report one
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }
}

/// Settings every transport reports back to the command executor
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub rebalance_on_expansion: bool,
    pub snapshot_limit: u32,
    pub cli_timeout_secs: u32,
    pub command_timeout: Duration,
}

impl TransportSettings {
    #[must_use]
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            rebalance_on_expansion: config.rebalance_on_expansion,
            snapshot_limit: config.snapshot_limit,
            cli_timeout_secs: if config.cli_timeout_secs == 0 {
                600
            } else {
                config.cli_timeout_secs
            },
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

/// Runs an ordered batch of commands on a named host.
///
/// Commands run in order and execution stops at the first failure, which
/// is reported as [`ExecError::CommandFailed`] with the failing step and
/// the output collected so far. Timeouts are errors, never retried here.
#[async_trait]
pub trait RemoteCommandTransport: Send + Sync {
    async fn exec_commands(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecError>;

    fn settings(&self) -> &TransportSettings;

    fn rebalance_on_expansion(&self) -> bool {
        self.settings().rebalance_on_expansion
    }

    fn snapshot_limit(&self) -> u32 {
        self.settings().snapshot_limit
    }

    /// Value passed to `gluster --timeout`
    fn gluster_cli_timeout(&self) -> u32 {
        self.settings().cli_timeout_secs
    }

    /// Bound on a whole `exec_commands` invocation
    fn command_timeout(&self) -> Duration {
        self.settings().command_timeout
    }
}

/// Run `commands` one at a time through `run_one`, stopping at the first
/// failure. The whole batch is bounded by `timeout`.
pub async fn run_in_order<'a, F, Fut>(
    host: &str,
    commands: &'a [String],
    timeout: Duration,
    mut run_one: F,
) -> Result<Vec<String>, ExecError>
where
    F: FnMut(&'a str) -> Fut,
    Fut: Future<Output = Result<CommandOutput, ExecError>>,
{
    let batch = async {
        let mut results = Vec::with_capacity(commands.len());
        for (step, command) in commands.iter().enumerate() {
            debug!("[{}] step {}: {}", host, step, command);
            let out = run_one(command.as_str()).await?;
            if !out.success() {
                let stderr = if out.stderr.trim().is_empty() {
                    out.stdout.trim().to_string()
                } else {
                    out.stderr.trim().to_string()
                };
                return Err(ExecError::CommandFailed {
                    host: host.to_string(),
                    step,
                    command: command.clone(),
                    output: results,
                    stderr,
                });
            }
            results.push(out.stdout);
        }
        Ok(results)
    };

    tokio::time::timeout(timeout, batch)
        .await
        .map_err(|_| ExecError::Timeout {
            host: host.to_string(),
            timeout,
        })?
}
