//! Runs commands on the machine hosting the server.
//!
//! Useful for single-node deployments and for development, where the
//! "remote" host is the local one. The host name is only used for logging.

use crate::error::ExecError;
use crate::transport::{CommandOutput, RemoteCommandTransport, TransportSettings, run_in_order};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

pub struct LocalTransport {
    settings: TransportSettings,
    shell: String,
}

impl LocalTransport {
    #[must_use]
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            shell: "sh".to_string(),
        }
    }

    async fn run_one(&self, host: &str, command: &str) -> Result<CommandOutput, ExecError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::connection(host, format!("failed to spawn shell: {e}")))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RemoteCommandTransport for LocalTransport {
    async fn exec_commands(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecError> {
        run_in_order(host, commands, timeout, |cmd| self.run_one(host, cmd)).await
    }

    fn settings(&self) -> &TransportSettings {
        &self.settings
    }
}
