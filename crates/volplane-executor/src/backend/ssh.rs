//! SSH transport.
//!
//! Opens one session per batch, authenticates with the configured private
//! key and runs every command of the batch on its own exec channel.

use crate::error::ExecError;
use crate::transport::{CommandOutput, RemoteCommandTransport, TransportSettings, run_in_order};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use volplane_common::config::SshConfig;

struct ClientHandler {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        let Some(path) = &self.known_hosts else {
            warn!(
                "Accepting unverified host key {} from {}; set executor.ssh.known_hosts to pin node keys",
                key.fingerprint(),
                self.host
            );
            return Ok(true);
        };
        // A changed key surfaces as an error, an unknown host as false
        let known = russh_keys::check_known_hosts_path(&self.host, self.port, key, path)?;
        if !known {
            warn!(
                "Host key {} of {} not found in {}",
                key.fingerprint(),
                self.host,
                path.display()
            );
        }
        Ok(known)
    }
}

pub struct SshTransport {
    settings: TransportSettings,
    config: SshConfig,
    key: Arc<KeyPair>,
}

impl SshTransport {
    /// Load the private key and build the transport
    pub fn new(settings: TransportSettings, config: SshConfig) -> Result<Self, ExecError> {
        let key = russh_keys::load_secret_key(&config.keyfile, None).map_err(|e| {
            ExecError::connection(
                "localhost",
                format!("unable to load key {}: {e}", config.keyfile.display()),
            )
        })?;
        Ok(Self {
            settings,
            config,
            key: Arc::new(key),
        })
    }

    async fn connect(&self, host: &str) -> Result<Handle<ClientHandler>, ExecError> {
        let ssh_config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            host: host.to_string(),
            port: self.config.port,
            known_hosts: self.config.known_hosts.clone(),
        };
        let connect = client::connect(ssh_config, (host, self.config.port), handler);
        let mut session =
            tokio::time::timeout(Duration::from_secs(self.config.connect_timeout_secs), connect)
                .await
                .map_err(|_| ExecError::connection(host, "connect timed out"))?
                .map_err(|e| ExecError::connection(host, e))?;

        let authenticated = session
            .authenticate_publickey(&self.config.user, Arc::clone(&self.key))
            .await
            .map_err(|e| ExecError::connection(host, e))?;
        if !authenticated {
            return Err(ExecError::connection(
                host,
                format!("public key authentication failed for {}", self.config.user),
            ));
        }
        debug!("SSH session established to {}:{}", host, self.config.port);
        Ok(session)
    }

    fn wrap(&self, command: &str) -> String {
        if self.config.sudo {
            format!("sudo sh -c '{}'", command.replace('\'', r"'\''"))
        } else {
            command.to_string()
        }
    }

    async fn run_one(
        &self,
        session: &Handle<ClientHandler>,
        host: &str,
        command: &str,
    ) -> Result<CommandOutput, ExecError> {
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::connection(host, e))?;
        channel
            .exec(true, self.wrap(command))
            .await
            .map_err(|e| ExecError::connection(host, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    status = i32::try_from(exit_status).ok();
                }
                _ => {}
            }
        }

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RemoteCommandTransport for SshTransport {
    async fn exec_commands(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecError> {
        let session = self.connect(host).await?;
        let result = run_in_order(host, commands, timeout, |cmd| {
            self.run_one(&session, host, cmd)
        })
        .await;

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!("Failed to close SSH session to {}: {}", host, e);
        }
        result
    }

    fn settings(&self) -> &TransportSettings {
        &self.settings
    }
}
