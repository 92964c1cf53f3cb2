//! Kubernetes exec transport.
//!
//! Storage daemons run in pods; a host is mapped to its pod either by the
//! `glusterfs-node=<host>` label or, when configured, by using the host
//! name as the pod name. Commands run in the pod's first container.

use crate::error::ExecError;
use crate::transport::{CommandOutput, RemoteCommandTransport, TransportSettings, run_in_order};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, AttachParams, ListParams};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use volplane_common::config::KubeConfig;

/// Pod and container commands for a host are run in
#[derive(Debug, Clone, PartialEq, Eq)]
struct TargetPod {
    name: String,
    container: String,
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

pub struct KubeTransport {
    settings: TransportSettings,
    config: KubeConfig,
    pods: Api<Pod>,
}

impl KubeTransport {
    /// Connect using the in-cluster or kubeconfig credentials
    pub async fn connect(settings: TransportSettings, config: KubeConfig) -> Result<Self, ExecError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ExecError::connection("kubernetes", e))?;
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| client.default_namespace().to_string());
        debug!("Kubernetes transport using namespace {}", namespace);
        Ok(Self {
            settings,
            config,
            pods: Api::namespaced(client, &namespace),
        })
    }

    fn label_selector(&self, host: &str) -> String {
        format!("{}={}", self.config.pod_label_key, host)
    }

    async fn target_pod(&self, host: &str) -> Result<TargetPod, ExecError> {
        let pod = if self.config.use_pod_names {
            self.pods
                .get(host)
                .await
                .map_err(|e| ExecError::connection(host, e))?
        } else {
            let params = ListParams::default().labels(&self.label_selector(host));
            let list = self
                .pods
                .list(&params)
                .await
                .map_err(|e| ExecError::connection(host, e))?;
            list.items.into_iter().next().ok_or_else(|| {
                ExecError::connection(
                    host,
                    format!("no pod matches label {}", self.label_selector(host)),
                )
            })?
        };

        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| ExecError::connection(host, "pod has no name"))?;
        let container = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .map(|c| c.name.clone())
            .ok_or_else(|| ExecError::connection(host, format!("pod {name} has no containers")))?;
        Ok(TargetPod { name, container })
    }

    async fn run_one(
        &self,
        target: &TargetPod,
        host: &str,
        command: &str,
    ) -> Result<CommandOutput, ExecError> {
        let params = AttachParams::default()
            .container(target.container.clone())
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut attached = self
            .pods
            .exec(&target.name, vec!["sh", "-c", command], &params)
            .await
            .map_err(|e| ExecError::connection(host, e))?;

        let (out_reader, err_reader) = (attached.stdout(), attached.stderr());
        let (stdout, stderr) = tokio::join!(read_all(out_reader), read_all(err_reader));
        let stdout = stdout.map_err(|e| ExecError::connection(host, e))?;
        let mut stderr = stderr.map_err(|e| ExecError::connection(host, e))?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        let code = match status {
            Some(s) if s.status.as_deref() == Some("Success") => Some(0),
            Some(s) => {
                if stderr.is_empty() {
                    if let Some(message) = s.message {
                        stderr.extend_from_slice(message.as_bytes());
                    }
                }
                Some(1)
            }
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| ExecError::connection(host, e))?;

        Ok(CommandOutput {
            status: code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RemoteCommandTransport for KubeTransport {
    async fn exec_commands(
        &self,
        host: &str,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecError> {
        let target = self.target_pod(host).await?;
        debug!(
            "Running {} commands in pod {}/{}",
            commands.len(),
            target.name,
            target.container
        );
        run_in_order(host, commands, timeout, |cmd| {
            self.run_one(&target, host, cmd)
        })
        .await
    }

    fn settings(&self) -> &TransportSettings {
        &self.settings
    }
}
