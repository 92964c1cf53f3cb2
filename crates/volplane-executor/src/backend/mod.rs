//! Transport backends

pub mod kubernetes;
pub mod local;
pub mod ssh;

pub use kubernetes::KubeTransport;
pub use local::LocalTransport;
pub use ssh::SshTransport;

use crate::error::ExecError;
use crate::transport::{RemoteCommandTransport, TransportSettings};
use std::sync::Arc;
use tracing::info;
use volplane_common::config::{ExecutorBackend, ExecutorConfig};

/// Build the transport selected by the configuration
pub async fn from_config(
    config: &ExecutorConfig,
) -> Result<Arc<dyn RemoteCommandTransport>, ExecError> {
    let settings = TransportSettings::from_config(config);
    let transport: Arc<dyn RemoteCommandTransport> = match config.backend {
        ExecutorBackend::Local => Arc::new(LocalTransport::new(settings)),
        ExecutorBackend::Ssh => Arc::new(SshTransport::new(settings, config.ssh.clone())?),
        ExecutorBackend::Kubernetes => {
            Arc::new(KubeTransport::connect(settings, config.kubernetes.clone()).await?)
        }
    };
    info!("Using {:?} command transport", config.backend);
    Ok(transport)
}
