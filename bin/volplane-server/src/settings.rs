//! Configuration loading.
//!
//! Defaults, then an optional TOML file, then `VOLPLANE__SECTION__KEY`
//! environment variables. Command line flags are applied on top by `main`.

use config::{Environment, File, FileFormat};
use std::path::Path;
use tracing::debug;
use volplane_common::Config;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "VOLPLANE";

/// Load the configuration, reading `path` if given
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        debug!("Loading configuration from {}", path.display());
        builder = builder.add_source(
            File::from(path.to_path_buf())
                .format(FileFormat::Toml)
                .required(true),
        );
    }
    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<Config>()
}
