//! Configuration and service bootstrap shared by the commands.

use std::path::Path;

use safari_foundation::DetectionService;
use safari_kernel::config::{DetectionServiceConfig, load_service_config};
use tracing::debug;

use crate::CliError;

/// Load the configuration from `path` (or defaults) plus environment
/// overrides, validated.
pub fn load_config(path: Option<&Path>) -> Result<DetectionServiceConfig, CliError> {
    let path = path.map(|p| p.to_string_lossy().into_owned());
    Ok(load_service_config(path.as_deref())?)
}

/// Build a service over the reference collaborators.
pub fn build_service(path: Option<&Path>) -> Result<DetectionService, CliError> {
    let config = load_config(path)?;
    debug!(config = ?path, layer_size = config.model.layer_size, "building detection service");
    DetectionService::builder(config)
        .build()
        .map_err(|report| CliError::Startup(format!("{report:?}")))
}
