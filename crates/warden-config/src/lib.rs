//! Configuration for the Warden controller.
//!
//! A single YAML document loaded at startup, validated before any component
//! is constructed. Every section has serde defaults so a minimal file (or an
//! empty one) yields a working dry-run configuration. A small set of
//! environment variables override the file for containerized deployments.

mod defaults;
mod env;
mod model;
mod validation;

pub use defaults::{default_limit_definitions, default_metric_mappings};
pub use env::apply_env_overrides;
pub use model::*;

use std::path::Path;
use tracing::info;
use warden_types::{WardenError, WardenResult};

/// Load, env-override, and validate a configuration file.
pub fn load(path: impl AsRef<Path>) -> WardenResult<WardenConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        WardenError::Configuration(format!("cannot read config {}: {e}", path.display()))
    })?;
    let mut config: WardenConfig = serde_yaml::from_str(&raw)
        .map_err(|e| WardenError::Configuration(format!("invalid config: {e}")))?;

    apply_env_overrides(&mut config);
    config.validate()?;

    info!(
        mode = %config.mode,
        namespace = %config.target.namespace,
        configmap = %config.target.configmap_name,
        interval_secs = config.update_interval_secs,
        "configuration loaded"
    );
    Ok(config)
}
