//! Environment-variable overrides.
//!
//! A deliberately small set for containerized deployments; everything else
//! belongs in the configuration file.

use crate::model::{Mode, WardenConfig};
use tracing::{info, warn};

pub const ENV_MODE: &str = "MODE";
pub const ENV_NAMESPACE: &str = "MIMIR_NAMESPACE";
pub const ENV_CONFIGMAP: &str = "MIMIR_CONFIGMAP_NAME";

/// Apply recognized environment overrides onto a loaded configuration.
pub fn apply_env_overrides(config: &mut WardenConfig) {
    if let Ok(mode) = std::env::var(ENV_MODE) {
        match mode.as_str() {
            "dry-run" => config.mode = Mode::DryRun,
            "prod" => config.mode = Mode::Prod,
            other => {
                warn!(value = %other, "ignoring unrecognized MODE override");
            }
        }
        info!(mode = %config.mode, "mode overridden from environment");
    }

    if let Ok(namespace) = std::env::var(ENV_NAMESPACE) {
        if !namespace.is_empty() {
            config.target.namespace = namespace;
        }
    }

    if let Ok(name) = std::env::var(ENV_CONFIGMAP) {
        if !name.is_empty() {
            config.target.configmap_name = name;
        }
    }
}
