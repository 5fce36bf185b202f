//! Configuration loading for Warden
//!
//! Sources, lowest precedence first: built-in defaults, a JSON/TOML/YAML file,
//! then `WARDEN_*` environment variables. The merged result is validated before
//! anything is built from it.

mod env_loader;
mod file_loader;
mod model;
mod validation;

pub use env_loader::{
    ENV_BACKEND, ENV_LOG_LEVEL, ENV_MAX_DOM_NODES, ENV_MAX_EVENT_LISTENERS,
    ENV_MAX_EXECUTION_TIME_MS, ENV_MAX_SCRIPT_SIZE, apply_env_overrides, apply_overrides_from,
};
pub use file_loader::load_from_file;
pub use model::WardenConfig;
pub use validation::validate_config;

use crate::error::WardenResult;
use std::path::Path;

/// Load a file, apply environment overrides and validate
pub fn load_config(path: &Path) -> WardenResult<WardenConfig> {
    let mut config = load_from_file(path)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

impl WardenConfig {
    /// See [`validate_config`]
    pub fn validate(&self) -> WardenResult<()> {
        validate_config(self)
    }
}
