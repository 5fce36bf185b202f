//! File-based configuration loading

use super::model::WardenConfig;
use crate::error::{SandboxError, WardenResult};
use std::fs;
use std::path::Path;

/// Load configuration from a file
///
/// Supports JSON, TOML, and YAML formats based on file extension.
/// Returns default config if file doesn't exist.
pub fn load_from_file(path: &Path) -> WardenResult<WardenConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(WardenConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        SandboxError::invalid_config(format!(
            "failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let parse_error = |format: &str, e: String| {
        SandboxError::invalid_config(format!(
            "failed to parse {} config '{}': {}",
            format,
            path.display(),
            e
        ))
    };

    let config: WardenConfig = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| parse_error("TOML", e.to_string()))?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| parse_error("YAML", e.to_string()))?
        }
        _ => serde_json::from_str(&content).map_err(|e| parse_error("JSON", e.to_string()))?,
    };

    Ok(config)
}
