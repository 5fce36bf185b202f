//! Environment variable overrides

use super::model::WardenConfig;
use crate::error::{SandboxError, WardenResult};
use crate::sandbox::BackendKind;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_MAX_SCRIPT_SIZE: &str = "WARDEN_MAX_SCRIPT_SIZE";
pub const ENV_MAX_EXECUTION_TIME_MS: &str = "WARDEN_MAX_EXECUTION_TIME_MS";
pub const ENV_MAX_DOM_NODES: &str = "WARDEN_MAX_DOM_NODES";
pub const ENV_MAX_EVENT_LISTENERS: &str = "WARDEN_MAX_EVENT_LISTENERS";
pub const ENV_BACKEND: &str = "WARDEN_BACKEND";
pub const ENV_LOG_LEVEL: &str = "WARDEN_LOG_LEVEL";

/// Apply `WARDEN_*` variables from the process environment
pub fn apply_env_overrides(config: &mut WardenConfig) -> WardenResult<()> {
    apply_overrides_from(config, |key| env::var(key).ok())
}

/// Apply overrides from an arbitrary variable source
pub fn apply_overrides_from<F>(config: &mut WardenConfig, lookup: F) -> WardenResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_MAX_SCRIPT_SIZE) {
        config.limits.max_script_size = parse(ENV_MAX_SCRIPT_SIZE, &value)?;
    }

    if let Some(value) = lookup(ENV_MAX_EXECUTION_TIME_MS) {
        let ms: u64 = parse(ENV_MAX_EXECUTION_TIME_MS, &value)?;
        config.limits.max_execution_time = Duration::from_millis(ms);
    }

    if let Some(value) = lookup(ENV_MAX_DOM_NODES) {
        config.limits.max_dom_nodes = parse(ENV_MAX_DOM_NODES, &value)?;
    }

    if let Some(value) = lookup(ENV_MAX_EVENT_LISTENERS) {
        config.limits.max_event_listeners = parse(ENV_MAX_EVENT_LISTENERS, &value)?;
    }

    if let Some(value) = lookup(ENV_BACKEND) {
        config.sandbox.backend = BackendKind::from_str(value.trim())?;
    }

    if let Some(value) = lookup(ENV_LOG_LEVEL) {
        config.logging.level = value.trim().to_string();
    }

    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> WardenResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SandboxError::invalid_config(format!("Invalid {} value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)]) -> WardenResult<WardenConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = WardenConfig::default();
        apply_overrides_from(&mut config, |key| vars.get(key).cloned())?;
        Ok(config)
    }

    #[test]
    fn test_overrides_applied() {
        let config = apply(&[
            (ENV_MAX_EXECUTION_TIME_MS, "1500"),
            (ENV_MAX_DOM_NODES, " 42 "),
            (ENV_BACKEND, "light"),
            (ENV_LOG_LEVEL, "trace"),
        ])
        .unwrap();
        assert_eq!(config.limits.max_execution_ms(), 1500);
        assert_eq!(config.limits.max_dom_nodes, 42);
        assert_eq!(config.sandbox.backend, BackendKind::Light);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_no_vars_leaves_defaults() {
        assert_eq!(apply(&[]).unwrap(), WardenConfig::default());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = apply(&[(ENV_MAX_SCRIPT_SIZE, "big")]).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_SCRIPT_SIZE));
    }
}
