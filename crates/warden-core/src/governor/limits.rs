//! Resource limits for guest sessions

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Budget identifiers reported in `ResourceLimitError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitType {
    /// Byte length of the submitted script
    ScriptSize,
    /// Wall-clock execution time
    ExecutionTime,
    /// Live remote tree nodes
    DomNodes,
    /// Live event listeners
    EventListeners,
}

impl LimitType {
    /// Get the wire name of the limit
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::ScriptSize => "scriptSize",
            LimitType::ExecutionTime => "executionTime",
            LimitType::DomNodes => "domNodes",
            LimitType::EventListeners => "eventListeners",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource limits for one guest session
///
/// Limits are supplied by configuration loading; the governor only enforces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimitsConfig {
    /// Maximum script size in bytes
    pub max_script_size: u64,

    /// Maximum wall-clock execution time
    #[serde(with = "humantime_serde")]
    pub max_execution_time: Duration,

    /// Maximum number of live tree nodes
    pub max_dom_nodes: u64,

    /// Maximum number of live event listeners
    pub max_event_listeners: u64,

    /// Heap usage (in MB) above which a warning is logged
    pub memory_warning_threshold: u64,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            max_script_size: 1024 * 1024, // 1 MiB
            max_execution_time: Duration::from_millis(5000),
            max_dom_nodes: 10_000,
            max_event_listeners: 1_000,
            memory_warning_threshold: 50, // 50 MB
        }
    }
}

impl ResourceLimitsConfig {
    /// Limits for small widgets
    pub fn strict() -> Self {
        Self {
            max_script_size: 64 * 1024,
            max_execution_time: Duration::from_millis(1000),
            max_dom_nodes: 500,
            max_event_listeners: 50,
            memory_warning_threshold: 16,
        }
    }

    /// Limits for data-heavy views such as large tables
    pub fn permissive() -> Self {
        Self {
            max_script_size: 8 * 1024 * 1024,
            max_execution_time: Duration::from_secs(30),
            max_dom_nodes: 250_000,
            max_event_listeners: 25_000,
            memory_warning_threshold: 512,
        }
    }

    /// Maximum execution time in milliseconds
    pub fn max_execution_ms(&self) -> u64 {
        self.max_execution_time.as_millis() as u64
    }

    /// Reject limits that cannot describe a usable budget
    pub fn validate(&self) -> Result<(), SandboxError> {
        let zero = [
            ("max_script_size", self.max_script_size == 0),
            ("max_execution_time", self.max_execution_time.is_zero()),
            ("max_dom_nodes", self.max_dom_nodes == 0),
            ("max_event_listeners", self.max_event_listeners == 0),
            ("memory_warning_threshold", self.memory_warning_threshold == 0),
        ];

        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((name, _)) => Err(SandboxError::invalid_config(format!(
                "{} must be greater than zero",
                name
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ResourceLimitsConfig::default();
        assert_eq!(limits.max_script_size, 1_048_576);
        assert_eq!(limits.max_execution_ms(), 5000);
        assert_eq!(limits.max_dom_nodes, 10_000);
        assert_eq!(limits.max_event_listeners, 1_000);
        assert_eq!(limits.memory_warning_threshold, 50);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let limits = ResourceLimitsConfig {
            max_dom_nodes: 0,
            ..Default::default()
        };
        let err = limits.validate().unwrap_err();
        assert!(err.to_string().contains("max_dom_nodes"));
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(ResourceLimitsConfig::strict().validate().is_ok());
        assert!(ResourceLimitsConfig::permissive().validate().is_ok());
    }

    #[test]
    fn test_humantime_roundtrip_from_toml() {
        let limits: ResourceLimitsConfig =
            toml::from_str("max_execution_time = \"250ms\"\nmax_dom_nodes = 5").unwrap();
        assert_eq!(limits.max_execution_ms(), 250);
        assert_eq!(limits.max_dom_nodes, 5);
        assert_eq!(limits.max_event_listeners, 1_000);
    }

    #[test]
    fn test_limit_type_names() {
        assert_eq!(LimitType::ScriptSize.to_string(), "scriptSize");
        assert_eq!(
            serde_json::to_string(&LimitType::EventListeners).unwrap(),
            "\"eventListeners\""
        );
    }
}
