//! Top-level configuration model

use crate::batcher::BatcherConfig;
use crate::governor::ResourceLimitsConfig;
use crate::logging::LoggingConfig;
use crate::policy::CspConfig;
use crate::sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};

/// Everything a Warden deployment configures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Per-session resource budgets
    pub limits: ResourceLimitsConfig,
    /// Content policy
    pub csp: CspConfig,
    /// Render operation batching
    pub batcher: BatcherConfig,
    /// Isolation backend and engine ceilings
    pub sandbox: SandboxConfig,
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CspDirective;
    use crate::sandbox::BackendKind;
    use std::time::Duration;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
limits:
  max_execution_time: 2s
  max_dom_nodes: 200
sandbox:
  backend: light
csp:
  self_origin: https://app.example.com
  policy:
    connect-src: ["'self'", "https://api.example.com"]
"#;
        let config: WardenConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.limits.max_execution_time, Duration::from_secs(2));
        assert_eq!(config.limits.max_dom_nodes, 200);
        assert_eq!(config.limits.max_event_listeners, 1_000);
        assert_eq!(config.sandbox.backend, BackendKind::Light);
        assert_eq!(config.batcher, BatcherConfig::default());
        assert_eq!(
            config.csp.policy.sources(CspDirective::ConnectSrc).map(|s| s.len()),
            Some(2)
        );
    }
}
