//! Sandbox configuration

use crate::error::SandboxError;
use crate::protocol::DEFAULT_MAX_PAYLOAD_BYTES;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Isolation strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Fresh engine per run with a hard heap ceiling; for untrusted code
    #[default]
    Heavy,
    /// Shared engine, no heap ceiling, faster startup; for semi-trusted code
    Light,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Heavy => "heavy",
            BackendKind::Light => "light",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heavy" | "isolate" => Ok(BackendKind::Heavy),
            "light" | "shared" => Ok(BackendKind::Light),
            other => Err(SandboxError::invalid_config(format!(
                "unknown backend '{}' (expected heavy or light)",
                other
            ))),
        }
    }
}

/// Engine settings for a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: BackendKind,
    /// Heap ceiling of the heavy backend
    pub memory_limit_bytes: u64,
    /// Engine stack ceiling
    pub max_stack_bytes: u64,
    /// Largest single serialized operation accepted from a guest
    pub max_operation_bytes: usize,
    /// Console output kept per stream and execution; the rest is dropped
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Heavy,
            memory_limit_bytes: 64 * 1024 * 1024,
            max_stack_bytes: 1024 * 1024,
            max_operation_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.memory_limit_bytes == 0 {
            return Err(SandboxError::invalid_config(
                "memory_limit_bytes must be greater than zero",
            ));
        }
        if self.max_stack_bytes == 0 {
            return Err(SandboxError::invalid_config(
                "max_stack_bytes must be greater than zero",
            ));
        }
        if self.max_operation_bytes == 0 {
            return Err(SandboxError::invalid_config(
                "max_operation_bytes must be greater than zero",
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::invalid_config(
                "max_output_bytes must be greater than zero",
            ));
        }
        Ok(())
    }
}
