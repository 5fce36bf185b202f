//! Core error types for Warden

use crate::governor::LimitType;
use crate::policy::PolicyViolation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Warden operations
pub type WardenResult<T> = Result<T, SandboxError>;

/// A budget enforced by the resource governor was crossed.
///
/// Raised by the mutation call that crossed the boundary; the offending item is
/// rejected rather than admitted and flagged afterwards.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Resource limit exceeded: {limit_type} ({current}/{max})")]
pub struct ResourceLimitError {
    /// Which budget was crossed
    pub limit_type: LimitType,
    /// Value after the rejected mutation
    pub current: u64,
    /// Configured maximum
    pub max: u64,
}

impl ResourceLimitError {
    pub fn new(limit_type: LimitType, current: u64, max: u64) -> Self {
        Self {
            limit_type,
            current,
            max,
        }
    }
}

/// Errors that can occur while preparing or running guest code
///
/// `Sandbox::execute` never returns these directly; they are folded into an
/// `ExecutionResult` so a failing guest cannot unwind through the host.
#[derive(Error, Debug, Clone)]
pub enum SandboxError {
    /// A governor budget was crossed
    #[error(transparent)]
    ResourceLimit(#[from] ResourceLimitError),

    /// Content was rejected by the CSP policy
    #[error(transparent)]
    PolicyViolation(#[from] PolicyViolation),

    /// Guest code never ran because preparation failed
    #[error("Compilation failed: {message}{}", format_location(.line, .column))]
    Compilation {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
    },

    /// Guest code was terminated at the deadline
    #[error("Execution timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    /// Heavy backend memory ceiling was hit
    #[error("Out of memory: guest exceeded the {limit_bytes} byte heap ceiling")]
    OutOfMemory { limit_bytes: u64 },

    /// Requested language is not handled by the configured backend or adapter
    #[error("Unsupported language '{language}' (supported: {})", .supported.join(", "))]
    UnsupportedLanguage {
        language: String,
        supported: Vec<String>,
    },

    /// A host tool failed while serving a guest bridge call
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Guest code threw
    #[error("{message}")]
    Runtime {
        message: String,
        stack: Option<String>,
    },

    /// Construction-time misconfiguration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error
    #[error("Sandbox internal error: {0}")]
    Internal(String),
}

fn format_location(line: &Option<u32>, column: &Option<u32>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" (line {}, column {})", line, column),
        (Some(line), None) => format!(" (line {})", line),
        _ => String::new(),
    }
}

impl SandboxError {
    /// Create a compilation error without location information
    pub fn compilation(message: impl Into<String>) -> Self {
        Self::Compilation {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Source location for compilation errors
    pub fn location(&self) -> Option<(u32, Option<u32>)> {
        match self {
            Self::Compilation {
                line: Some(line),
                column,
                ..
            } => Some((*line, *column)),
            _ => None,
        }
    }

    /// Stack trace captured from the guest, if any
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::Runtime { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_limit_display() {
        let err = ResourceLimitError::new(LimitType::DomNodes, 6, 5);
        assert_eq!(err.to_string(), "Resource limit exceeded: domNodes (6/5)");
    }

    #[test]
    fn test_compilation_display_with_location() {
        let err = SandboxError::Compilation {
            message: "unexpected token".into(),
            line: Some(3),
            column: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "Compilation failed: unexpected token (line 3, column 7)"
        );
        assert_eq!(err.location(), Some((3, Some(7))));
    }

    #[test]
    fn test_timeout_names_limit() {
        let err = SandboxError::Timeout { limit_ms: 250 };
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_unsupported_language_lists_supported() {
        let err = SandboxError::UnsupportedLanguage {
            language: "python".into(),
            supported: vec!["javascript".into(), "typescript".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("python"));
        assert!(msg.contains("javascript, typescript"));
    }

    #[test]
    fn test_resource_limit_converts() {
        let err: SandboxError = ResourceLimitError::new(LimitType::ScriptSize, 11, 10).into();
        assert!(matches!(err, SandboxError::ResourceLimit(_)));
    }
}
