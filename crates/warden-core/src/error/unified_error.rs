//! UnifiedError trait and its implementation for SandboxError

use super::types::SandboxError;

/// Unified error trait that all Warden errors implement.
///
/// - error_code(): Unique code for programmatic error identification
/// - is_retryable(): Whether repeating the same call can succeed
pub trait UnifiedError: std::error::Error + Send + Sync {
    /// Get the error code for programmatic handling
    fn error_code(&self) -> &str;

    /// Check if this error is retryable
    fn is_retryable(&self) -> bool {
        false
    }
}

impl UnifiedError for SandboxError {
    fn error_code(&self) -> &str {
        match self {
            Self::ResourceLimit(_) => "WARDEN_RESOURCE_LIMIT",
            Self::PolicyViolation(_) => "WARDEN_POLICY_VIOLATION",
            Self::Compilation { .. } => "WARDEN_COMPILATION",
            Self::Timeout { .. } => "WARDEN_TIMEOUT",
            Self::OutOfMemory { .. } => "WARDEN_OUT_OF_MEMORY",
            Self::UnsupportedLanguage { .. } => "WARDEN_UNSUPPORTED_LANGUAGE",
            Self::ToolExecution { .. } => "WARDEN_TOOL_EXECUTION",
            Self::Runtime { .. } => "WARDEN_RUNTIME",
            Self::InvalidConfig(_) => "WARDEN_INVALID_CONFIG",
            Self::Internal(_) => "WARDEN_INTERNAL",
        }
    }

    fn is_retryable(&self) -> bool {
        // Limits can be raised or load reduced by the caller
        matches!(self, Self::ResourceLimit(_) | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct_for_oom_and_runtime() {
        let oom = SandboxError::OutOfMemory { limit_bytes: 1024 };
        let runtime = SandboxError::Runtime {
            message: "boom".into(),
            stack: None,
        };
        assert_ne!(oom.error_code(), runtime.error_code());
    }

    #[test]
    fn test_retryable() {
        assert!(SandboxError::Timeout { limit_ms: 10 }.is_retryable());
        assert!(!SandboxError::compilation("x").is_retryable());
    }
}
