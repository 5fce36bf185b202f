//! Request and result types for guest execution

use super::tools::ToolCatalog;
use crate::error::{SandboxError, UnifiedError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single guest execution request
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Language of `code`, matched case-insensitively
    pub language: String,
    pub code: String,
    /// Requested deadline; 0 means the governor's maximum
    pub timeout_ms: u64,
    /// Collect console output into the result
    pub capture_output: bool,
    /// Caller context; tool bridges are only installed when present
    pub context: Option<Map<String, Value>>,
    /// Tools lent to this execution
    pub tool_catalog: ToolCatalog,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            timeout_ms: 0,
            capture_output: true,
            context: None,
            tool_catalog: ToolCatalog::new(),
        }
    }

    /// JavaScript request with output capture enabled
    pub fn javascript(code: impl Into<String>) -> Self {
        Self::new("javascript", code)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_tools(mut self, catalog: ToolCatalog) -> Self {
        self.tool_catalog = catalog;
        self
    }
}

/// Outcome of a guest execution; failures are data, never panics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable code of the failure (`WARDEN_TIMEOUT`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn succeeded(return_value: Option<Value>, output: CapturedOutput, execution_time_ms: u64) -> Self {
        let (stdout, stderr) = output.into_parts();
        Self {
            success: true,
            return_value,
            stdout,
            stderr,
            execution_time_ms,
            ..Default::default()
        }
    }

    pub fn failed(error: &SandboxError, output: CapturedOutput, execution_time_ms: u64) -> Self {
        let (stdout, stderr) = output.into_parts();
        Self {
            success: false,
            stdout,
            stderr,
            error: Some(error.to_string()),
            error_code: Some(error.error_code().to_string()),
            stack_trace: error.stack_trace().map(str::to_string),
            execution_time_ms,
            ..Default::default()
        }
    }
}

/// Per-call stdout/stderr buffers
///
/// `None` buffers mean capture was not requested and output is only logged.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    stdout: Option<String>,
    stderr: Option<String>,
}

impl CapturedOutput {
    pub fn new(capture: bool) -> Self {
        if capture {
            Self {
                stdout: Some(String::new()),
                stderr: Some(String::new()),
            }
        } else {
            Self::default()
        }
    }

    pub fn write(&mut self, stream: OutputStream, text: &str) {
        let buffer = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        match buffer {
            Some(buffer) => buffer.push_str(text),
            None => tracing::debug!(stream = ?stream, "guest output: {}", text.trim_end()),
        }
    }

    fn into_parts(self) -> (Option<String>, Option<String>) {
        (self.stdout, self.stderr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// What a tool sees about the execution that called it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub session_id: Uuid,
    pub execution_id: Uuid,
    pub values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(session_id: Uuid, values: Map<String, Value>) -> Self {
        Self {
            session_id,
            execution_id: Uuid::new_v4(),
            values,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Counters over the lifetime of one sandbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub executions: u64,
    pub operations_accepted: u64,
    pub operations_rejected: u64,
}
