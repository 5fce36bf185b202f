//! Host capabilities lent to guest code

use super::types::ExecutionContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Catalog entry that would let a guest start a nested execution
pub const RESERVED_TOOL_NAME: &str = "execute_code";

/// Error type for host tool calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// Invalid parameters provided by the guest
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Tool execution failed
    #[error("{0}")]
    ExecutionFailed(String),

    /// Tool not granted to this execution
    #[error("Tool not found: {0}")]
    NotFound(String),
}

impl crate::error::UnifiedError for ToolError {
    fn error_code(&self) -> &str {
        match self {
            ToolError::InvalidParameters(_) => "WARDEN_TOOL_INVALID_PARAMS",
            ToolError::ExecutionFailed(_) => "WARDEN_TOOL_FAILED",
            ToolError::NotFound(_) => "WARDEN_TOOL_NOT_FOUND",
        }
    }
}

/// One content block of a tool result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Result of a tool call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
}

impl ToolOutput {
    /// Single text block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text: text.into(),
            }],
        }
    }

    /// Text blocks joined in order
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A host-implemented capability callable from guest code
#[async_trait]
pub trait HostTool: Send + Sync {
    /// Name the guest calls the tool by
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the parameters object
    fn json_schema(&self) -> Value;

    async fn execute(
        &self,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Tools granted to one execution, keyed by name
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, Arc<dyn HostTool>>,
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing one with the same name
    pub fn register(&mut self, tool: Arc<dyn HostTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn HostTool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn HostTool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The subset a guest may reach: everything but the reserved entry
    pub fn granted(&self) -> ToolCatalog {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| name.as_str() != RESERVED_TOOL_NAME)
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        ToolCatalog { tools }
    }

    /// The named entries that exist in this catalog
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> ToolCatalog {
        let tools = names
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                self.tools
                    .get(name)
                    .map(|tool| (name.to_string(), Arc::clone(tool)))
            })
            .collect();
        ToolCatalog { tools }
    }
}

#[cfg(test)]
pub(crate) mod test_tools {
    use super::*;

    /// Echoes its `text` parameter
    pub struct EchoTool;

    #[async_trait]
    impl HostTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text parameter"
        }

        fn json_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(
            &self,
            params: Value,
            _context: &ExecutionContext,
        ) -> Result<ToolOutput, ToolError> {
            let text = params
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::InvalidParameters("missing text".to_string()))?;
            Ok(ToolOutput::text(text))
        }
    }
}
