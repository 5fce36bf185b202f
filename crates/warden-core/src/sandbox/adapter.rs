//! Language-specific preparation of guest code

use super::backend::GuestProgram;
use super::backend::engine::ThrownError;
use super::tools::ToolCatalog;
use crate::error::SandboxError;
use rquickjs::{Context, Error as JsError, Module, Runtime};
use serde_json::{Map, Value};
use std::fmt::Write as _;

/// Output of [`RuntimeAdapter::prepare`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedCode {
    /// Code to evaluate; its completion value (or promise) is the result
    pub compiled_code: String,
    /// Script evaluated before the code in the same scope
    pub sandbox_bindings: String,
    /// Type declarations of the installed bridges
    pub declarations: Option<String>,
    /// Tools the bindings expose to the guest
    pub bridged_tools: Vec<String>,
}

impl PreparedCode {
    /// Code evaluated as-is with no bindings
    pub fn passthrough(code: &str) -> Self {
        Self {
            compiled_code: code.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn program(&self) -> GuestProgram {
        GuestProgram {
            bindings: self.sandbox_bindings.clone(),
            code: self.compiled_code.clone(),
        }
    }
}

/// Pluggable preparation step run before every execution
pub trait RuntimeAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Language names this adapter accepts
    fn languages(&self) -> &[&'static str];

    /// Compile and wrap `code`, synthesizing tool bridges when a context is given
    ///
    /// Failures must be [`SandboxError::Compilation`].
    fn prepare(
        &self,
        code: &str,
        context: Option<&Map<String, Value>>,
        tools: &ToolCatalog,
    ) -> Result<PreparedCode, SandboxError>;
}

/// Heap ceiling of the parse-only runtime
const COMPILER_MEMORY_LIMIT: usize = 32 * 1024 * 1024;
/// Stack ceiling of the parse-only runtime; bounds parser recursion
const COMPILER_STACK_LIMIT: usize = 1024 * 1024;

/// Runs code as the body of an async function so top-level `await` and
/// `return` work, and exposes granted tools as `tools.<name>(params)`.
#[derive(Debug, Clone, Default)]
pub struct JavaScriptAdapter;

impl JavaScriptAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Parse the wrapped body without running it
    ///
    /// The body is declared as a module and never evaluated, so text that closes
    /// the wrapper early still cannot execute here. Module code parses in strict
    /// mode.
    fn syntax_check(&self, code: &str) -> Result<(), SandboxError> {
        let runtime = Runtime::new()
            .map_err(|e| SandboxError::internal(format!("failed to start compiler: {}", e)))?;
        runtime.set_memory_limit(COMPILER_MEMORY_LIMIT);
        runtime.set_max_stack_size(COMPILER_STACK_LIMIT);
        let context = Context::full(&runtime)
            .map_err(|e| SandboxError::internal(format!("failed to start compiler: {}", e)))?;

        let source = format!("export default async function () {{{}\n}}", code);
        context.with(|ctx| match Module::declare(ctx.clone(), "guest", source) {
            Ok(_) => Ok(()),
            Err(JsError::Exception) => Err(ThrownError::catch(&ctx).into_compilation_error()),
            Err(e) => Err(SandboxError::compilation(e.to_string())),
        })
    }

    fn bindings(tools: &ToolCatalog) -> Result<String, SandboxError> {
        let mut script = String::from("globalThis.tools = Object.freeze({\n");
        for name in tools.names() {
            let literal = serde_json::to_string(name)
                .map_err(|e| SandboxError::internal(format!("bad tool name: {}", e)))?;
            let _ = writeln!(
                script,
                "    {literal}: async (params) => __tool_result(__host_call_tool({literal}, JSON.stringify(params === undefined ? {{}} : params))),",
            );
        }
        script.push_str("});\n");
        Ok(script)
    }

    fn declarations(tools: &ToolCatalog) -> String {
        let mut out = String::from("declare const tools: {\n");
        for name in tools.names() {
            let Some(tool) = tools.get(name) else { continue };
            let _ = writeln!(out, "    /** {} */", tool.description());
            let _ = writeln!(
                out,
                "    {}(params: {}): Promise<unknown>;",
                name,
                schema_to_type(&tool.json_schema())
            );
        }
        out.push_str("};\n");
        out
    }
}

impl RuntimeAdapter for JavaScriptAdapter {
    fn name(&self) -> &str {
        "javascript"
    }

    fn languages(&self) -> &[&'static str] {
        &["javascript", "js"]
    }

    fn prepare(
        &self,
        code: &str,
        context: Option<&Map<String, Value>>,
        tools: &ToolCatalog,
    ) -> Result<PreparedCode, SandboxError> {
        self.syntax_check(code)?;

        // Guest code stays on line 1 so reported positions match its source
        let compiled_code = format!("(async () => {{{}\n}})()", code);

        let granted = tools.granted();
        if context.is_none() || granted.is_empty() {
            return Ok(PreparedCode {
                compiled_code,
                ..Default::default()
            });
        }

        Ok(PreparedCode {
            compiled_code,
            sandbox_bindings: Self::bindings(&granted)?,
            declarations: Some(Self::declarations(&granted)),
            bridged_tools: granted.names().map(str::to_string).collect(),
        })
    }
}

/// Best-effort TypeScript rendering of a JSON schema
fn schema_to_type(schema: &Value) -> String {
    match schema.get("type").and_then(Value::as_str) {
        Some("string") => "string".to_string(),
        Some("number" | "integer") => "number".to_string(),
        Some("boolean") => "boolean".to_string(),
        Some("array") => match schema.get("items") {
            Some(items) => format!("{}[]", schema_to_type(items)),
            None => "unknown[]".to_string(),
        },
        Some("object") => {
            let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
                return "Record<string, unknown>".to_string();
            };
            let required: Vec<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|r| r.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let fields = properties
                .iter()
                .map(|(key, prop)| {
                    let optional = if required.contains(&key.as_str()) { "" } else { "?" };
                    format!("{}{}: {}", key, optional, schema_to_type(prop))
                })
                .collect::<Vec<_>>()
                .join("; ");
            format!("{{ {} }}", fields)
        }
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::tools::test_tools::EchoTool;
    use std::sync::Arc;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new().with_tool(Arc::new(EchoTool))
    }

    #[test]
    fn test_bridges_only_with_context() {
        let adapter = JavaScriptAdapter::new();

        let without = adapter.prepare("return 1;", None, &catalog()).unwrap();
        assert!(without.sandbox_bindings.is_empty());
        assert!(without.bridged_tools.is_empty());

        let context = Map::new();
        let with = adapter.prepare("return 1;", Some(&context), &catalog()).unwrap();
        assert!(with.sandbox_bindings.contains("\"echo\""));
        assert_eq!(with.bridged_tools, vec!["echo".to_string()]);
        let declarations = with.declarations.unwrap();
        assert!(declarations.contains("echo(params: { text: string }): Promise<unknown>;"));
    }

    #[test]
    fn test_syntax_error_is_compilation_failure() {
        let adapter = JavaScriptAdapter::new();
        let err = adapter
            .prepare("let = ;", None, &ToolCatalog::new())
            .unwrap_err();
        assert!(matches!(err, SandboxError::Compilation { .. }));
        assert!(err.to_string().starts_with("Compilation failed"));
    }

    #[test]
    fn test_syntax_check_never_runs_guest_code() {
        let adapter = JavaScriptAdapter::new();
        let escape = "}, (() => { throw new Error('ran while parsing'); })(), function () {";
        if let Err(err) = adapter.prepare(escape, None, &ToolCatalog::new()) {
            assert!(!err.to_string().contains("ran while parsing"), "{}", err);
        }

        let started = std::time::Instant::now();
        let _ = adapter.prepare("}, (() => { for (;;) {} })(), function () {", None, &ToolCatalog::new());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let adapter = JavaScriptAdapter::new();
        let err = adapter
            .prepare("const ok = 1;\nconst = ;", None, &ToolCatalog::new())
            .unwrap_err();
        assert!(matches!(err, SandboxError::Compilation { line: Some(2), .. }), "{:?}", err);
    }

    #[test]
    fn test_compiled_code_keeps_first_line() {
        let adapter = JavaScriptAdapter::new();
        let prepared = adapter.prepare("return 2;", None, &ToolCatalog::new()).unwrap();
        assert!(prepared.compiled_code.starts_with("(async () => {return 2;"));
    }

    #[test]
    fn test_schema_rendering() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "ids": { "type": "array", "items": { "type": "integer" } },
                "verbose": { "type": "boolean" }
            },
            "required": ["ids"]
        });
        assert_eq!(schema_to_type(&schema), "{ ids: number[]; verbose?: boolean }");
    }
}
