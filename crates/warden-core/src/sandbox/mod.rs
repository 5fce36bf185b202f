//! Execution sandbox
//!
//! Runs untrusted guest code under the session's resource governor and turns
//! what it emits into validated, accounted, batched render operations.
//!
//! Per call:
//! 1. language and script size gates
//! 2. optional script policy check
//! 3. preparation through the runtime adapter
//! 4. run on the isolation backend, racing the governor deadline
//!
//! Every call starts in a fresh engine context; only the governor's counters and
//! the remote tree handles survive between calls.

pub mod adapter;
pub mod backend;
pub mod config;
pub mod tools;
pub mod types;

pub use adapter::{JavaScriptAdapter, PreparedCode, RuntimeAdapter};
pub use backend::{
    GuestEvent, GuestJob, GuestProgram, IsolateBackend, IsolationBackend, RunOutcome,
    RunReport, SharedContextBackend, create_backend,
};
pub use config::{BackendKind, SandboxConfig};
pub use tools::{HostTool, RESERVED_TOOL_NAME, ToolCatalog, ToolContent, ToolError, ToolOutput};
pub use types::{
    CapturedOutput, ExecutionContext, ExecutionRequest, ExecutionResult, OutputStream,
    SessionStats,
};

use crate::batcher::OperationBatcher;
use crate::config::WardenConfig;
use crate::error::{ResourceLimitError, SandboxError};
use crate::governor::{ResourceGovernor, ResourceLimitsConfig, ResourceUsage};
use crate::policy::PolicyValidator;
use crate::protocol::{DomOperation, OperationValidator};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One guest session: a governor, a backend and an optional batcher
///
/// `execute` takes `&mut self`, so a sandbox runs one guest at a time. Give each
/// concurrent guest its own instance.
pub struct Sandbox {
    session_id: Uuid,
    governor: ResourceGovernor,
    backend: Box<dyn IsolationBackend>,
    adapter: Option<Arc<dyn RuntimeAdapter>>,
    policy: Option<Arc<PolicyValidator>>,
    validator: OperationValidator,
    batcher: Option<OperationBatcher>,
    max_output_bytes: usize,
    /// Live element handles and their tags
    elements: HashMap<String, String>,
    stats: SessionStats,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("session_id", &self.session_id)
            .field("backend", &self.backend.kind())
            .field("adapter", &self.adapter.as_ref().map(|a| a.name().to_string()))
            .field("stats", &self.stats)
            .finish()
    }
}

impl Sandbox {
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::default()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn governor(&self) -> &ResourceGovernor {
        &self.governor
    }

    /// Current counters against their limits
    pub fn usage(&self) -> ResourceUsage {
        self.governor.usage()
    }

    pub fn session_stats(&self) -> SessionStats {
        self.stats
    }

    /// Backend languages plus adapter languages, sorted
    pub fn supported_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .backend
            .languages()
            .iter()
            .chain(self.adapter.iter().flat_map(|a| a.languages().iter()))
            .map(|l| l.to_string())
            .collect();
        languages.sort();
        languages.dedup();
        languages
    }

    /// Run guest code; every failure comes back inside the result
    pub async fn execute(&mut self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        self.stats.executions += 1;
        let mut output = CapturedOutput::new(request.capture_output);

        let result = self.run(request, &mut output).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                debug!(session = %self.session_id, elapsed_ms, "guest execution finished");
                ExecutionResult::succeeded(value, output, elapsed_ms)
            }
            Err(error) => {
                debug!(session = %self.session_id, elapsed_ms, error = %error, "guest execution failed");
                ExecutionResult::failed(&error, output, elapsed_ms)
            }
        }
    }

    /// Reset the governor, deliver queued operations and release engine resources
    pub async fn cleanup(&mut self) {
        self.governor.reset();
        self.elements.clear();
        if let Some(batcher) = &self.batcher {
            if let Err(e) = batcher.flush().await {
                warn!("failed to flush operations during cleanup: {}", e);
            }
        }
        self.backend.shutdown();
        info!(session = %self.session_id, executions = self.stats.executions, "sandbox session cleaned up");
    }

    async fn run(
        &mut self,
        request: ExecutionRequest,
        output: &mut CapturedOutput,
    ) -> Result<Option<Value>, SandboxError> {
        let language = request.language.to_ascii_lowercase();
        if !self.supported_languages().contains(&language) {
            return Err(SandboxError::UnsupportedLanguage {
                language: request.language,
                supported: self.supported_languages(),
            });
        }

        self.governor.validate_script_size(&request.code)?;
        if let Some(policy) = &self.policy {
            policy.validate_script(&request.code)?;
        }

        let prepared = self.prepare(&language, &request).await?;
        let tools = if prepared.bridged_tools.is_empty() {
            ToolCatalog::new()
        } else {
            request.tool_catalog.subset(&prepared.bridged_tools)
        };

        let limit = self.effective_timeout(request.timeout_ms);
        let limit_ms = limit.as_millis() as u64;
        let cancel = CancellationToken::new();
        let on_deadline = cancel.clone();
        self.governor
            .start_execution_timer_with(limit, move || on_deadline.cancel())?;

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let job = GuestJob {
            program: prepared.program(),
            tools,
            context: ExecutionContext::new(self.session_id, request.context.unwrap_or_default()),
            events: events_tx,
            output_limit_bytes: self.max_output_bytes,
            cancel: cancel.clone(),
            runtime: Handle::current(),
        };

        let mut report_rx = match self.backend.start(job) {
            Ok(rx) => rx,
            Err(e) => {
                self.governor.stop_execution_timer();
                return Err(e);
            }
        };

        let mut breach: Option<ResourceLimitError> = None;
        let report = loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => {
                    if breach.is_none() {
                        if let Err(limit) = self.handle_event(event, output).await {
                            breach = Some(limit);
                            cancel.cancel();
                        }
                    }
                }
                report = &mut report_rx => break report.ok(),
                _ = cancel.cancelled() => break None,
            }
        };

        let Some(report) = report else {
            // Keep partial output; operations from a terminated guest are discarded
            while let Ok(event) = events.try_recv() {
                if let GuestEvent::Output(stream, text) = event {
                    output.write(stream, &text);
                }
            }
            return Err(self.terminated(breach, limit_ms, &cancel));
        };

        // Events sent before the report are still queued
        while let Ok(event) = events.try_recv() {
            if breach.is_some() {
                break;
            }
            if let Err(limit) = self.handle_event(event, output).await {
                breach = Some(limit);
            }
        }

        self.governor.stop_execution_timer();
        if let Some(bytes) = report.heap_used_bytes {
            self.governor.record_heap_usage(bytes);
            self.governor.check_memory_usage();
        }

        if breach.is_some() {
            return Err(self.terminated(breach, limit_ms, &cancel));
        }

        match report.outcome {
            RunOutcome::Completed(value) => Ok(value),
            RunOutcome::Failed(error) => Err(error),
            RunOutcome::Interrupted => Err(self.terminated(None, limit_ms, &cancel)),
        }
    }

    /// Stop the guest and reset the governor after a deadline or limit breach
    fn terminated(
        &mut self,
        breach: Option<ResourceLimitError>,
        limit_ms: u64,
        cancel: &CancellationToken,
    ) -> SandboxError {
        cancel.cancel();
        self.governor.reset();
        self.elements.clear();
        match breach {
            Some(limit) => {
                warn!(session = %self.session_id, "guest terminated: {}", limit);
                limit.into()
            }
            None => {
                warn!(session = %self.session_id, limit_ms, "guest terminated at deadline");
                SandboxError::Timeout { limit_ms }
            }
        }
    }

    /// Adapter work runs on a blocking thread, off the async executor
    async fn prepare(
        &self,
        language: &str,
        request: &ExecutionRequest,
    ) -> Result<PreparedCode, SandboxError> {
        let Some(adapter) = self
            .adapter
            .as_ref()
            .filter(|a| a.languages().contains(&language))
        else {
            return Ok(PreparedCode::passthrough(&request.code));
        };

        let adapter = Arc::clone(adapter);
        let code = request.code.clone();
        let context = request.context.clone();
        let tools = request.tool_catalog.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            adapter.prepare(&code, context.as_ref(), &tools)
        })
        .await
        .map_err(|e| SandboxError::internal(format!("preparation task failed: {}", e)))?;

        prepared.map_err(|e| match e {
            SandboxError::Compilation { .. } => e,
            other => SandboxError::compilation(other.to_string()),
        })
    }

    /// Request timeout capped at the governor maximum; zero means the maximum
    fn effective_timeout(&self, timeout_ms: u64) -> Duration {
        let max = self.governor.limits().max_execution_time;
        if timeout_ms == 0 {
            max
        } else {
            Duration::from_millis(timeout_ms).min(max)
        }
    }

    async fn handle_event(
        &mut self,
        event: GuestEvent,
        output: &mut CapturedOutput,
    ) -> Result<(), ResourceLimitError> {
        match event {
            GuestEvent::Output(stream, text) => {
                output.write(stream, &text);
                Ok(())
            }
            GuestEvent::Operation(raw) => self.accept_operation(&raw).await,
        }
    }

    /// Validate, account and queue one emitted operation
    ///
    /// Malformed or policy-rejected operations are dropped; only a governor
    /// breach is an error.
    async fn accept_operation(&mut self, raw: &str) -> Result<(), ResourceLimitError> {
        let op = match self.validator.decode(raw) {
            Ok(op) => op,
            Err(reason) => {
                self.stats.operations_rejected += 1;
                warn!(session = %self.session_id, "dropping guest operation: {}", reason);
                return Ok(());
            }
        };

        if !self.attribute_allowed(&op) {
            self.stats.operations_rejected += 1;
            return Ok(());
        }

        // Node accounting follows live handles only
        match &op {
            DomOperation::CreateElement { id, .. } if self.elements.contains_key(id) => {
                self.reject_handle("createElement", id);
                return Ok(());
            }
            DomOperation::RemoveChild { child_id, .. } if !self.elements.contains_key(child_id) => {
                self.reject_handle("removeChild", child_id);
                return Ok(());
            }
            DomOperation::CreateElement { id, tag, .. } => {
                self.governor.register_dom_node()?;
                self.elements.insert(id.clone(), tag.clone());
            }
            DomOperation::RemoveChild { child_id, .. } => {
                self.elements.remove(child_id);
                self.governor.unregister_dom_node();
            }
            DomOperation::AddEventListener { .. } => self.governor.register_event_listener()?,
            _ => {}
        }
        self.stats.operations_accepted += 1;

        if let Some(batcher) = &self.batcher {
            let queued = if op.requires_immediate_delivery() {
                batcher.flush_immediate(op).await
            } else {
                batcher.add(op)
            };
            if let Err(e) = queued {
                warn!("operation batcher unavailable: {}", e);
            }
        }
        Ok(())
    }

    fn reject_handle(&mut self, operation: &str, handle: &str) {
        self.stats.operations_rejected += 1;
        warn!(session = %self.session_id, handle, "dropping {}: handle is not a live element", operation);
    }

    fn attribute_allowed(&self, op: &DomOperation) -> bool {
        let (Some(policy), DomOperation::SetAttribute { element_id, name, value }) = (&self.policy, op)
        else {
            return true;
        };

        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let tag = self.elements.get(element_id).map(String::as_str).unwrap_or("");
        match policy.validate_markup_attributes(tag, [(name.as_str(), value.as_str())]) {
            Ok(_) => true,
            Err(violation) => {
                warn!(session = %self.session_id, "dropping setAttribute: {}", violation);
                false
            }
        }
    }
}

/// Builder for [`Sandbox`]
#[derive(Default)]
pub struct SandboxBuilder {
    limits: ResourceLimitsConfig,
    config: SandboxConfig,
    adapter: Option<Arc<dyn RuntimeAdapter>>,
    policy: Option<Arc<PolicyValidator>>,
    batcher: Option<OperationBatcher>,
}

impl SandboxBuilder {
    /// Limits, engine settings, policy and the JavaScript adapter from a loaded config
    pub fn from_config(config: &WardenConfig) -> Result<Self, SandboxError> {
        let policy = PolicyValidator::new(config.csp.clone())?;
        Ok(Self {
            limits: config.limits.clone(),
            config: config.sandbox.clone(),
            adapter: Some(Arc::new(JavaScriptAdapter::new())),
            policy: Some(Arc::new(policy)),
            batcher: None,
        })
    }

    pub fn limits(mut self, limits: ResourceLimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn config(mut self, config: SandboxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn RuntimeAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Use [`JavaScriptAdapter`]
    pub fn javascript(self) -> Self {
        self.adapter(Arc::new(JavaScriptAdapter::new()))
    }

    /// Check scripts and attributes against a content policy
    pub fn policy(mut self, policy: Arc<PolicyValidator>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Queue accepted operations in this batcher
    pub fn batcher(mut self, batcher: OperationBatcher) -> Self {
        self.batcher = Some(batcher);
        self
    }

    pub fn build(self) -> Result<Sandbox, SandboxError> {
        self.config.validate()?;
        let governor = ResourceGovernor::new(self.limits)?;
        let backend = create_backend(&self.config);
        let session_id = Uuid::new_v4();

        debug!(session = %session_id, backend = %backend.kind(), "sandbox created");
        Ok(Sandbox {
            session_id,
            governor,
            backend,
            adapter: self.adapter,
            policy: self.policy,
            validator: OperationValidator::new().with_max_payload_bytes(self.config.max_operation_bytes),
            batcher: self.batcher,
            max_output_bytes: self.config.max_output_bytes,
            elements: HashMap::new(),
            stats: SessionStats::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::builder().javascript().build().unwrap()
    }

    #[tokio::test]
    async fn test_returns_value_and_output() {
        let mut sandbox = sandbox();
        let result = sandbox
            .execute(ExecutionRequest::javascript("console.log('hi', 1); return { n: 2 };"))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.return_value, Some(serde_json::json!({"n": 2})));
        assert_eq!(result.stdout.as_deref(), Some("hi 1\n"));
    }

    #[tokio::test]
    async fn test_passthrough_completion_value() {
        let mut sandbox = Sandbox::builder().build().unwrap();
        let result = sandbox.execute(ExecutionRequest::javascript("1 + 2")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.return_value, Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn test_unsupported_language() {
        let mut sandbox = sandbox();
        let result = sandbox.execute(ExecutionRequest::new("python", "print(1)")).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("python"));
        assert!(error.contains("javascript"));
        assert_eq!(result.error_code.as_deref(), Some("WARDEN_UNSUPPORTED_LANGUAGE"));
    }

    #[tokio::test]
    async fn test_effective_timeout() {
        let sandbox = Sandbox::builder()
            .limits(ResourceLimitsConfig {
                max_execution_time: Duration::from_millis(500),
                ..Default::default()
            })
            .build()
            .unwrap();
        assert_eq!(sandbox.effective_timeout(0), Duration::from_millis(500));
        assert_eq!(sandbox.effective_timeout(100), Duration::from_millis(100));
        assert_eq!(sandbox.effective_timeout(10_000), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_operations_are_accounted() {
        let mut sandbox = sandbox();
        let result = sandbox
            .execute(ExecutionRequest::javascript(
                "const a = host.createElement('div'); const b = host.createElement('span');\n\
                 host.appendChild(a, b); host.on(b, 'click', () => {}); host.removeChild(a, b);\n\
                 host.emit({ type: 'executeScript' });",
            ))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(sandbox.governor().dom_node_count(), 1);
        assert_eq!(sandbox.governor().event_listener_count(), 1);

        let stats = sandbox.session_stats();
        assert_eq!(stats.operations_accepted, 5);
        assert_eq!(stats.operations_rejected, 1);
    }

    #[tokio::test]
    async fn test_unknown_handles_do_not_free_node_budget() {
        let mut sandbox = Sandbox::builder()
            .limits(ResourceLimitsConfig {
                max_dom_nodes: 2,
                ..Default::default()
            })
            .javascript()
            .build()
            .unwrap();

        let result = sandbox
            .execute(ExecutionRequest::javascript(
                "const a = host.createElement('div'); const b = host.createElement('div');\n\
                 host.removeChild('root', 'ghost'); host.removeChild('root', 'ghost');\n\
                 host.createElement('div'); host.createElement('div');",
            ))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("WARDEN_RESOURCE_LIMIT"));
        assert_eq!(sandbox.session_stats().operations_rejected, 2);
    }

    #[tokio::test]
    async fn test_double_remove_and_reused_handle_rejected() {
        let mut sandbox = sandbox();
        let result = sandbox
            .execute(ExecutionRequest::javascript(
                "const a = host.createElement('ul'); const b = host.createElement('li');\n\
                 host.removeChild(a, b); host.removeChild(a, b);\n\
                 host.emit({ type: 'createElement', id: a, tag: 'ol' });",
            ))
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(sandbox.governor().dom_node_count(), 1);
        let stats = sandbox.session_stats();
        assert_eq!(stats.operations_accepted, 3);
        assert_eq!(stats.operations_rejected, 2);
    }

    #[tokio::test]
    async fn test_cleanup_resets_counters() {
        let mut sandbox = sandbox();
        sandbox
            .execute(ExecutionRequest::javascript("host.createElement('p');"))
            .await;
        assert_eq!(sandbox.governor().dom_node_count(), 1);
        sandbox.cleanup().await;
        assert_eq!(sandbox.governor().dom_node_count(), 0);
    }
}
