//! Warden Core Library
//!
//! Runs untrusted guest scripts in an isolated engine and governs what they may
//! do: content policy checks, per-session resource budgets, validation of the
//! render operations they emit, and batching of those operations for delivery.

pub mod batcher;
pub mod config;
pub mod error;
pub mod governor;
pub mod logging;
pub mod policy;
pub mod protocol;
pub mod sandbox;

// Re-export commonly used types
pub use batcher::{BatchSink, BatchStats, BatcherConfig, OperationBatcher};
pub use config::{WardenConfig, load_config};
pub use error::{ResourceLimitError, SandboxError, UnifiedError, WardenResult};
pub use governor::{LimitType, ResourceGovernor, ResourceLimitsConfig, ResourceUsage};
pub use logging::{LogFormat, LoggingConfig, init_logging};
pub use policy::{CspConfig, CspDirective, CspPolicy, CspReport, PolicyValidator, PolicyViolation};
pub use protocol::{DomOperation, OperationKind, OperationValidator};
pub use sandbox::{
    BackendKind, ExecutionRequest, ExecutionResult, HostTool, Sandbox, SandboxBuilder,
    SandboxConfig, ToolCatalog,
};
