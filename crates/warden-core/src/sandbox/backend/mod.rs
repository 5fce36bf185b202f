//! Isolation backends
//!
//! Both backends run guest code on a QuickJS engine off the async runtime and talk
//! to the owning session over channels: output and operations stream through an
//! unbounded event channel, the final outcome arrives on a oneshot. Termination is
//! requested through a [`CancellationToken`] polled by the engine's interrupt hook.

pub(crate) mod engine;
mod isolate;
mod shared;

pub use isolate::IsolateBackend;
pub use shared::SharedContextBackend;

use super::config::{BackendKind, SandboxConfig};
use super::tools::ToolCatalog;
use super::types::{ExecutionContext, OutputStream};
use crate::error::SandboxError;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Languages the engine evaluates without an adapter
pub const ENGINE_LANGUAGES: &[&str] = &["javascript"];

/// Something the guest did while running
#[derive(Debug, Clone, PartialEq)]
pub enum GuestEvent {
    Output(OutputStream, String),
    /// Serialized operation as emitted, not yet validated
    Operation(String),
}

/// Code ready to be evaluated
#[derive(Debug, Clone, Default)]
pub struct GuestProgram {
    /// Evaluated first, in the same fresh scope
    pub bindings: String,
    /// Its completion value (or the promise it yields) is the result
    pub code: String,
}

/// Everything one run needs, moved onto the engine thread
pub struct GuestJob {
    pub program: GuestProgram,
    pub tools: ToolCatalog,
    pub context: ExecutionContext,
    pub events: mpsc::UnboundedSender<GuestEvent>,
    /// Bytes of console output forwarded per stream before truncation
    pub output_limit_bytes: usize,
    pub cancel: CancellationToken,
    /// Used by tool bridges to drive async tools to completion
    pub runtime: Handle,
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Option<Value>),
    Failed(SandboxError),
    /// Stopped by the cancellation token
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Engine heap in use when the run finished
    pub heap_used_bytes: Option<u64>,
}

impl RunReport {
    fn failed(error: SandboxError) -> Self {
        Self {
            outcome: RunOutcome::Failed(error),
            heap_used_bytes: None,
        }
    }
}

/// A strategy for running guest code in isolation
pub trait IsolationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Languages evaluated directly
    fn languages(&self) -> &[&'static str] {
        ENGINE_LANGUAGES
    }

    /// Heap ceiling enforced per run, if any
    fn memory_limit_bytes(&self) -> Option<u64>;

    /// Start a run; the report arrives on the returned receiver
    fn start(&self, job: GuestJob) -> Result<oneshot::Receiver<RunReport>, SandboxError>;

    /// Release engine resources; a later `start` brings them back
    fn shutdown(&self) {}
}

/// Build the backend selected in configuration
pub fn create_backend(config: &SandboxConfig) -> Box<dyn IsolationBackend> {
    match config.backend {
        BackendKind::Heavy => Box::new(IsolateBackend::new(config)),
        BackendKind::Light => Box::new(SharedContextBackend::new(config)),
    }
}
