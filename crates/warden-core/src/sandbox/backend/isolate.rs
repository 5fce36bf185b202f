//! Heavy backend: one engine instance per run

use super::{GuestJob, IsolationBackend, RunReport, engine};
use crate::error::SandboxError;
use crate::sandbox::config::{BackendKind, SandboxConfig};
use rquickjs::Runtime;
use tokio::sync::oneshot;

/// Runs every job in its own QuickJS runtime with a hard heap ceiling.
///
/// The runtime is created on a blocking thread, used for exactly one job and
/// dropped with it, so nothing a guest allocates outlives its run.
#[derive(Debug, Clone)]
pub struct IsolateBackend {
    memory_limit_bytes: u64,
    max_stack_bytes: u64,
}

impl IsolateBackend {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            memory_limit_bytes: config.memory_limit_bytes,
            max_stack_bytes: config.max_stack_bytes,
        }
    }

    fn run(&self, job: GuestJob) -> RunReport {
        let runtime = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                return RunReport::failed(SandboxError::internal(format!(
                    "failed to create isolate: {}",
                    e
                )));
            }
        };
        runtime.set_memory_limit(self.memory_limit_bytes as usize);
        runtime.set_max_stack_size(self.max_stack_bytes as usize);

        let report = engine::run_job(&runtime, &job, Some(self.memory_limit_bytes));
        drop(job);
        drop(runtime);
        report
    }
}

impl IsolationBackend for IsolateBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Heavy
    }

    fn memory_limit_bytes(&self) -> Option<u64> {
        Some(self.memory_limit_bytes)
    }

    fn start(&self, job: GuestJob) -> Result<oneshot::Receiver<RunReport>, SandboxError> {
        let (tx, rx) = oneshot::channel();
        let backend = self.clone();
        let runtime = job.runtime.clone();

        runtime.spawn_blocking(move || {
            let report = backend.run(job);
            let _ = tx.send(report);
        });
        Ok(rx)
    }
}
