//! Light backend: one long-lived engine shared by every run

use super::{GuestJob, IsolationBackend, RunReport, engine};
use crate::error::SandboxError;
use crate::sandbox::config::{BackendKind, SandboxConfig};
use parking_lot::Mutex;
use rquickjs::Runtime;
use std::sync::mpsc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct WorkItem {
    job: GuestJob,
    reply: oneshot::Sender<RunReport>,
}

/// Runs jobs on a single worker thread that owns one QuickJS runtime.
///
/// Each job still gets a fresh context (its own globals), but the heap is shared
/// and has no ceiling. Interruption relies on the engine reaching an interrupt
/// check, so a guest blocked inside a host call is only stopped once it returns.
pub struct SharedContextBackend {
    max_stack_bytes: u64,
    worker: Mutex<Option<mpsc::Sender<WorkItem>>>,
}

impl std::fmt::Debug for SharedContextBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContextBackend")
            .field("max_stack_bytes", &self.max_stack_bytes)
            .field("running", &self.worker.lock().is_some())
            .finish()
    }
}

impl SharedContextBackend {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            max_stack_bytes: config.max_stack_bytes,
            worker: Mutex::new(None),
        }
    }

    fn spawn_worker(&self) -> Result<mpsc::Sender<WorkItem>, SandboxError> {
        let (tx, rx) = mpsc::channel::<WorkItem>();
        let max_stack_bytes = self.max_stack_bytes as usize;

        thread::Builder::new()
            .name("warden-shared-engine".to_string())
            .spawn(move || worker_loop(rx, max_stack_bytes))
            .map_err(|e| SandboxError::internal(format!("failed to start engine worker: {}", e)))?;

        debug!("shared engine worker started");
        Ok(tx)
    }
}

fn worker_loop(jobs: mpsc::Receiver<WorkItem>, max_stack_bytes: usize) {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("shared engine failed to start: {}", e);
            for item in jobs {
                let _ = item.reply.send(RunReport::failed(SandboxError::internal(format!(
                    "shared engine unavailable: {}",
                    e
                ))));
            }
            return;
        }
    };
    runtime.set_max_stack_size(max_stack_bytes);

    for WorkItem { job, reply } in jobs {
        let report = engine::run_job(&runtime, &job, None);
        drop(job);
        runtime.run_gc();
        let _ = reply.send(report);
    }
    debug!("shared engine worker stopped");
}

impl IsolationBackend for SharedContextBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Light
    }

    fn memory_limit_bytes(&self) -> Option<u64> {
        None
    }

    fn start(&self, job: GuestJob) -> Result<oneshot::Receiver<RunReport>, SandboxError> {
        let (reply, rx) = oneshot::channel();
        let mut worker = self.worker.lock();

        let sender = match worker.as_ref() {
            Some(sender) => sender.clone(),
            None => {
                let sender = self.spawn_worker()?;
                *worker = Some(sender.clone());
                sender
            }
        };

        if let Err(mpsc::SendError(item)) = sender.send(WorkItem { job, reply }) {
            // Worker thread is gone; start a new one and retry once
            warn!("shared engine worker exited, restarting");
            let sender = self.spawn_worker()?;
            *worker = Some(sender.clone());
            sender
                .send(item)
                .map_err(|_| SandboxError::internal("shared engine worker unavailable"))?;
        }
        Ok(rx)
    }

    fn shutdown(&self) {
        // Dropping the sender ends the worker loop after the current job
        if self.worker.lock().take().is_some() {
            debug!("shared engine worker shutting down");
        }
    }
}
