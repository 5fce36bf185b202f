//! Operation batcher
//!
//! Coalesces accepted render operations into batches so the host renderer sees one
//! delivery per frame instead of one per mutation. The queue is owned by a single
//! Tokio task; [`OperationBatcher`] is a handle that talks to it over a command
//! channel, which keeps enqueue order intact without any locking.
//!
//! ```text
//! Idle --add--> Accumulating --window elapsed / size threshold / flush--> Idle
//! ```

mod config;
mod stats;

pub use config::BatcherConfig;
pub use stats::BatchStats;

use crate::error::SandboxError;
use crate::protocol::DomOperation;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Receives batches in enqueue order
pub trait BatchSink: Send + 'static {
    fn deliver(&mut self, batch: Vec<DomOperation>);
}

impl<F> BatchSink for F
where
    F: FnMut(Vec<DomOperation>) + Send + 'static,
{
    fn deliver(&mut self, batch: Vec<DomOperation>) {
        self(batch)
    }
}

enum Command {
    Add(DomOperation),
    Flush(oneshot::Sender<()>),
    FlushImmediate(DomOperation, oneshot::Sender<()>),
    Clear(oneshot::Sender<()>),
    QueueSize(oneshot::Sender<usize>),
    Stats(oneshot::Sender<BatchStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running batch queue
///
/// Dropping the handle closes the command channel; the queue task flushes whatever
/// is still pending before it exits.
pub struct OperationBatcher {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
    config: BatcherConfig,
}

impl std::fmt::Debug for OperationBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationBatcher")
            .field("config", &self.config)
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl OperationBatcher {
    /// Start a batch queue on the current Tokio runtime
    pub fn new<S: BatchSink>(config: BatcherConfig, sink: S) -> Result<Self, SandboxError> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|_| SandboxError::internal("operation batcher requires a Tokio runtime"))?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let queue = BatchQueue::new(config.clone(), sink);
        let task = runtime.spawn(queue.run(receiver));

        Ok(Self {
            commands,
            task: Some(task),
            config,
        })
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Queue an operation; the first one in an idle queue arms the window timer
    pub fn add(&self, op: DomOperation) -> Result<(), SandboxError> {
        self.send(Command::Add(op))
    }

    /// Deliver everything queued now
    pub async fn flush(&self) -> Result<(), SandboxError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx))?;
        Self::wait(rx).await
    }

    /// Append an operation and deliver the queue including it right away
    pub async fn flush_immediate(&self, op: DomOperation) -> Result<(), SandboxError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::FlushImmediate(op, tx))?;
        Self::wait(rx).await
    }

    /// Drop queued operations without delivering them
    pub async fn clear(&self) -> Result<(), SandboxError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Clear(tx))?;
        Self::wait(rx).await
    }

    /// Number of operations waiting for delivery
    pub async fn queue_size(&self) -> Result<usize, SandboxError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::QueueSize(tx))?;
        Self::wait(rx).await
    }

    pub async fn stats(&self) -> Result<BatchStats, SandboxError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx))?;
        Self::wait(rx).await
    }

    /// Flush the remainder and stop the queue task
    pub async fn destroy(mut self) -> Result<(), SandboxError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        Self::wait(rx).await?;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SandboxError::internal(format!("batch queue task failed: {}", e)))?;
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<(), SandboxError> {
        self.commands
            .send(command)
            .map_err(|_| SandboxError::internal("operation batcher has stopped"))
    }

    async fn wait<T>(rx: oneshot::Receiver<T>) -> Result<T, SandboxError> {
        rx.await
            .map_err(|_| SandboxError::internal("operation batcher has stopped"))
    }
}

/// Queue state owned by the batch task
struct BatchQueue<S> {
    config: BatcherConfig,
    sink: S,
    queue: Vec<DomOperation>,
    deadline: Option<Instant>,
    stats: BatchStats,
}

impl<S: BatchSink> BatchQueue<S> {
    fn new(config: BatcherConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            queue: Vec::new(),
            deadline: None,
            stats: BatchStats::default(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            // The sleep future is built on every pass, armed or not
            let window_end = self.deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.flush();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.flush();
                        break;
                    }
                },
                _ = sleep_until(window_end), if self.deadline.is_some() => {
                    self.flush();
                }
            }
        }
        debug!(stats = ?self.stats, "operation batcher stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Add(op) => self.push(op),
            Command::Flush(done) => {
                self.flush();
                let _ = done.send(());
            }
            Command::FlushImmediate(op, done) => {
                self.queue.push(op);
                self.flush();
                let _ = done.send(());
            }
            Command::Clear(done) => {
                self.queue.clear();
                self.deadline = None;
                let _ = done.send(());
            }
            Command::QueueSize(reply) => {
                let _ = reply.send(self.queue.len());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats.clone());
            }
            Command::Shutdown(done) => {
                self.flush();
                let _ = done.send(());
            }
        }
    }

    fn push(&mut self, op: DomOperation) {
        self.queue.push(op);
        if self.queue.len() >= self.config.max_batch_size {
            self.flush();
        } else if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.config.window);
        }
    }

    fn flush(&mut self) {
        self.deadline = None;
        if self.queue.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.queue);
        self.stats.record(batch.len());
        debug!(size = batch.len(), "delivering operation batch");
        self.sink.deliver(batch);
    }
}
