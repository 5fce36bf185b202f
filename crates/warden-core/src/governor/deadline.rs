//! Single-shot execution deadline

use crate::error::SandboxError;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// An armed single-shot deadline.
///
/// The timeout callback runs at most once. Dropping the deadline cancels it, so
/// replacing the governor's owned `Deadline` is how re-arming works.
#[derive(Debug)]
pub struct Deadline {
    timer: JoinHandle<()>,
}

impl Deadline {
    /// Arm a deadline on the current Tokio runtime
    pub fn arm<F>(duration: Duration, on_timeout: F) -> Result<Self, SandboxError>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|_| SandboxError::internal("execution timer requires a Tokio runtime"))?;

        let timer = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            on_timeout();
        });

        Ok(Self { timer })
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_deadline_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let _deadline = Deadline::arm(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_deadline_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let deadline = Deadline::arm(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(deadline);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_arm_outside_runtime_is_an_error() {
        let result = Deadline::arm(Duration::from_millis(10), || {});
        assert!(matches!(result, Err(SandboxError::Internal(_))));
    }
}
