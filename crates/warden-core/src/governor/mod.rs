//! Resource governor for guest sessions
//!
//! Mechanical enforcement of the budgets in [`ResourceLimitsConfig`]: script size,
//! execution time, live tree nodes, live event listeners and a memory warning level.
//! One governor belongs to one session; its counters are never shared.

mod deadline;
mod limits;
mod usage;

pub use deadline::Deadline;
pub use limits::{LimitType, ResourceLimitsConfig};
pub use usage::ResourceUsage;

use crate::error::{ResourceLimitError, SandboxError};
use std::time::{Duration, Instant};
use usage::percent_of;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Per-session resource counters and deadline
#[derive(Debug)]
pub struct ResourceGovernor {
    limits: ResourceLimitsConfig,
    dom_node_count: u64,
    event_listener_count: u64,
    execution_start_time: Option<Instant>,
    deadline: Option<Deadline>,
    last_execution: Duration,
    heap_bytes: Option<u64>,
}

impl ResourceGovernor {
    /// Create a governor, rejecting limits that cannot be enforced
    pub fn new(limits: ResourceLimitsConfig) -> Result<Self, SandboxError> {
        limits.validate()?;
        Ok(Self {
            limits,
            dom_node_count: 0,
            event_listener_count: 0,
            execution_start_time: None,
            deadline: None,
            last_execution: Duration::ZERO,
            heap_bytes: None,
        })
    }

    /// Configured limits
    pub fn limits(&self) -> &ResourceLimitsConfig {
        &self.limits
    }

    /// Hard gate on script byte length, evaluated once before execution
    pub fn validate_script_size(&self, script: &str) -> Result<(), ResourceLimitError> {
        let size = script.len() as u64;
        if size > self.limits.max_script_size {
            tracing::warn!(
                size,
                max = self.limits.max_script_size,
                "script rejected: size limit exceeded"
            );
            return Err(ResourceLimitError::new(
                LimitType::ScriptSize,
                size,
                self.limits.max_script_size,
            ));
        }
        Ok(())
    }

    /// Arm the execution deadline using the configured maximum execution time
    pub fn start_execution_timer<F>(&mut self, on_timeout: F) -> Result<(), SandboxError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.start_execution_timer_with(self.limits.max_execution_time, on_timeout)
    }

    /// Arm the execution deadline with an explicit duration
    ///
    /// Any previously armed deadline is cancelled first, so only the most recent
    /// one can fire.
    pub fn start_execution_timer_with<F>(
        &mut self,
        duration: Duration,
        on_timeout: F,
    ) -> Result<(), SandboxError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.deadline = None;
        let deadline = Deadline::arm(duration, move || {
            tracing::warn!(limit_ms = duration.as_millis() as u64, "execution deadline reached");
            on_timeout();
        })?;
        self.deadline = Some(deadline);
        self.execution_start_time = Some(Instant::now());
        Ok(())
    }

    /// Cancel the pending deadline and record elapsed time. Idempotent.
    pub fn stop_execution_timer(&mut self) {
        self.deadline = None;
        if let Some(started) = self.execution_start_time.take() {
            self.last_execution = started.elapsed();
            tracing::debug!(
                elapsed_ms = self.last_execution.as_millis() as u64,
                "execution timer stopped"
            );
        }
    }

    /// Whether a deadline is currently armed
    pub fn is_timer_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Duration of the last completed execution
    pub fn last_execution_time(&self) -> Duration {
        self.last_execution
    }

    /// Count a new tree node, rejecting the one that overflows the budget
    pub fn register_dom_node(&mut self) -> Result<(), ResourceLimitError> {
        let next = self.dom_node_count + 1;
        if next > self.limits.max_dom_nodes {
            tracing::warn!(current = next, max = self.limits.max_dom_nodes, "dom node limit exceeded");
            return Err(ResourceLimitError::new(
                LimitType::DomNodes,
                next,
                self.limits.max_dom_nodes,
            ));
        }
        self.dom_node_count = next;
        Ok(())
    }

    /// Release a tree node; floors at zero
    pub fn unregister_dom_node(&mut self) {
        self.dom_node_count = self.dom_node_count.saturating_sub(1);
    }

    /// Count a new event listener, rejecting the one that overflows the budget
    pub fn register_event_listener(&mut self) -> Result<(), ResourceLimitError> {
        let next = self.event_listener_count + 1;
        if next > self.limits.max_event_listeners {
            tracing::warn!(
                current = next,
                max = self.limits.max_event_listeners,
                "event listener limit exceeded"
            );
            return Err(ResourceLimitError::new(
                LimitType::EventListeners,
                next,
                self.limits.max_event_listeners,
            ));
        }
        self.event_listener_count = next;
        Ok(())
    }

    /// Release an event listener; floors at zero
    pub fn unregister_event_listener(&mut self) {
        self.event_listener_count = self.event_listener_count.saturating_sub(1);
    }

    /// Current live node count
    pub fn dom_node_count(&self) -> u64 {
        self.dom_node_count
    }

    /// Current live listener count
    pub fn event_listener_count(&self) -> u64 {
        self.event_listener_count
    }

    /// Record a heap sample reported by the guest engine
    pub fn record_heap_usage(&mut self, bytes: u64) {
        self.heap_bytes = Some(bytes);
    }

    /// Best-effort memory check.
    ///
    /// Returns `None` when no heap telemetry is available. Crossing the warning
    /// threshold is logged, never fatal.
    pub fn check_memory_usage(&self) -> Option<f64> {
        let used_mb = self.heap_bytes? as f64 / BYTES_PER_MB;
        if used_mb > self.limits.memory_warning_threshold as f64 {
            tracing::warn!(
                used_mb,
                threshold_mb = self.limits.memory_warning_threshold,
                "guest heap usage above warning threshold"
            );
        }
        Some(used_mb)
    }

    /// Snapshot of all counters with percentage-of-limit
    pub fn usage(&self) -> ResourceUsage {
        let execution = self
            .execution_start_time
            .map(|started| started.elapsed())
            .unwrap_or(self.last_execution);
        let execution_ms = execution.as_millis() as u64;
        let memory_mb = self.heap_bytes.map(|bytes| bytes as f64 / BYTES_PER_MB);

        ResourceUsage {
            dom_nodes: self.dom_node_count,
            dom_nodes_percent: percent_of(self.dom_node_count, self.limits.max_dom_nodes),
            event_listeners: self.event_listener_count,
            event_listeners_percent: percent_of(
                self.event_listener_count,
                self.limits.max_event_listeners,
            ),
            execution_time_ms: execution_ms,
            execution_time_percent: percent_of(execution_ms, self.limits.max_execution_ms()),
            memory_mb,
            memory_percent: memory_mb
                .map(|mb| mb / self.limits.memory_warning_threshold as f64 * 100.0),
        }
    }

    /// Stop the timer and zero every counter
    pub fn reset(&mut self) {
        self.stop_execution_timer();
        self.dom_node_count = 0;
        self.event_listener_count = 0;
        self.heap_bytes = None;
        self.last_execution = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn governor_with_nodes(max_dom_nodes: u64) -> ResourceGovernor {
        ResourceGovernor::new(ResourceLimitsConfig {
            max_dom_nodes,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_script_size_boundary() {
        let governor = ResourceGovernor::new(ResourceLimitsConfig {
            max_script_size: 16,
            ..Default::default()
        })
        .unwrap();

        assert!(governor.validate_script_size(&"a".repeat(16)).is_ok());
        let err = governor.validate_script_size(&"a".repeat(17)).unwrap_err();
        assert_eq!(err.limit_type, LimitType::ScriptSize);
        assert_eq!(err.current, 17);
        assert_eq!(err.max, 16);
    }

    #[test]
    fn test_script_size_counts_bytes_not_chars() {
        let governor = ResourceGovernor::new(ResourceLimitsConfig {
            max_script_size: 4,
            ..Default::default()
        })
        .unwrap();
        // three chars, six bytes
        assert!(governor.validate_script_size("ééé").is_err());
    }

    #[test]
    fn test_dom_node_scenario() {
        let mut governor = governor_with_nodes(5);
        for _ in 0..5 {
            governor.register_dom_node().unwrap();
        }

        let err = governor.register_dom_node().unwrap_err();
        assert_eq!(err, ResourceLimitError::new(LimitType::DomNodes, 6, 5));
        // the overflowing node was not admitted
        assert_eq!(governor.dom_node_count(), 5);
    }

    #[test]
    fn test_unregister_floors_at_zero() {
        let mut governor = governor_with_nodes(5);
        governor.unregister_dom_node();
        governor.unregister_dom_node();
        assert_eq!(governor.dom_node_count(), 0);

        governor.register_dom_node().unwrap();
        governor.unregister_dom_node();
        governor.unregister_dom_node();
        assert_eq!(governor.dom_node_count(), 0);

        governor.unregister_event_listener();
        assert_eq!(governor.event_listener_count(), 0);
    }

    #[test]
    fn test_listener_budget_is_independent() {
        let mut governor = ResourceGovernor::new(ResourceLimitsConfig {
            max_dom_nodes: 1,
            max_event_listeners: 2,
            ..Default::default()
        })
        .unwrap();

        governor.register_dom_node().unwrap();
        governor.register_event_listener().unwrap();
        governor.register_event_listener().unwrap();
        let err = governor.register_event_listener().unwrap_err();
        assert_eq!(err.limit_type, LimitType::EventListeners);
        assert_eq!(err.current, 3);
        assert_eq!(governor.dom_node_count(), 1);
    }

    #[test]
    fn test_invalid_limits_fail_fast() {
        let result = ResourceGovernor::new(ResourceLimitsConfig {
            max_script_size: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(SandboxError::InvalidConfig(_))));
    }

    #[test]
    fn test_memory_check_without_telemetry() {
        let mut governor = governor_with_nodes(5);
        assert!(governor.check_memory_usage().is_none());

        governor.record_heap_usage(2 * 1024 * 1024);
        let used = governor.check_memory_usage().unwrap();
        assert!((used - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_usage_percentages() {
        let mut governor = ResourceGovernor::new(ResourceLimitsConfig {
            max_dom_nodes: 4,
            max_event_listeners: 10,
            ..Default::default()
        })
        .unwrap();
        governor.register_dom_node().unwrap();
        governor.register_dom_node().unwrap();
        governor.register_event_listener().unwrap();

        let usage = governor.usage();
        assert_eq!(usage.dom_nodes, 2);
        assert_eq!(usage.dom_nodes_percent, 50.0);
        assert_eq!(usage.event_listeners_percent, 10.0);
        assert!(usage.memory_mb.is_none());
    }

    #[tokio::test]
    async fn test_rearm_cancels_previous_deadline() {
        let mut governor = governor_with_nodes(5);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        governor
            .start_execution_timer_with(Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let counter = Arc::clone(&second);
        governor
            .start_execution_timer_with(Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_timer_is_idempotent() {
        let mut governor = governor_with_nodes(5);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        governor
            .start_execution_timer_with(Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(governor.is_timer_running());

        governor.stop_execution_timer();
        governor.stop_execution_timer();
        assert!(!governor.is_timer_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_zeroes_counters_and_timer() {
        let mut governor = governor_with_nodes(5);
        governor.register_dom_node().unwrap();
        governor.register_event_listener().unwrap();
        governor.start_execution_timer(|| {}).unwrap();

        governor.reset();
        assert_eq!(governor.dom_node_count(), 0);
        assert_eq!(governor.event_listener_count(), 0);
        assert!(!governor.is_timer_running());
    }
}
