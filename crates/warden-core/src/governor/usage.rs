//! Resource usage snapshots

use serde::{Deserialize, Serialize};

/// Point-in-time view of a governor's counters
///
/// Percentages are relative to the configured limit and are used upstream for
/// diagnostics and backpressure signalling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub dom_nodes: u64,
    pub dom_nodes_percent: f64,
    pub event_listeners: u64,
    pub event_listeners_percent: f64,
    /// Elapsed time of the running execution, or of the last stopped one
    pub execution_time_ms: u64,
    pub execution_time_percent: f64,
    /// Most recent heap sample in MB, if any was recorded
    pub memory_mb: Option<f64>,
    pub memory_percent: Option<f64>,
}

impl ResourceUsage {
    /// Highest percentage across all tracked budgets
    pub fn peak_percent(&self) -> f64 {
        [
            self.dom_nodes_percent,
            self.event_listeners_percent,
            self.execution_time_percent,
            self.memory_percent.unwrap_or(0.0),
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }

    /// Whether any budget is at or above the given percentage
    pub fn is_under_pressure(&self, threshold_percent: f64) -> bool {
        self.peak_percent() >= threshold_percent
    }
}

pub(super) fn percent_of(current: u64, max: u64) -> f64 {
    if max == 0 {
        return 0.0;
    }
    current as f64 / max as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(5, 10), 50.0);
        assert_eq!(percent_of(0, 0), 0.0);
    }

    #[test]
    fn test_peak_percent() {
        let usage = ResourceUsage {
            dom_nodes: 80,
            dom_nodes_percent: 80.0,
            event_listeners: 1,
            event_listeners_percent: 10.0,
            execution_time_ms: 0,
            execution_time_percent: 0.0,
            memory_mb: None,
            memory_percent: None,
        };
        assert_eq!(usage.peak_percent(), 80.0);
        assert!(usage.is_under_pressure(75.0));
        assert!(!usage.is_under_pressure(90.0));
    }
}
