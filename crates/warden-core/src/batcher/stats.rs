//! Batch delivery statistics

use serde::{Deserialize, Serialize};

/// Counters over every batch delivered to the sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Operations delivered
    pub total_operations: u64,
    /// Sink deliveries
    pub total_batches: u64,
    /// Size of the largest delivered batch
    pub largest_batch: usize,
    /// Mean operations per batch
    pub average_batch_size: f64,
    /// Percentage of deliveries saved compared to one delivery per operation
    pub reduction_percent: f64,
}

impl BatchStats {
    pub(super) fn record(&mut self, batch_len: usize) {
        self.total_operations += batch_len as u64;
        self.total_batches += 1;
        self.largest_batch = self.largest_batch.max(batch_len);
        self.average_batch_size = self.total_operations as f64 / self.total_batches as f64;
        self.reduction_percent =
            (1.0 - self.total_batches as f64 / self.total_operations as f64) * 100.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let mut stats = BatchStats::default();
        stats.record(3);
        stats.record(1);
        assert_eq!(stats.total_operations, 4);
        assert_eq!(stats.total_batches, 2);
        assert_eq!(stats.largest_batch, 3);
        assert!((stats.average_batch_size - 2.0).abs() < f64::EPSILON);
        assert!((stats.reduction_percent - 50.0).abs() < 1e-9);
    }
}
