//! Batcher configuration

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the operation batcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Time window after the first queued operation before the queue is flushed
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Queue length that forces a flush without waiting for the window
    pub max_batch_size: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            // One frame at 60Hz
            window: Duration::from_millis(16),
            max_batch_size: 100,
        }
    }
}

impl BatcherConfig {
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.max_batch_size == 0 {
            return Err(SandboxError::invalid_config(
                "batcher max_batch_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatcherConfig::default();
        assert_eq!(config.window, Duration::from_millis(16));
        assert_eq!(config.max_batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config: BatcherConfig = serde_yaml::from_str("window: 5ms\nmax_batch_size: 0").unwrap();
        assert_eq!(config.window, Duration::from_millis(5));
        assert!(config.validate().is_err());
    }
}
