//! Scheduler configuration.
//!
//! All tunables of the scheduler live in [`SchedulerConfig`]: worker count,
//! per-worker queue capacity and the stall threshold of the work loop. The
//! struct is serde-enabled so deployments can load it from TOML alongside the
//! rest of their configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default per-worker task queue capacity (8192 slots * 8B = 64KiB)
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// Default number of failed steal passes a worker yields through before
/// parking on the stall latch
pub const DEFAULT_STALL_YIELD_LIMIT: u32 = 16;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; `None` uses the hardware thread count
    pub worker_threads: Option<usize>,

    /// Per-worker task queue capacity; must be a power of two >= 2.
    /// A full queue never blocks a submitter: overflowing tasks are
    /// executed inline on the submitting worker's stack.
    pub queue_capacity: usize,

    /// How many times a worker yields after finding no work anywhere
    /// before it parks on the stall latch
    pub stall_yield_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stall_yield_limit: DEFAULT_STALL_YIELD_LIMIT,
        }
    }
}

impl SchedulerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == Some(0) {
            return Err(Error::config("worker_threads must be non-zero"));
        }
        if self.queue_capacity < 2 || !self.queue_capacity.is_power_of_two() {
            return Err(Error::config(format!(
                "queue_capacity must be a power of two >= 2, got {}",
                self.queue_capacity
            )));
        }
        // Queue indices are 32-bit and compared by wrap-safe differences,
        // which limits the capacity to half the index space.
        if self.queue_capacity > (1 << 31) {
            return Err(Error::config(format!(
                "queue_capacity must not exceed 2^31, got {}",
                self.queue_capacity
            )));
        }
        Ok(())
    }

    /// Parse a configuration from a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| Error::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 8192);
        assert_eq!(config.stall_yield_limit, 16);
        assert!(config.worker_threads.is_none());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = SchedulerConfig {
            worker_threads: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_power_of_two_capacity() {
        for capacity in [0, 1, 3, 100, 8191] {
            let config = SchedulerConfig {
                queue_capacity: capacity,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "capacity {capacity} accepted");
        }
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SchedulerConfig {
            worker_threads: Some(4),
            queue_capacity: 256,
            stall_yield_limit: 8,
        };
        let raw = toml::to_string(&config).unwrap();
        let parsed = SchedulerConfig::from_toml_str(&raw).unwrap();
        assert_eq!(parsed.worker_threads, Some(4));
        assert_eq!(parsed.queue_capacity, 256);
        assert_eq!(parsed.stall_yield_limit, 8);
    }

    #[test]
    fn test_toml_defaults_for_missing_fields() {
        let parsed = SchedulerConfig::from_toml_str("queue_capacity = 1024\n").unwrap();
        assert_eq!(parsed.queue_capacity, 1024);
        assert_eq!(parsed.stall_yield_limit, DEFAULT_STALL_YIELD_LIMIT);
    }

    #[test]
    fn test_toml_rejects_invalid_capacity() {
        assert!(SchedulerConfig::from_toml_str("queue_capacity = 1000\n").is_err());
    }
}
