//! Configuration for taskforge pools.

use crate::error::{Error, Result};

/// Default bounded queue capacity (slots, power of two).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Configuration for a [`WorkerPool`](crate::pool::WorkerPool).
///
/// There is no file or environment layer: the engine is configured
/// programmatically, and the demo binaries take positional CLI arguments
/// only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads. Must be at least 1.
    pub workers: usize,

    /// Queue capacity in slots. Must be a power of two, at least 2.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity (power of two, at least 2).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Check that the configuration can actually build a pool.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfiguration(
                "worker count must be at least 1".into(),
            ));
        }
        if self.queue_capacity < 2 || !self.queue_capacity.is_power_of_two() {
            return Err(Error::InvalidConfiguration(format!(
                "queue capacity must be a power of two >= 2, got {}",
                self.queue_capacity
            )));
        }
        Ok(())
    }
}
