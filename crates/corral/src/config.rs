use crate::{Error, Result};
use tokio::sync::Semaphore;

/// Largest worker count or queue capacity a pool accepts. Both size tokio
/// channels, which cannot hold more permits than a semaphore.
pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// Sizing for a [`Pool`](crate::Pool).
///
/// `worker_count` bounds how many jobs run at once. `queue_capacity` bounds
/// how many submitted jobs may wait for a free worker before `submit` starts
/// to block; zero makes every submission a rendezvous with the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// Validates the given sizes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `worker_count` is zero, or if
    /// either size exceeds [`MAX_CAPACITY`].
    pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self> {
        PoolConfigBuilder::default()
            .worker_count(worker_count)
            .queue_capacity(queue_capacity)
            .build()
    }

    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    worker_count: Option<usize>,
    queue_capacity: usize,
}

impl PoolConfigBuilder {
    /// Number of workers. Required, must be non-zero.
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = Some(worker_count);
        self
    }

    /// Job queue capacity. Defaults to zero (rendezvous).
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the worker count is missing or
    /// zero, or if either size exceeds [`MAX_CAPACITY`].
    pub fn build(self) -> Result<PoolConfig> {
        let worker_count = self.worker_count.ok_or_else(|| Error::InvalidConfig {
            reason: "worker_count must be set".to_string(),
        })?;

        if worker_count == 0 {
            return Err(Error::InvalidConfig {
                reason: "worker_count must be greater than 0".to_string(),
            });
        }

        if worker_count > MAX_CAPACITY {
            return Err(Error::InvalidConfig {
                reason: format!("worker_count must be at most {MAX_CAPACITY}"),
            });
        }

        if self.queue_capacity > MAX_CAPACITY {
            return Err(Error::InvalidConfig {
                reason: format!("queue_capacity must be at most {MAX_CAPACITY}"),
            });
        }

        Ok(PoolConfig {
            worker_count,
            queue_capacity: self.queue_capacity,
        })
    }
}
