//! Counting semaphore with RAII slots.

use crate::errors::{ResilienceError, ResilienceResult};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many operations hold a slot at once.
///
/// Waiters are admitted in FIFO order. Cloning a limiter shares its slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with `max` slots. A limit of 0 is raised to 1.
    #[must_use]
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits for a free slot.
    ///
    /// Resolves immediately if fewer than `max` slots are held.
    pub async fn acquire(&self) -> ResilienceResult<ConcurrencySlot> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map(|permit| ConcurrencySlot { _permit: permit })
            .map_err(|_| ResilienceError::Cancelled("concurrency limiter closed".to_string()))
    }

    /// Takes a slot if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ConcurrencySlot> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ConcurrencySlot { _permit: permit })
    }

    /// Runs `future` while holding a slot.
    pub async fn run<T, Fut>(&self, future: Fut) -> ResilienceResult<T>
    where
        Fut: std::future::Future<Output = T>,
    {
        let _slot = self.acquire().await?;
        Ok(future.await)
    }

    /// Returns the configured maximum.
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Returns the number of free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Returns the number of held slots.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.max - self.available()
    }

    /// Wakes every waiter with an error and refuses new acquisitions.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// A held slot. Dropping it releases the slot to the next waiter.
#[derive(Debug)]
pub struct ConcurrencySlot {
    _permit: OwnedSemaphorePermit,
}
