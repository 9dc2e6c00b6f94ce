//! Promise pool: spawns tasks with a bound on how many run at once.

use super::ConcurrencyLimiter;
use crate::errors::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct PoolState {
    running: AtomicUsize,
    idle: Notify,
}

/// Runs submitted tasks with at most `concurrency` in flight.
///
/// Tasks start in submission order; they may finish in any order.
#[derive(Debug, Clone)]
pub struct PromisePool {
    limiter: ConcurrencyLimiter,
    state: Arc<PoolState>,
}

impl PromisePool {
    /// Creates a pool. A concurrency of 0 is raised to 1.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            limiter: ConcurrencyLimiter::new(concurrency),
            state: Arc::new(PoolState::default()),
        }
    }

    /// Waits for a free slot, then starts the task built by `factory`.
    ///
    /// The returned handle resolves to the task's output.
    pub async fn add<T, F, Fut>(&self, factory: F) -> ResilienceResult<PoolTask<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = self.limiter.acquire().await?;
        let future = factory();

        let state = self.state.clone();
        state.running.fetch_add(1, Ordering::SeqCst);
        debug!(running = state.running.load(Ordering::SeqCst), "Pool task started");

        // Built outside the task so an abort before the first poll still
        // decrements the count.
        let finished = Finished(state);
        let handle = tokio::spawn(async move {
            let _finished = finished;
            let _slot = slot;
            future.await
        });

        Ok(PoolTask { handle })
    }

    /// Waits until no task started by this pool is running.
    pub async fn drain(&self) {
        loop {
            let idle = self.state.idle.notified();
            if self.state.running.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Returns the number of running tasks.
    #[must_use]
    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Returns the configured concurrency.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.limiter.max()
    }
}

/// Decrements the running count when a task ends, even if it panics.
struct Finished(Arc<PoolState>);

impl Drop for Finished {
    fn drop(&mut self) {
        if self.0.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Handle to a task started by a [`PromisePool`].
#[derive(Debug)]
pub struct PoolTask<T> {
    handle: JoinHandle<T>,
}

impl<T> PoolTask<T> {
    /// Aborts the task.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Returns true if the task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for PoolTask<T> {
    type Output = ResilienceResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.map_err(ResilienceError::from))
    }
}
