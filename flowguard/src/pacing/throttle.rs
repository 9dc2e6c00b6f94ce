//! Leading-edge throttle.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Wraps `f` so it runs at most once per `limit`.
///
/// The first call runs immediately; calls inside the following `limit`
/// window are dropped.
pub fn throttle<A, F>(f: F, limit: Duration) -> Throttled<A>
where
    F: Fn(A) + Send + Sync + 'static,
{
    Throttled {
        f: Arc::new(f),
        limit,
        last_run: Arc::new(Mutex::new(None)),
    }
}

/// A throttled callback. Clones share the cooldown window.
pub struct Throttled<A> {
    f: Arc<dyn Fn(A) + Send + Sync>,
    limit: Duration,
    last_run: Arc<Mutex<Option<Instant>>>,
}

impl<A> Clone for Throttled<A> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            limit: self.limit,
            last_run: self.last_run.clone(),
        }
    }
}

impl<A> Throttled<A> {
    /// Runs `f(args)` unless inside the cooldown window.
    ///
    /// Returns true if `f` ran.
    pub fn call(&self, args: A) -> bool {
        let now = Instant::now();
        {
            let mut last_run = self.last_run.lock();
            if last_run.is_some_and(|at| now.duration_since(at) < self.limit) {
                return false;
            }
            *last_run = Some(now);
        }
        (self.f)(args);
        true
    }

    /// Returns the cooldown window.
    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.limit
    }
}

impl<A> std::fmt::Debug for Throttled<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttled")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
