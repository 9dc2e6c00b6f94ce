//! Retry policy: attempt budget, backoff curve, classification and observer.

use super::backoff::Backoff;
use crate::errors::ResilienceError;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Observer invoked before each retry with the attempt that just failed.
pub type RetryObserver = Arc<dyn Fn(u32, &ResilienceError) + Send + Sync>;

/// Configuration for one retried call site.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Always >= 1.
    pub max_attempts: u32,
    /// Delay curve between attempts.
    pub backoff: Backoff,
    retry_predicate: RetryPredicate,
    on_retry: Option<RetryObserver>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            retry_predicate: Arc::new(default_retry_predicate),
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.backoff = Backoff::new(
            delay,
            self.backoff.max_delay,
            self.backoff.multiplier,
            self.backoff.jitter,
        );
        self
    }

    /// Sets the maximum delay. Values below the base delay are raised to it.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay.max(self.backoff.base_delay);
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff = Backoff::new(
            self.backoff.base_delay,
            self.backoff.max_delay,
            multiplier,
            self.backoff.jitter,
        );
        self
    }

    /// Sets the jitter bound.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    /// Replaces the whole backoff curve.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Backoff::new(
            backoff.base_delay,
            backoff.max_delay,
            backoff.multiplier,
            backoff.jitter,
        );
        self
    }

    /// Replaces the retry predicate.
    #[must_use]
    pub fn with_retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Arc::new(predicate);
        self
    }

    /// Sets the observer called before each retry.
    #[must_use]
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(u32, &ResilienceError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Returns true if `error` should be retried under this policy.
    #[must_use]
    pub fn should_retry(&self, error: &ResilienceError) -> bool {
        (self.retry_predicate)(error)
    }

    /// Invokes the retry observer. A panicking observer is logged and ignored.
    pub(crate) fn notify_retry(&self, attempt: u32, error: &ResilienceError) {
        if let Some(ref observer) = self.on_retry {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer(attempt, error);
            })) {
                warn!(attempt, "Retry observer panicked: {:?}", e);
            }
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("has_observer", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

/// Retries transient network failures, timeouts, rate limits and
/// service-unavailable responses. Everything else is fatal.
#[must_use]
pub fn default_retry_predicate(error: &ResilienceError) -> bool {
    error.is_retryable()
}
