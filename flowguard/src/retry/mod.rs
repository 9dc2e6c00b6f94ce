//! Retry executor with exponential backoff and jitter.
//!
//! Runs an operation up to `max_attempts` times, one attempt at a time.
//! Failures the policy classifies as fatal are returned immediately without
//! consuming the remaining budget; retryable failures are retried after a
//! backoff delay. When the budget runs out the last error is returned inside
//! [`ResilienceError::RetriesExhausted`], unchanged.

pub mod backoff;
mod policy;

pub use backoff::{compute_delay, Backoff, BackoffSchedule};
pub use policy::{default_retry_predicate, RetryObserver, RetryPolicy, RetryPredicate};

use crate::errors::{ResilienceError, ResilienceResult};
use crate::events::{default_sink, emit_safely, CallContext, EventSink};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Retries an operation with a policy and an explicit event sink.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sink: Arc<dyn EventSink>,
}

impl RetryExecutor {
    /// Creates an executor that logs through the default sink.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sink: default_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails fatally, or the budget is spent.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F, ctx: &CallContext) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ResilienceError>,
    {
        let policy = &self.policy;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            debug!(operation = %ctx.operation, attempt, max_attempts, "Attempting operation");

            let error: ResilienceError = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = %ctx.operation, attempt, "Operation succeeded after retry");
                        emit_safely(
                            self.sink.as_ref(),
                            ctx,
                            "retry.succeeded_after_retry",
                            serde_json::json!({ "attempt": attempt }),
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e.into(),
            };

            let retryable = policy.should_retry(&error);
            emit_safely(
                self.sink.as_ref(),
                ctx,
                "retry.attempt_failed",
                serde_json::json!({
                    "attempt": attempt,
                    "max_attempts": max_attempts,
                    "retryable": retryable,
                    "error": error.to_dict(),
                }),
            );

            if !retryable {
                debug!(operation = %ctx.operation, attempt, error = %error, "Non-retryable error");
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!(
                    operation = %ctx.operation,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                emit_safely(
                    self.sink.as_ref(),
                    ctx,
                    "retry.exhausted",
                    serde_json::json!({ "attempts": attempt, "error": error.to_dict() }),
                );
                return Err(ResilienceError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = policy.backoff.delay(attempt);
            debug!(
                operation = %ctx.operation,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying after error"
            );
            tokio::time::sleep(delay).await;
            policy.notify_retry(attempt, &error);

            attempt += 1;
        }
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Runs `operation` under `policy`, logging through the default sink.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation: F,
    policy: &RetryPolicy,
    ctx: &CallContext,
) -> ResilienceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ResilienceError>,
{
    RetryExecutor::new(policy.clone()).run(operation, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, OperationError};
    use crate::events::CollectingEventSink;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_jitter(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = retry_with_backoff(
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, OperationError>(42)
                }
            },
            &fast_policy(3),
            &CallContext::new("test"),
        )
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let sink = Arc::new(CollectingEventSink::new());

        let executor = RetryExecutor::new(fast_policy(5)).with_sink(sink.clone());
        let result = executor
            .run(
                || {
                    let c = c.clone();
                    async move {
                        let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                        if n < 3 {
                            Err(OperationError::transient(format!("reset {n}")))
                        } else {
                            Ok(n)
                        }
                    }
                },
                &CallContext::new("test"),
            )
            .await;

        assert_eq!(result.ok(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sink.event_types(),
            vec![
                "retry.attempt_failed",
                "retry.attempt_failed",
                "retry.succeeded_after_retry",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_invoked_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: ResilienceResult<()> = retry_with_backoff(
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(OperationError::service_unavailable("503"))
                }
            },
            &fast_policy(4),
            &CallContext::new("test"),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.err().unwrap_or_else(|| ResilienceError::Config("expected error".into()));
        assert!(err.is_exhausted());
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(err.root_cause().to_string(), "503");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: ResilienceResult<()> = retry_with_backoff(
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(OperationError::fatal("validation failed"))
                }
            },
            &fast_policy(10),
            &CallContext::new("test"),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.err().unwrap_or_else(|| ResilienceError::Config("expected error".into()));
        assert!(!err.is_exhausted());
        assert_eq!(err.to_string(), "validation failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_receives_failed_attempt_numbers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let policy = fast_policy(3).on_retry(move |attempt, err| {
            s.lock().push((attempt, err.to_string()));
        });

        let _: ResilienceResult<()> = retry_with_backoff(
            || async { Err(OperationError::transient("reset")) },
            &policy,
            &CallContext::new("test"),
        )
        .await;

        assert_eq!(
            *seen.lock(),
            vec![(1, "reset".to_string()), (2, "reset".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_backoff_between_attempts() {
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
            .with_jitter(Duration::ZERO);

        let _: ResilienceResult<()> = retry_with_backoff(
            || async { Err(OperationError::transient("reset")) },
            &policy,
            &CallContext::new("test"),
        )
        .await;

        // 100ms after attempt 1, 200ms after attempt 2, none after the last.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_emits_event() {
        let sink = Arc::new(CollectingEventSink::new());
        let executor = RetryExecutor::new(fast_policy(2)).with_sink(sink.clone());

        let _: ResilienceResult<()> = executor
            .run(
                || async { Err(OperationError::rate_limited("429")) },
                &CallContext::new("llm.complete"),
            )
            .await;

        let exhausted = sink.events_of_type("retry.exhausted");
        assert_eq!(exhausted.len(), 1);
        let data = exhausted[0].1.clone().unwrap_or_default();
        assert_eq!(data["attempts"], 2);
        assert_eq!(data["operation"], "llm.complete");
    }
}
