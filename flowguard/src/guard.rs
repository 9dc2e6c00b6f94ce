//! Composition of breaker, retry and timeout around one external call.

use crate::breaker::CircuitBreaker;
use crate::config::ResilienceConfig;
use crate::errors::{ResilienceError, ResilienceResult};
use crate::events::{CallContext, EventSink};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::timeout::TimeoutSpec;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Guards calls to one dependency.
///
/// Layering, outermost first:
///
/// 1. the circuit breaker admits or rejects the call;
/// 2. the retry executor runs up to `max_attempts` attempts;
/// 3. each attempt is raced against the timeout.
///
/// The breaker sees the retry sequence as a single call, so one exhausted
/// sequence counts as one breaker failure. With the defaults a dependency
/// must exhaust five full retry sequences in a row before its circuit opens.
#[derive(Clone)]
pub struct CallGuard {
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
    timeout: Option<TimeoutSpec>,
}

impl CallGuard {
    /// Creates a guard with the default retry policy and no timeout.
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            retry: RetryExecutor::new(RetryPolicy::default()),
            timeout: None,
        }
    }

    /// Builds a guard with a fresh breaker named `name`.
    pub fn from_config(config: &ResilienceConfig, name: impl Into<String>) -> ResilienceResult<Self> {
        config.validate()?;
        let breaker = Arc::new(config.breaker.build(name));
        Ok(Self::with_breaker_from_config(config, breaker))
    }

    /// Builds a guard around an existing breaker, e.g. one from a registry.
    #[must_use]
    pub fn with_breaker_from_config(config: &ResilienceConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            retry: RetryExecutor::new(config.retry.to_policy()),
            timeout: config.timeout.to_spec(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    /// Sets the retry executor, including its sink.
    #[must_use]
    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the sink used by the retry layer.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.retry = self.retry.with_sink(sink);
        self
    }

    /// Sets a per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(TimeoutSpec::new(duration));
        self
    }

    /// Sets a per-attempt timeout with a custom message.
    #[must_use]
    pub fn with_timeout_spec(mut self, spec: TimeoutSpec) -> Self {
        self.timeout = Some(spec);
        self
    }

    /// Returns the breaker.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<&TimeoutSpec> {
        self.timeout.as_ref()
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    /// Runs `operation` through all three layers.
    ///
    /// `operation` is called once per attempt.
    pub async fn call<T, E, F, Fut>(&self, operation: F, ctx: &CallContext) -> ResilienceResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ResilienceError>,
    {
        let operation = &operation;
        let timeout = self.timeout.as_ref();
        let retry = &self.retry;

        self.breaker
            .execute(
                move || {
                    retry.run(
                        move || async move {
                            match timeout {
                                Some(spec) => spec.guard(operation()).await,
                                None => operation().await.map_err(Into::into),
                            }
                        },
                        ctx,
                    )
                },
                ctx,
            )
            .await
    }
}

impl std::fmt::Debug for CallGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGuard")
            .field("breaker", &self.breaker.name())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::errors::OperationError;
    use crate::events::CollectingEventSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_base_delay(Duration::from_millis(10))
            .with_jitter(Duration::ZERO)
    }

    fn guard(failure_threshold: u32) -> CallGuard {
        let breaker = CircuitBreaker::new(failure_threshold, Duration::from_millis(100), 1).named("llm");
        CallGuard::new(Arc::new(breaker)).with_retry(fast_policy(3))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_recovered_by_retry() {
        let guard = guard(2);
        let calls = &AtomicU32::new(0);
        let ctx = CallContext::new("llm.complete");

        let result = guard
            .call(
                || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(OperationError::transient("connection reset"))
                    } else {
                        Ok("answer")
                    }
                },
                &ctx,
            )
            .await;

        assert_eq!(result.ok(), Some("answer"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.breaker().state(), CircuitState::Closed);
        assert_eq!(guard.breaker().snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_sequence_counts_once() {
        let guard = guard(2);
        let calls = &AtomicU32::new(0);
        let ctx = CallContext::new("llm.complete");
        let op = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(OperationError::service_unavailable("503"))
        };

        let first = guard.call(op, &ctx).await;
        assert!(first.err().is_some_and(|e| e.is_exhausted()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.breaker().snapshot().failure_count, 1);
        assert_eq!(guard.breaker().state(), CircuitState::Closed);

        let second = guard.call(op, &ctx).await;
        assert!(second.is_err());
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        let third = guard.call(op, &ctx).await;
        assert!(third.err().is_some_and(|e| e.is_circuit_open()));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_gets_its_own_timeout() {
        let sink = Arc::new(CollectingEventSink::new());
        let guard = guard(5)
            .with_timeout(Duration::from_millis(50))
            .with_sink(sink.clone());
        let calls = &AtomicU32::new(0);
        let ctx = CallContext::new("llm.complete");

        let result = guard
            .call(
                || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok::<_, OperationError>(42)
                },
                &ctx,
            )
            .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.events_of_type("retry.attempt_failed").len(), 1);
        assert_eq!(sink.events_of_type("retry.succeeded_after_retry").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_skips_retry() {
        let guard = guard(5);
        let calls = &AtomicU32::new(0);
        let ctx = CallContext::new("llm.complete");

        let result = guard
            .call(
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(OperationError::fatal("invalid api key"))
                },
                &ctx,
            )
            .await;

        assert!(result.err().is_some_and(|e| e.to_string() == "invalid api key"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_config() {
        let config = ResilienceConfig::from_json_str(
            r#"{"retry": {"max_attempts": 2}, "timeout": {"timeout_ms": 500}}"#,
        )
        .unwrap();
        let guard = CallGuard::from_config(&config, "search").unwrap();

        assert_eq!(guard.breaker().name(), "search");
        assert_eq!(guard.policy().max_attempts, 2);
        assert_eq!(guard.timeout().map(|t| t.duration), Some(Duration::from_millis(500)));
    }
}
