//! Language-model provider integration.
//!
//! The provider itself is an external collaborator: an async function from
//! prompt to text. [`GuardedProvider`] wraps one in a [`CallGuard`] and an
//! optional [`RatePacer`], and [`run_pipeline`] chains prompt templates
//! through it.

mod pipeline;

pub use pipeline::{run_pipeline, run_pipeline_batch, PipelineStep, StepOutput};

use crate::errors::{OperationError, ResilienceResult};
use crate::events::CallContext;
use crate::guard::CallGuard;
use crate::pacing::RatePacer;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A text completion backend.
///
/// Implementations tag failures with an [`crate::errors::ErrorKind`] so the
/// retry layer can tell transient failures from permanent ones.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Completes `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String, OperationError>;

    /// Returns the provider name used in logs and events.
    fn name(&self) -> &str;
}

#[async_trait]
impl<P: CompletionProvider + ?Sized> CompletionProvider for Arc<P> {
    async fn complete(&self, prompt: &str) -> Result<String, OperationError> {
        (**self).complete(prompt).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A provider whose calls go through a [`CallGuard`].
#[derive(Debug)]
pub struct GuardedProvider<P> {
    inner: P,
    guard: CallGuard,
    pacer: Option<Arc<RatePacer>>,
}

impl<P: CompletionProvider> GuardedProvider<P> {
    /// Wraps `inner`.
    #[must_use]
    pub const fn new(inner: P, guard: CallGuard) -> Self {
        Self {
            inner,
            guard,
            pacer: None,
        }
    }

    /// Spaces outbound calls with `pacer`. The pacer may be shared with
    /// other providers hitting the same API.
    #[must_use]
    pub fn with_pacer(mut self, pacer: Arc<RatePacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    /// Returns the wrapped provider.
    #[must_use]
    pub const fn inner(&self) -> &P {
        &self.inner
    }

    /// Returns the guard.
    #[must_use]
    pub const fn guard(&self) -> &CallGuard {
        &self.guard
    }

    /// Completes `prompt` with a fresh call context.
    pub async fn complete(&self, prompt: &str) -> ResilienceResult<String> {
        let ctx = CallContext::new("llm.complete").with_attribute("provider", self.inner.name());
        self.complete_with(prompt, &ctx).await
    }

    /// Completes `prompt`, reporting events under `ctx`.
    ///
    /// The pacer is awaited once per call; retries are spaced by backoff.
    pub async fn complete_with(&self, prompt: &str, ctx: &CallContext) -> ResilienceResult<String> {
        if let Some(ref pacer) = self.pacer {
            pacer.pace().await;
        }

        debug!(
            operation = %ctx.operation,
            prompt_chars = prompt.chars().count(),
            "Sending completion request"
        );

        let inner = &self.inner;
        self.guard.call(move || inner.complete(prompt), ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreaker, CircuitState};
    use crate::errors::ResilienceError;
    use crate::retry::RetryPolicy;
    use mockall::Sequence;
    use std::time::Duration;

    fn guard() -> CallGuard {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60), 1).named("mock-llm");
        CallGuard::new(Arc::new(breaker)).with_retry(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(10))
                .with_jitter(Duration::ZERO),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_provider_failure_is_retried() {
        let mut mock = MockCompletionProvider::new();
        let mut seq = Sequence::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(OperationError::rate_limited("429 too many requests")));
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|prompt| Ok(prompt.to_uppercase()));

        let provider = GuardedProvider::new(mock, guard());
        let result = provider.complete("hello").await;
        assert_eq!(result.ok().as_deref(), Some("HELLO"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_provider_failure_is_not_retried() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(OperationError::from_status(401, "unauthorized")));

        let provider = GuardedProvider::new(mock, guard());
        let result = provider.complete("hello").await;
        assert!(matches!(result, Err(ResilienceError::Operation(_))));
        assert_eq!(provider.guard().breaker().snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_provider() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete()
            .times(2)
            .returning(|_| Err(OperationError::fatal("model not found")));

        let provider = GuardedProvider::new(mock, guard());
        let _ = provider.complete("a").await;
        let _ = provider.complete("b").await;
        assert_eq!(provider.guard().breaker().state(), CircuitState::Open);

        let third = provider.complete("c").await;
        assert!(third.err().is_some_and(|e| e.is_circuit_open()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_calls() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete().returning(|p| Ok(p.to_string()));

        let provider = GuardedProvider::new(mock, guard())
            .with_pacer(Arc::new(RatePacer::new(Duration::from_millis(100))));

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            let _ = provider.complete("x").await;
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
