//! Timeout guard.
//!
//! Races an operation against a deadline. Two flavours exist:
//!
//! - [`with_timeout`] drops the operation when the deadline passes, which
//!   cancels it at its next suspension point. A request already written to
//!   the network may still be processed (and billed) by the provider.
//! - [`with_timeout_detached`] spawns the operation and only stops waiting for
//!   it; the operation runs to completion in the background and its result is
//!   discarded.
//!
//! [`with_timeout_token`] additionally fires a [`CancellationToken`] on expiry
//! so collaborators that can abort in-flight work are told to do so.

use crate::cancellation::CancellationToken;
use crate::errors::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Deadline and message for one guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutSpec {
    /// How long to wait.
    pub duration: Duration,
    /// Message of the timeout error. Defaults to "operation timed out after {ms}ms".
    pub message: Option<String>,
}

impl TimeoutSpec {
    /// Creates a timeout with the default message.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self {
            duration,
            message: None,
        }
    }

    /// Sets the timeout message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Runs `future` under this deadline.
    pub async fn guard<T, E, Fut>(&self, future: Fut) -> ResilienceResult<T>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<ResilienceError>,
    {
        with_timeout(future, self.duration, self.message.as_deref()).await
    }
}

/// Waits for `future` for at most `duration`.
///
/// Returns [`ResilienceError::Timeout`] if the deadline passes first; the
/// future is dropped.
pub async fn with_timeout<T, E, Fut>(
    future: Fut,
    duration: Duration,
    message: Option<&str>,
) -> ResilienceResult<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<ResilienceError>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            let err = ResilienceError::timeout(duration, message);
            warn!(timeout_ms = duration_ms(duration), error = %err, "Operation timed out");
            Err(err)
        }
    }
}

/// Like [`with_timeout`], and cancels `token` when the deadline passes.
pub async fn with_timeout_token<T, E, Fut>(
    future: Fut,
    duration: Duration,
    message: Option<&str>,
    token: &CancellationToken,
) -> ResilienceResult<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<ResilienceError>,
{
    let result = with_timeout(future, duration, message).await;
    if let Err(ResilienceError::Timeout { ref message, .. }) = result {
        token.cancel(message.clone());
    }
    result
}

/// Spawns `future` and waits for it for at most `duration`.
///
/// On timeout the task keeps running detached; its eventual result is
/// discarded.
pub async fn with_timeout_detached<T, E, Fut>(
    future: Fut,
    duration: Duration,
    message: Option<&str>,
) -> ResilienceResult<T>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<ResilienceError> + Send + 'static,
{
    let handle = tokio::spawn(future);
    match tokio::time::timeout(duration, handle).await {
        Ok(Ok(result)) => result.map_err(Into::into),
        Ok(Err(join_error)) => Err(join_error.into()),
        Err(_) => {
            let err = ResilienceError::timeout(duration, message);
            warn!(
                timeout_ms = duration_ms(duration),
                error = %err,
                "Operation timed out, left running in background"
            );
            Err(err)
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OperationError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_before_slow_operation() {
        let start = tokio::time::Instant::now();
        let result: ResilienceResult<()> = with_timeout(
            std::future::pending::<Result<(), OperationError>>(),
            Duration::from_millis(50),
            None,
        )
        .await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(60));

        let err = result.err().unwrap_or_else(|| ResilienceError::Config("expected error".into()));
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "operation timed out after 50ms");
    }

    #[tokio::test]
    async fn test_fast_operation_passes_through() {
        let ok = with_timeout(
            async { Ok::<_, OperationError>("done") },
            Duration::from_secs(1),
            None,
        )
        .await;
        assert_eq!(ok.ok(), Some("done"));

        let err = with_timeout(
            async { Err::<(), _>(OperationError::fatal("bad")) },
            Duration::from_secs(1),
            None,
        )
        .await;
        assert!(err.err().is_some_and(|e| !e.is_timeout()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_message() {
        let spec = TimeoutSpec::new(Duration::from_millis(10)).with_message("llm call took too long");
        let result: ResilienceResult<()> = spec
            .guard(std::future::pending::<Result<(), OperationError>>())
            .await;
        assert!(result.err().is_some_and(|e| e.to_string() == "llm call took too long"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_cancelled_on_timeout() {
        let token = CancellationToken::new();
        let result: ResilienceResult<()> = with_timeout_token(
            std::future::pending::<Result<(), OperationError>>(),
            Duration::from_millis(10),
            Some("too slow"),
            &token,
        )
        .await;

        assert!(result.is_err());
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("too slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_untouched_on_success() {
        let token = CancellationToken::new();
        let result = with_timeout_token(
            async { Ok::<_, OperationError>(1) },
            Duration::from_millis(10),
            None,
            &token,
        )
        .await;

        assert_eq!(result.ok(), Some(1));
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_operation_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let f = finished.clone();

        let result = with_timeout_detached(
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                f.store(true, Ordering::SeqCst);
                Ok::<_, OperationError>(())
            },
            Duration::from_millis(10),
            None,
        )
        .await;
        assert!(result.err().is_some_and(|e| e.is_timeout()));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
