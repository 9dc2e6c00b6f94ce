//! Mock providers and operations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::errors::{ErrorKind, OperationError};
use crate::provider::CompletionProvider;

/// A provider that replays scripted responses and records prompts.
///
/// Once the script is used up every call returns the fallback response,
/// which defaults to echoing the prompt.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, OperationError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    /// Creates an echoing provider.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Returns `response` once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// Queues a successful response.
    #[must_use]
    pub fn then_ok(self, response: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(response.into()));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn then_err(self, error: OperationError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Returns every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.prompts.lock().clear();
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, prompt: &str) -> Result<String, OperationError> {
        self.prompts.lock().push(prompt.to_string());
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(self.fallback.clone().unwrap_or_else(|| prompt.to_string())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A provider that answers after a fixed delay.
#[derive(Debug)]
pub struct SlowProvider {
    name: String,
    delay: Duration,
}

impl SlowProvider {
    /// Creates a slow provider.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }

    /// Creates a slow provider with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }
}

#[async_trait]
impl CompletionProvider for SlowProvider {
    async fn complete(&self, prompt: &str) -> Result<String, OperationError> {
        tokio::time::sleep(self.delay).await;
        Ok(prompt.to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An operation that fails `failures` times with `kind`, then succeeds.
#[derive(Debug)]
pub struct FlakyOperation {
    failures: u32,
    kind: ErrorKind,
    calls: AtomicU32,
}

impl FlakyOperation {
    /// Fails `failures` times with a transient error.
    #[must_use]
    pub const fn new(failures: u32) -> Self {
        Self::with_kind(failures, ErrorKind::Transient)
    }

    /// Fails `failures` times with `kind`.
    #[must_use]
    pub const fn with_kind(failures: u32, kind: ErrorKind) -> Self {
        Self {
            failures,
            kind,
            calls: AtomicU32::new(0),
        }
    }

    /// Fails on every call.
    #[must_use]
    pub const fn always(kind: ErrorKind) -> Self {
        Self::with_kind(u32::MAX, kind)
    }

    /// Runs one attempt. Returns the 1-based attempt number on success.
    pub async fn call(&self) -> Result<u32, OperationError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(OperationError::new(
                self.kind,
                format!("{} failure on attempt {attempt}", self.kind),
            ))
        } else {
            Ok(attempt)
        }
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_replays_script() {
        let provider = MockProvider::new("mock")
            .then_err(OperationError::rate_limited("slow down"))
            .then_ok("first")
            .with_fallback("later");

        assert!(provider.complete("a").await.is_err());
        assert_eq!(provider.complete("b").await.ok().as_deref(), Some("first"));
        assert_eq!(provider.complete("c").await.ok().as_deref(), Some("later"));
        assert_eq!(provider.prompts(), vec!["a", "b", "c"]);
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn test_flaky_operation() {
        let op = FlakyOperation::with_kind(2, ErrorKind::ServiceUnavailable);
        let first = op.call().await;
        assert!(first.is_err_and(|e| e.kind == ErrorKind::ServiceUnavailable));
        assert!(op.call().await.is_err());
        assert_eq!(op.call().await.ok(), Some(3));
        assert_eq!(op.calls(), 3);
    }
}
