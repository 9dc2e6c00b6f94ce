//! Error types for the flowguard reliability layer.
//!
//! Collaborators report failures as [`OperationError`], tagged with an
//! [`ErrorKind`]. Every layer in this crate returns [`ResilienceError`], which
//! either wraps that upstream error untouched or is one of the synthetic
//! errors raised by a layer itself (circuit open, timeout, cancellation).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Message shown to end users when a dependency is gated or too slow.
pub const TRY_AGAIN_LATER: &str = "Service temporarily unavailable, please try again later";

/// Structured classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network blip: connection reset, refused, DNS lookup failure.
    Transient,
    /// The provider asked us to slow down.
    RateLimited,
    /// The provider is overloaded or down for maintenance.
    ServiceUnavailable,
    /// The call did not finish in time.
    Timeout,
    /// A circuit breaker rejected the call without running it.
    CircuitOpen,
    /// The call was cancelled by its owner.
    Cancelled,
    /// Anything else. Never retried.
    #[default]
    Fatal,
}

impl ErrorKind {
    /// Returns true if retrying has a reasonable chance of success.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Transient | Self::RateLimited | Self::ServiceUnavailable | Self::Timeout
        )
    }

    /// Returns the snake_case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::Fatal => "fatal",
        }
    }

    /// Infers a kind from free-form error text.
    ///
    /// Only meant for collaborators that cannot tag their own errors; prefer
    /// constructing [`OperationError`] with an explicit kind.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["rate limit", "ratelimit", "too many requests", "429"]) {
            Self::RateLimited
        } else if has(&["service unavailable", "overloaded", "503"]) {
            Self::ServiceUnavailable
        } else if has(&["timed out", "timeout", "etimedout"]) {
            Self::Timeout
        } else if has(&[
            "connection reset",
            "econnreset",
            "connection refused",
            "econnrefused",
            "enotfound",
            "dns error",
            "broken pipe",
        ]) {
            Self::Transient
        } else {
            Self::Fatal
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by a protected collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct OperationError {
    /// Classification set by the collaborator.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Provider-specific code (HTTP status, error type), if any.
    pub code: Option<String>,
}

impl OperationError {
    /// Creates a new operation error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Creates a rate-limit error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    /// Creates a service-unavailable error.
    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    /// Creates a fatal (non-retryable) error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Creates an error whose kind is inferred from the message text.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::from_message(&message), message)
    }

    /// Sets the provider-specific code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Maps an HTTP status returned by a provider to an error.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => ErrorKind::RateLimited,
            502..=504 => ErrorKind::ServiceUnavailable,
            408 => ErrorKind::Timeout,
            _ => ErrorKind::Fatal,
        };
        Self::new(kind, message).with_code(status.to_string())
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        let kind = match err.kind() {
            Io::ConnectionReset
            | Io::ConnectionRefused
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::Interrupted
            | Io::UnexpectedEof => ErrorKind::Transient,
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            _ => ErrorKind::Fatal,
        };
        Self::new(kind, err.to_string())
    }
}

/// The error type returned by every flowguard layer.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// The protected operation failed.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// The circuit breaker is open and the operation was not invoked.
    #[error("circuit breaker is open: {name}")]
    CircuitOpen {
        /// Name of the breaker (the protected dependency).
        name: String,
    },

    /// The operation did not complete before its deadline.
    #[error("{message}")]
    Timeout {
        /// The deadline that was exceeded.
        duration: Duration,
        /// Timeout message.
        message: String,
    },

    /// Every attempt failed; `last` is the final error, unchanged.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last observed error.
        last: Box<ResilienceError>,
    },

    /// The operation was cancelled.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A spawned task panicked or was aborted.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ResilienceError {
    /// Creates a circuit-open error.
    #[must_use]
    pub fn circuit_open(name: impl Into<String>) -> Self {
        Self::CircuitOpen { name: name.into() }
    }

    /// Creates a timeout error, using the default message when none is given.
    #[must_use]
    pub fn timeout(duration: Duration, message: Option<&str>) -> Self {
        let message = message.map_or_else(
            || format!("operation timed out after {}ms", duration.as_millis()),
            ToString::to_string,
        );
        Self::Timeout { duration, message }
    }

    /// Returns the structured kind of this error.
    ///
    /// For exhausted retries this is the kind of the last error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Operation(e) => e.kind,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RetriesExhausted { last, .. } => last.kind(),
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::TaskFailed(_) | Self::Config(_) => ErrorKind::Fatal,
        }
    }

    /// Returns true if the default retry policy would retry this error.
    ///
    /// An exhausted retry sequence is never retried again by an outer layer.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } => false,
            other => other.kind().is_retryable(),
        }
    }

    /// Returns true if this error was raised by an open circuit.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self.root_cause(), Self::CircuitOpen { .. })
    }

    /// Returns true if this error was raised by a timeout guard.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Timeout { .. })
    }

    /// Returns true if the retry budget was used up.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// Returns the underlying error, looking through exhausted retries.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Consumes the error and returns the underlying error.
    #[must_use]
    pub fn into_root_cause(self) -> Self {
        match self {
            Self::RetriesExhausted { last, .. } => last.into_root_cause(),
            other => other,
        }
    }

    /// Returns a message safe to show to end users.
    ///
    /// Circuit-open and timeout errors collapse to a generic "try again later"
    /// message instead of leaking internal error text.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.root_cause() {
            Self::CircuitOpen { .. } | Self::Timeout { .. } => TRY_AGAIN_LATER.to_string(),
            Self::Operation(e) if e.kind.is_retryable() => TRY_AGAIN_LATER.to_string(),
            other => other.to_string(),
        }
    }

    /// Converts to a dictionary representation for structured logs.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().as_str()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));

        match self {
            Self::Operation(e) => {
                if let Some(ref code) = e.code {
                    map.insert("code".to_string(), serde_json::json!(code));
                }
            }
            Self::CircuitOpen { name } => {
                map.insert("breaker".to_string(), serde_json::json!(name));
            }
            Self::Timeout { duration, .. } => {
                map.insert(
                    "timeout_ms".to_string(),
                    serde_json::json!(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
                );
            }
            Self::RetriesExhausted { attempts, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
            }
            Self::Cancelled(_) | Self::TaskFailed(_) | Self::Config(_) => {}
        }

        map
    }
}

impl From<std::io::Error> for ResilienceError {
    fn from(err: std::io::Error) -> Self {
        Self::Operation(err.into())
    }
}

impl From<tokio::task::JoinError> for ResilienceError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias used across the crate.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
