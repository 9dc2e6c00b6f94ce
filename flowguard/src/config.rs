//! Configuration for the resilience layers.
//!
//! Every section deserializes from JSON with per-field defaults, so a config
//! file only needs the values it changes. Environment variables prefixed with
//! `FLOWGUARD_` override file values.

use crate::batch::BatchOptions;
use crate::breaker::{BreakerSettings, CircuitBreaker};
use crate::errors::{ResilienceError, ResilienceResult};
use crate::pacing::RatePacer;
use crate::retry::{Backoff, RetryPolicy};
use crate::timeout::TimeoutSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "FLOWGUARD_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Timeout settings.
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Batch settings.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Pacing settings.
    #[serde(default)]
    pub pacing: PacingConfig,
}

impl ResilienceConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> ResilienceResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ResilienceResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ResilienceError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Builds the defaults overridden by `FLOWGUARD_*` environment variables.
    pub fn from_env() -> ResilienceResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Applies `FLOWGUARD_*` environment variables on top of `self`.
    pub fn with_env_overrides(self) -> ResilienceResult<Self> {
        self.with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Applies overrides from `lookup`, keyed without the prefix
    /// (e.g. `RETRY_MAX_ATTEMPTS`).
    pub fn with_overrides<F>(mut self, lookup: F) -> ResilienceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> ResilienceResult<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|_| {
                        ResilienceError::Config(format!("{ENV_PREFIX}{key} is not a number: {raw}"))
                    })
                })
                .transpose()
        };

        if let Some(v) = get("RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = clamp_u32(v);
        }
        if let Some(v) = get("RETRY_BASE_DELAY_MS")? {
            self.retry.base_delay_ms = v;
        }
        if let Some(v) = get("RETRY_MAX_DELAY_MS")? {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = get("RETRY_JITTER_MS")? {
            self.retry.jitter_ms = v;
        }
        if let Some(raw) = lookup("RETRY_MULTIPLIER") {
            self.retry.multiplier = raw.trim().parse::<f64>().map_err(|_| {
                ResilienceError::Config(format!("{ENV_PREFIX}RETRY_MULTIPLIER is not a number: {raw}"))
            })?;
        }
        if let Some(v) = get("BREAKER_FAILURE_THRESHOLD")? {
            self.breaker.failure_threshold = clamp_u32(v);
        }
        if let Some(v) = get("BREAKER_RECOVERY_PERIOD_MS")? {
            self.breaker.recovery_period_ms = v;
        }
        if let Some(v) = get("BREAKER_SUCCESS_THRESHOLD")? {
            self.breaker.success_threshold = clamp_u32(v);
        }
        if let Some(v) = get("TIMEOUT_MS")? {
            self.timeout.timeout_ms = v;
        }
        if let Some(v) = get("BATCH_SIZE")? {
            self.batch.batch_size = clamp_usize(v);
        }
        if let Some(v) = get("BATCH_CONCURRENCY")? {
            self.batch.concurrency = clamp_usize(v);
        }
        if let Some(v) = get("PACING_MIN_INTERVAL_MS")? {
            self.pacing.min_interval_ms = v;
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> ResilienceResult<()> {
        let invalid = |msg: &str| Err(ResilienceError::Config(msg.to_string()));

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid("retry.max_delay_ms must not be below retry.base_delay_ms");
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier > 1.0) {
            return invalid("retry.multiplier must be a finite number above 1");
        }
        if self.breaker.failure_threshold == 0 {
            return invalid("breaker.failure_threshold must be at least 1");
        }
        if self.breaker.success_threshold == 0 {
            return invalid("breaker.success_threshold must be at least 1");
        }
        if self.batch.batch_size == 0 {
            return invalid("batch.batch_size must be at least 1");
        }
        if self.batch.concurrency == 0 {
            return invalid("batch.concurrency must be at least 1");
        }
        Ok(())
    }

    /// Serializes to pretty JSON.
    pub fn to_json_pretty(&self) -> ResilienceResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn clamp_usize(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}

/// Retry section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound of the random jitter in milliseconds.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    Backoff::DEFAULT_MULTIPLIER
}

fn default_jitter_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryConfig {
    /// Returns the backoff curve.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
            Duration::from_millis(self.jitter_ms),
        )
    }

    /// Builds a retry policy with the default predicate.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_backoff(self.backoff())
    }
}

/// Circuit breaker section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the circuit stays open in milliseconds.
    #[serde(default = "default_recovery_period_ms")]
    pub recovery_period_ms: u64,
    /// Half-open successes needed to close.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_period_ms() -> u64 {
    60_000
}

fn default_success_threshold() -> u32 {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_period_ms: default_recovery_period_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl BreakerConfig {
    /// Returns the recovery period.
    #[must_use]
    pub const fn recovery_period(&self) -> Duration {
        Duration::from_millis(self.recovery_period_ms)
    }

    /// Settings for a [`crate::breaker::BreakerRegistry`].
    #[must_use]
    pub const fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold,
            recovery_period: self.recovery_period(),
            success_threshold: self.success_threshold,
        }
    }

    /// Builds a breaker named `name`.
    #[must_use]
    pub fn build(&self, name: impl Into<String>) -> CircuitBreaker {
        CircuitBreaker::new(
            self.failure_threshold,
            self.recovery_period(),
            self.success_threshold,
        )
        .named(name)
    }
}

/// Timeout section. A `timeout_ms` of 0 disables the timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline per attempt in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Custom timeout message.
    #[serde(default)]
    pub message: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            message: None,
        }
    }
}

impl TimeoutConfig {
    /// Returns the timeout, or `None` when disabled.
    #[must_use]
    pub fn to_spec(&self) -> Option<TimeoutSpec> {
        if self.timeout_ms == 0 {
            return None;
        }
        let spec = TimeoutSpec::new(Duration::from_millis(self.timeout_ms));
        Some(match self.message {
            Some(ref message) => spec.with_message(message.clone()),
            None => spec,
        })
    }
}

/// Batch section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Items per chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Items in flight inside a chunk.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_batch_size() -> usize {
    10
}

fn default_concurrency() -> usize {
    3
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl BatchConfig {
    /// Builds batch options without callbacks.
    #[must_use]
    pub fn to_options(&self) -> BatchOptions {
        BatchOptions::new()
            .with_batch_size(self.batch_size)
            .with_concurrency(self.concurrency)
    }
}

/// Pacing section. Zero intervals disable the respective utility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum spacing of outbound calls in milliseconds.
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Quiet period for debounced callbacks in milliseconds.
    #[serde(default)]
    pub debounce_ms: u64,
    /// Cooldown for throttled callbacks in milliseconds.
    #[serde(default)]
    pub throttle_ms: u64,
}

impl PacingConfig {
    /// Builds an outbound pacer, or `None` when disabled.
    #[must_use]
    pub fn to_pacer(&self) -> Option<RatePacer> {
        (self.min_interval_ms > 0).then(|| RatePacer::new(Duration::from_millis(self.min_interval_ms)))
    }

    /// Returns the debounce quiet period.
    #[must_use]
    pub const fn debounce_wait(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Returns the throttle cooldown.
    #[must_use]
    pub const fn throttle_limit(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}
