//! Circuit breaker for protecting a flaky dependency.
//!
//! # State Transitions
//! ```text
//! Closed   → Open:     consecutive failures reach failure_threshold
//! Open     → HalfOpen: next execute() after recovery_period has elapsed
//! HalfOpen → Closed:   success_threshold consecutive trial successes
//! HalfOpen → Open:     any failure
//! ```
//!
//! The open → half-open transition is lazy: there is no background timer,
//! the breaker checks the clock when a call arrives. While half-open a
//! single trial call is admitted at a time. Only that trial's result moves
//! a half-open breaker; a call admitted before the circuit opened settles
//! without changing state.
//!
//! One breaker guards one logical dependency. Call sites that share a
//! breaker share its fate: a burst of failures from one of them opens the
//! circuit for all.

mod registry;
mod state;

pub use registry::{BreakerRegistry, BreakerSettings};
pub use state::{BreakerSnapshot, CircuitState};

use crate::errors::{ResilienceError, ResilienceResult};
use crate::events::{default_sink, emit_safely, CallContext, EventSink};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    total_failures: u64,
    half_open_successes: u32,
    trial_in_flight: bool,
    times_opened: u64,
    last_failure_at: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
}

impl BreakerInner {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            total_failures: 0,
            half_open_successes: 0,
            trial_in_flight: false,
            times_opened: 0,
            last_failure_at: None,
            last_failure_wall: None,
        }
    }
}

/// A state change, reported after the lock is released.
#[derive(Debug, Clone, Copy)]
enum Transition {
    Opened { failure_count: u32, from: CircuitState },
    HalfOpened,
    Closed,
    Rejected,
}

/// A three-state availability gate around one dependency.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_period: Duration,
    success_threshold: u32,
    inner: Mutex<BreakerInner>,
    sink: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    /// Creates a breaker.
    ///
    /// Thresholds below 1 are raised to 1.
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_period: Duration, success_threshold: u32) -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: failure_threshold.max(1),
            recovery_period,
            success_threshold: success_threshold.max(1),
            inner: Mutex::new(BreakerInner::new()),
            sink: default_sink(),
        }
    }

    /// Sets the breaker name used in errors and events.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    ///
    /// An open breaker whose recovery period has elapsed still reports
    /// `Open` until the next call moves it to half-open.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a snapshot of the breaker's counters.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_failures: inner.total_failures,
            half_open_successes: inner.half_open_successes,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_period_ms: u64::try_from(self.recovery_period.as_millis()).unwrap_or(u64::MAX),
            times_opened: inner.times_opened,
            last_failure_at: inner.last_failure_wall,
        }
    }

    /// Forces the breaker back to closed and clears its counters.
    pub fn reset(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            let times_opened = inner.times_opened;
            let total_failures = inner.total_failures;
            *inner = BreakerInner::new();
            inner.times_opened = times_opened;
            inner.total_failures = total_failures;
            previous
        };

        if previous != CircuitState::Closed {
            self.report(Transition::Closed, &CallContext::new("circuit.reset"));
        }
    }

    /// Runs `operation` if the circuit admits it.
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking `operation`
    /// while the circuit is open. Otherwise forwards the operation's result
    /// and updates the breaker state.
    pub async fn execute<T, E, F, Fut>(&self, operation: F, ctx: &CallContext) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ResilienceError>,
    {
        let mut permit = self.admit(ctx)?;

        let result: ResilienceResult<T> = operation().await.map_err(Into::into);
        match &result {
            Ok(_) => self.record_success(&mut permit, ctx),
            Err(e) => self.record_failure(&mut permit, e, ctx),
        }

        result
    }

    fn admit(&self, ctx: &CallContext) -> ResilienceResult<Permit<'_>> {
        let (admitted, transition) = {
            let mut inner = self.inner.lock();
            let mut transition = None;

            if inner.state == CircuitState::Open {
                let elapsed = inner
                    .last_failure_at
                    .map_or(Duration::MAX, |at| at.elapsed());
                if elapsed > self.recovery_period {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.trial_in_flight = false;
                    transition = Some(Transition::HalfOpened);
                }
            }

            match inner.state {
                CircuitState::Closed => (Some(false), transition),
                CircuitState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    (Some(true), transition)
                }
                CircuitState::HalfOpen | CircuitState::Open => (None, Some(Transition::Rejected)),
            }
        };

        if let Some(t) = transition {
            self.report(t, ctx);
        }

        match admitted {
            Some(trial) => Ok(Permit {
                breaker: self,
                trial,
                settled: false,
            }),
            None => Err(ResilienceError::circuit_open(self.name.clone())),
        }
    }

    fn record_success(&self, permit: &mut Permit<'_>, ctx: &CallContext) {
        permit.settled = true;
        let transition = {
            let mut inner = self.inner.lock();
            if permit.trial {
                inner.trial_in_flight = false;
            }

            match (inner.state, permit.trial) {
                (CircuitState::HalfOpen, true) => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.half_open_successes = 0;
                        Some(Transition::Closed)
                    } else {
                        None
                    }
                }
                (CircuitState::Closed, _) => {
                    inner.failure_count = 0;
                    None
                }
                // Admitted before the circuit opened.
                (CircuitState::HalfOpen | CircuitState::Open, _) => {
                    debug!(breaker = %self.name, "Ignored stale success");
                    None
                }
            }
        };

        if let Some(t) = transition {
            self.report(t, ctx);
        }
    }

    fn record_failure(&self, permit: &mut Permit<'_>, error: &ResilienceError, ctx: &CallContext) {
        permit.settled = true;
        let transition = {
            let mut inner = self.inner.lock();
            if permit.trial {
                inner.trial_in_flight = false;
            }
            inner.total_failures += 1;

            match (inner.state, permit.trial) {
                (CircuitState::Closed, _) | (CircuitState::HalfOpen, true) => {
                    inner.failure_count = inner.failure_count.saturating_add(1);
                    inner.last_failure_at = Some(Instant::now());
                    inner.last_failure_wall = Some(Utc::now());
                }
                // Admitted before the circuit opened; counted but not acted on.
                (CircuitState::HalfOpen | CircuitState::Open, _) => {}
            }

            match (inner.state, permit.trial) {
                (CircuitState::Closed, _) if inner.failure_count >= self.failure_threshold => {
                    inner.state = CircuitState::Open;
                    inner.times_opened += 1;
                    Some(Transition::Opened {
                        failure_count: inner.failure_count,
                        from: CircuitState::Closed,
                    })
                }
                (CircuitState::HalfOpen, true) => {
                    inner.state = CircuitState::Open;
                    inner.half_open_successes = 0;
                    inner.times_opened += 1;
                    Some(Transition::Opened {
                        failure_count: inner.failure_count,
                        from: CircuitState::HalfOpen,
                    })
                }
                _ => None,
            }
        };

        debug!(breaker = %self.name, error = %error, "Recorded failure");
        if let Some(t) = transition {
            self.report(t, ctx);
        }
    }

    fn release_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    fn report(&self, transition: Transition, ctx: &CallContext) {
        let sink = self.sink.as_ref();
        match transition {
            Transition::Opened { failure_count, from } => {
                warn!(
                    breaker = %self.name,
                    failure_count,
                    from = %from,
                    "Circuit breaker opened"
                );
                emit_safely(
                    sink,
                    ctx,
                    "circuit.opened",
                    serde_json::json!({
                        "breaker": self.name,
                        "failure_count": failure_count,
                        "from": from.as_str(),
                    }),
                );
            }
            Transition::HalfOpened => {
                info!(breaker = %self.name, "Circuit breaker half-open");
                emit_safely(
                    sink,
                    ctx,
                    "circuit.half_open",
                    serde_json::json!({ "breaker": self.name }),
                );
            }
            Transition::Closed => {
                info!(breaker = %self.name, "Circuit breaker closed");
                emit_safely(
                    sink,
                    ctx,
                    "circuit.closed",
                    serde_json::json!({ "breaker": self.name }),
                );
            }
            Transition::Rejected => {
                debug!(breaker = %self.name, "Circuit breaker rejected call");
                emit_safely(
                    sink,
                    ctx,
                    "circuit.rejected",
                    serde_json::json!({ "breaker": self.name }),
                );
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60), 1)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_period", &self.recovery_period)
            .field("success_threshold", &self.success_threshold)
            .finish_non_exhaustive()
    }
}

/// Admission for one call. Releases the half-open trial slot if the call is
/// dropped before it settles.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}
