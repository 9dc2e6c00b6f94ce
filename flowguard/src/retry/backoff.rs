//! Exponential backoff with jitter.
//!
//! `delay(a) = min(base * multiplier^(a - 1), max) + uniform(0, jitter)` for
//! the 1-indexed attempt `a` that just failed. The jitter term decorrelates
//! retries from many callers hitting the same provider at once.

use rand::Rng;
use std::time::Duration;

/// Parameters of the exponential backoff curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap applied before jitter is added.
    pub max_delay: Duration,
    /// Growth factor between attempts. Always > 1.
    pub multiplier: f64,
    /// Upper bound of the uniform random delay added on top.
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
            jitter: Duration::from_millis(100),
        }
    }
}

impl Backoff {
    /// Multiplier used when an invalid one is supplied.
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;

    /// Creates a backoff curve.
    ///
    /// `max_delay` is raised to `base_delay` if smaller, and a multiplier that
    /// is not a finite number above 1 falls back to [`Self::DEFAULT_MULTIPLIER`].
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64, jitter: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            multiplier: sanitize_multiplier(multiplier),
            jitter,
        }
    }

    /// Returns the capped delay for `attempt`, without jitter.
    #[must_use]
    pub fn delay_without_jitter(&self, attempt: u32) -> Duration {
        let max = self.max_delay.max(self.base_delay);
        let exponent = i32::try_from(attempt.max(1) - 1).unwrap_or(i32::MAX);
        let factor = sanitize_multiplier(self.multiplier).powi(exponent);
        let raw = self.base_delay.as_secs_f64() * factor;

        if raw.is_finite() && raw < max.as_secs_f64() {
            Duration::from_secs_f64(raw)
        } else {
            max
        }
    }

    /// Returns the delay for `attempt`, including a random jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_without_jitter(attempt) + self.sample_jitter()
    }

    /// Returns the delays that precede each retry of a call with `max_attempts`.
    #[must_use]
    pub fn schedule(&self, max_attempts: u32) -> BackoffSchedule {
        BackoffSchedule {
            backoff: *self,
            next_attempt: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    fn sample_jitter(&self) -> Duration {
        let millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        }
    }
}

fn sanitize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier > 1.0 {
        multiplier
    } else {
        Backoff::DEFAULT_MULTIPLIER
    }
}

/// Computes the retry delay after `attempt` failed.
#[must_use]
pub fn compute_delay(attempt: u32, backoff: &Backoff) -> Duration {
    backoff.delay(attempt)
}

/// Iterator over the jittered delays of a retry sequence.
///
/// Yields `max_attempts - 1` delays: one before each retry.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    backoff: Backoff,
    next_attempt: u32,
    max_attempts: u32,
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_attempt >= self.max_attempts {
            return None;
        }
        let delay = self.backoff.delay(self.next_attempt);
        self.next_attempt += 1;
        Some(delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.max_attempts.saturating_sub(self.next_attempt) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BackoffSchedule {}
