//! Circuit breaker state and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Availability gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    #[default]
    Closed,
    /// Calls fail fast without reaching the dependency.
    Open,
    /// One trial call at a time tests whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker, for health checks and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures since the last reset.
    pub failure_count: u32,
    /// Failures recorded over the breaker's lifetime.
    pub total_failures: u64,
    /// Successes recorded in the current half-open period.
    pub half_open_successes: u32,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Half-open successes that close the circuit.
    pub success_threshold: u32,
    /// How long the circuit stays open before a trial call.
    pub recovery_period_ms: u64,
    /// How many times the circuit has opened.
    pub times_opened: u64,
    /// Wall-clock time of the most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerSnapshot {
    /// Returns true if calls are currently admitted without gating.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == CircuitState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
    }

    #[test]
    fn test_state_serializes_kebab_case() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap_or_default();
        assert_eq!(json, "\"half-open\"");

        let parsed: Option<CircuitState> = serde_json::from_str("\"open\"").ok();
        assert_eq!(parsed, Some(CircuitState::Open));
    }
}
