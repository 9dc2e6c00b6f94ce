//! One circuit breaker per named downstream dependency.

use super::{BreakerSnapshot, CircuitBreaker};
use crate::events::{default_sink, EventSink};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Settings used when the registry creates a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open.
    pub recovery_period: Duration,
    /// Half-open successes that close the circuit.
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_period: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

/// Owns the breakers of an application.
///
/// The registry is constructed once and handed to whoever needs a breaker;
/// every caller that asks for the same dependency name gets the same
/// breaker and therefore shares its state.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerSettings,
    sink: Arc<dyn EventSink>,
}

impl BreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            sink: default_sink(),
        }
    }

    /// Sets the event sink given to breakers created from now on.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the breaker for `name`, creating it with the default settings.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.defaults)
    }

    /// Returns the breaker for `name`, creating it with `settings` if absent.
    ///
    /// Settings are ignored when the breaker already exists.
    pub fn get_or_create_with(&self, name: &str, settings: BreakerSettings) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(
                    CircuitBreaker::new(
                        settings.failure_threshold,
                        settings.recovery_period,
                        settings.success_threshold,
                    )
                    .named(name)
                    .with_sink(self.sink.clone()),
                )
            })
            .clone()
    }

    /// Registers an externally built breaker under its own name.
    pub fn insert(&self, breaker: Arc<CircuitBreaker>) {
        self.breakers.insert(breaker.name().to_string(), breaker);
    }

    /// Returns the breaker for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    /// Returns snapshots of all breakers, sorted by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Resets every breaker to closed.
    pub fn reset_all(&self) {
        for breaker in &self.breakers {
            breaker.value().reset();
        }
    }

    /// Returns the number of breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.breakers.len())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
