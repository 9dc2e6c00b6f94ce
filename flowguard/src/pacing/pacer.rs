//! Outbound call pacer.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Spaces callers at least `min_interval` apart.
///
/// Each `pace()` reserves the next free slot and sleeps until it. Callers
/// are released in the order they reserved.
#[derive(Debug)]
pub struct RatePacer {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RatePacer {
    /// Creates a pacer.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Creates a pacer allowing `per_second` calls per second.
    ///
    /// A rate of 0 disables pacing.
    #[must_use]
    pub fn per_second(per_second: u32) -> Self {
        if per_second == 0 {
            return Self::new(Duration::ZERO);
        }
        Self::new(Duration::from_secs(1) / per_second)
    }

    /// Waits for this caller's slot.
    pub async fn pace(&self) {
        let slot = {
            let now = Instant::now();
            let mut next = self.next_slot.lock();
            let slot = next.map_or(now, |at| at.max(now));
            *next = Some(slot + self.min_interval);
            slot
        };

        let now = Instant::now();
        if slot > now {
            debug!(wait_ms = u64::try_from((slot - now).as_millis()).unwrap_or(u64::MAX), "Pacing outbound call");
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Returns the minimum spacing.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
