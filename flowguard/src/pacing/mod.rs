//! Call pacing: debounce, throttle and outbound rate pacing.
//!
//! [`debounce`] and [`throttle`] wrap a plain callback. [`RatePacer`] is
//! awaited by callers before they hit a rate-limited API.

mod debounce;
mod pacer;
mod throttle;

pub use debounce::{debounce, Debounced};
pub use pacer::RatePacer;
pub use throttle::{throttle, Throttled};
