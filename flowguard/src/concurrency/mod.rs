//! Bounded concurrency primitives.
//!
//! - [`ConcurrencyLimiter`]: a FIFO counting semaphore handing out
//!   [`ConcurrencySlot`]s that release on drop. Used by the batch processor
//!   to bound per-chunk parallelism.
//! - [`PromisePool`]: spawns tasks onto the runtime, never more than
//!   `concurrency` at a time, and can wait for all of them with `drain`.

mod limiter;
mod pool;

pub use limiter::{ConcurrencyLimiter, ConcurrencySlot};
pub use pool::{PoolTask, PromisePool};
