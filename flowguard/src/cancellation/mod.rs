//! Cooperative cancellation.
//!
//! Timeouts and batch processing accept a [`CancellationToken`] so that work
//! abandoned by a caller can be told to stop.

mod token;

pub use token::{CancelCallback, CancellationToken};
