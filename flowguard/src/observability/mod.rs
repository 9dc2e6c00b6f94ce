//! Logging setup.
//!
//! The library itself only emits `tracing` records and [`crate::events`]
//! events. Binaries and tests call [`init_logging`] once to install a
//! subscriber.

mod logging;

pub use logging::{init_logging, init_logging_with_filter, LogFormat, DEFAULT_FILTER};
