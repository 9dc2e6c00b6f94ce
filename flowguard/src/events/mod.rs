//! Event sink system for observability.
//!
//! Layers report their decisions through an [`EventSink`]. Sinks are passed
//! explicitly to the layer that uses them; there is no process-wide sink.

mod context;
mod sink;

pub use context::CallContext;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;
use tracing::warn;

/// Returns the sink layers use when none is configured.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(LoggingEventSink::debug())
}

/// Emits an event, suppressing any panic raised by the sink.
pub(crate) fn emit_safely(
    sink: &dyn EventSink,
    ctx: &CallContext,
    event_type: &str,
    extra: serde_json::Value,
) {
    let data = ctx.event_data(extra);
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        sink.try_emit(event_type, Some(data));
    })) {
        warn!(event_type = %event_type, "Event sink panicked: {:?}", e);
    }
}
