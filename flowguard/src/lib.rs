//! # Flowguard
//!
//! Reliability middleware for calls to language-model providers and other
//! flaky remote services.
//!
//! Flowguard wraps an async operation in independent, composable layers:
//!
//! - **Retry**: exponential backoff with jitter and a retryability predicate
//! - **Circuit breaking**: fail fast while a dependency is unhealthy
//! - **Timeouts**: bound how long any single attempt may take
//! - **Bounded concurrency**: semaphore slots, a promise pool and a chunked
//!   batch processor with progress reporting
//! - **Pacing**: debounce, throttle and outbound rate pacing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flowguard::prelude::*;
//!
//! let config = ResilienceConfig::from_env()?;
//! let guard = CallGuard::from_config(&config, "llm")?;
//! let provider = GuardedProvider::new(MyProvider::new(), guard);
//!
//! let steps = vec![
//!     PipelineStep::new("summarize", "Summarize:\n{input}"),
//!     PipelineStep::new("translate", "Translate to French:\n{input}"),
//! ];
//! let outputs = run_pipeline(&provider, &steps, document).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod batch;
pub mod breaker;
pub mod cancellation;
pub mod concurrency;
pub mod config;
pub mod errors;
pub mod events;
pub mod guard;
pub mod observability;
pub mod pacing;
pub mod provider;
pub mod retry;
pub mod testing;
pub mod timeout;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::batch::{process_batch, process_batch_settled, BatchOptions};
    pub use crate::breaker::{
        BreakerRegistry, BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::concurrency::{ConcurrencyLimiter, ConcurrencySlot, PoolTask, PromisePool};
    pub use crate::config::ResilienceConfig;
    pub use crate::errors::{ErrorKind, OperationError, ResilienceError, ResilienceResult};
    pub use crate::events::{
        CallContext, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::guard::CallGuard;
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pacing::{debounce, throttle, Debounced, RatePacer, Throttled};
    pub use crate::provider::{
        run_pipeline, run_pipeline_batch, CompletionProvider, GuardedProvider, PipelineStep,
        StepOutput,
    };
    pub use crate::retry::{retry_with_backoff, Backoff, RetryExecutor, RetryPolicy};
    pub use crate::timeout::{with_timeout, with_timeout_token, TimeoutSpec};
}
