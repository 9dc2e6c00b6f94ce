//! Global tracing subscriber setup.

use crate::errors::{ResilienceError, ResilienceResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ResilienceError::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Installs a global subscriber filtered by `RUST_LOG`, defaulting to
/// [`DEFAULT_FILTER`].
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(format: LogFormat) -> ResilienceResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(format, filter)
}

/// Installs a global subscriber with an explicit filter directive,
/// ignoring `RUST_LOG`.
pub fn init_logging_with_filter(format: LogFormat, directives: &str) -> ResilienceResult<()> {
    let filter = EnvFilter::try_new(directives)
        .map_err(|e| ResilienceError::Config(format!("invalid log filter {directives:?}: {e}")))?;
    install(format, filter)
}

fn install(format: LogFormat, filter: EnvFilter) -> ResilienceResult<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| ResilienceError::Config(format!("cannot install subscriber: {e}")))
}
