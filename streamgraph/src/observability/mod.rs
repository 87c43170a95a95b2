//! Log subscriber setup and cycle timing.

use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};
use crate::errors::ConfigError;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if the level
/// is not a valid filter directive or a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Invalid(format!("log level '{}': {e}", config.level)))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match config.format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|e| ConfigError::Invalid(format!("tracing subscriber: {e}")))
}

/// Times one unit of work, such as a batch cycle.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the elapsed milliseconds.
    #[must_use]
    pub fn finish(self) -> u64 {
        let elapsed = self.elapsed_ms();
        debug!(span = %self.name, duration_ms = elapsed, "Span finished");
        elapsed
    }
}
