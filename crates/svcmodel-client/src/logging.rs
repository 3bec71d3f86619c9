//! Logging setup for client applications.
//!
//! Logs go to stderr so they never mix with application output on stdout.
//! `RUST_LOG` overrides the configured level.

use std::io;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `svcmodel_client=debug`
    pub level: String,
    /// JSON lines instead of human-readable output
    pub structured: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
        }
    }
}

impl LoggingConfig {
    /// Human-readable output at `level`
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            structured: false,
        }
    }

    /// JSON output at `level`
    pub fn structured(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            structured: true,
        }
    }

    /// Install the global subscriber.
    ///
    /// Fails when a global subscriber is already set.
    pub fn init(&self) -> io::Result<()> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        let subscriber = tracing_subscriber::registry().with(filter);

        if self.structured {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        } else {
            subscriber
                .with(fmt::layer().with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        }
    }
}
