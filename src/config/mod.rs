//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Queue used when none is configured.
pub const DEFAULT_QUEUE: &str = "default";

/// Idle wait between empty polls when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite database file shared by producers and workers.
    pub database_path: PathBuf,
    /// Queue name for producers and workers that don't name one.
    pub queue: String,
    /// Idle wait between empty polls.
    pub poll_interval: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_database(None)
    }

    /// Like [`from_env`](Self::from_env), but an explicit database path (e.g.
    /// from a command-line flag) takes precedence over `LITEJOB_DATABASE`.
    pub fn from_env_with_database(database: Option<PathBuf>) -> Result<Self> {
        let poll_interval = match std::env::var("LITEJOB_POLL_INTERVAL_MS") {
            Ok(raw) => Duration::from_millis(raw.parse().map_err(|e| {
                Error::Config(format!("LITEJOB_POLL_INTERVAL_MS must be an integer: {e}"))
            })?),
            Err(_) => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            database_path: match database {
                Some(path) => path,
                None => PathBuf::from(required_var("LITEJOB_DATABASE")?),
            },
            queue: std::env::var("LITEJOB_QUEUE").unwrap_or_else(|_| DEFAULT_QUEUE.to_string()),
            poll_interval,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
