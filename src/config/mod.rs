//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on values that do not parse.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sequencer::SequencerConfig;

#[derive(Debug)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub sequencer: SequencerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = SequencerConfig::default();

        let sequencer = SequencerConfig {
            name: std::env::var("KEYSEQ_NAME").unwrap_or(defaults.name),
            event_capacity: parsed_var("KEYSEQ_EVENT_CAPACITY")?.unwrap_or(defaults.event_capacity),
            slow_wait_threshold: parsed_var("KEYSEQ_SLOW_WAIT_MS")?
                .map(Duration::from_millis)
                .or(defaults.slow_wait_threshold),
        };

        Ok(Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            sequencer,
        })
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("environment variable {name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
