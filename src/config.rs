//! Construction-time configuration of an aggregator.
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_derive::Deserialize;

use crate::connstring::{self, ConnectionSettings};
use crate::error::Error::ArgumentError;
use crate::Result;

pub const DEFAULT_MAX_OPS_PER_TARGET: usize = 10;

/// How often, and after how many operations, buffered writes are flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    pub flush_interval: Duration,
    pub max_ops_per_target: usize,
    /// Whether bulk requests execute serially and stop at the first error.
    pub ordered: bool,
    pub connection: ConnectionSettings,
}

// The on-disk form, using the same field names as other drivers' settings files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    flush_interval_seconds: f64,
    #[serde(default = "default_max_ops")]
    max_ops_per_target: usize,
    #[serde(default = "default_ordered")]
    ordered: bool,
    connection: Option<String>,
}

fn default_max_ops() -> usize {
    DEFAULT_MAX_OPS_PER_TARGET
}

fn default_ordered() -> bool {
    true
}

impl AggregatorConfig {
    /// Validates the interval and limit. Bulk requests default to ordered
    /// execution and the connection to `ConnectionSettings::default()`.
    pub fn new(flush_interval_seconds: f64, max_ops_per_target: usize) -> Result<AggregatorConfig> {
        if !flush_interval_seconds.is_finite() || flush_interval_seconds <= 0.0 {
            return Err(ArgumentError(format!(
                "The flush interval must be a positive number of seconds, got {}.",
                flush_interval_seconds
            )));
        }

        if max_ops_per_target == 0 {
            return Err(ArgumentError(String::from(
                "The per-target operation limit must be greater than zero.",
            )));
        }

        let flush_interval = Duration::try_from_secs_f64(flush_interval_seconds).map_err(|_| {
            ArgumentError(format!(
                "The flush interval of {} seconds is out of range.",
                flush_interval_seconds
            ))
        })?;

        Ok(AggregatorConfig {
            flush_interval,
            max_ops_per_target,
            ordered: true,
            connection: ConnectionSettings::default(),
        })
    }

    pub fn with_ordered(mut self, ordered: bool) -> AggregatorConfig {
        self.ordered = ordered;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionSettings) -> AggregatorConfig {
        self.connection = connection;
        self
    }

    /// Parses a JSON configuration such as
    /// `{"flushIntervalSeconds": 0.5, "maxOpsPerTarget": 100, "connection": "mongodb://db:27017"}`.
    pub fn from_json_str(json: &str) -> Result<AggregatorConfig> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let config = AggregatorConfig::new(raw.flush_interval_seconds, raw.max_ops_per_target)?
            .with_ordered(raw.ordered);

        match raw.connection {
            Some(uri) => Ok(config.with_connection(connstring::parse(&uri)?)),
            None => Ok(config),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<AggregatorConfig> {
        let json = fs::read_to_string(path)?;
        AggregatorConfig::from_json_str(&json)
    }
}
