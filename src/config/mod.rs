//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup and fails fast on malformed values. Every queue
//! setting has a default, so an empty environment yields a working queue.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue, dispatch and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of buffered work items. Always > 0.
    pub capacity: usize,
    /// Global retry switch. Items must also opt in at send time.
    pub retry_enabled: bool,
    /// Re-enqueues allowed per item before it is discarded.
    pub max_retries: u32,
    /// Cap on concurrently running handlers. `None` = unbounded.
    pub max_concurrent: Option<usize>,
    /// How long shutdown waits for in-flight handlers. `None` = no wait.
    pub drain_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            retry_enabled: false,
            max_retries: DEFAULT_MAX_RETRIES,
            max_concurrent: None,
            drain_timeout: None,
        }
    }
}

impl QueueConfig {
    /// Load queue settings from `TASKQ_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = optional_var("TASKQ_CAPACITY") {
            config.capacity = parse_positive("TASKQ_CAPACITY", &v)?;
        }
        if let Some(v) = optional_var("TASKQ_RETRY_ENABLED") {
            config.retry_enabled = parse_bool("TASKQ_RETRY_ENABLED", &v)?;
        }
        if let Some(v) = optional_var("TASKQ_MAX_RETRIES") {
            config.max_retries = v.parse().map_err(|_| invalid("TASKQ_MAX_RETRIES", &v))?;
        }
        if let Some(v) = optional_var("TASKQ_MAX_CONCURRENT") {
            config.max_concurrent = Some(parse_positive("TASKQ_MAX_CONCURRENT", &v)?);
        }
        if let Some(v) = optional_var("TASKQ_DRAIN_TIMEOUT_MS") {
            let ms: u64 = v.parse().map_err(|_| invalid("TASKQ_DRAIN_TIMEOUT_MS", &v))?;
            config.drain_timeout = Some(Duration::from_millis(ms));
        }
        Ok(config)
    }

    /// Parse the `[queue]` table of a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: QueueFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad queue config: {e}")))?;
        file.queue.try_into()
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Re-check invariants on a hand-built config.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config(
                "queue capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent == Some(0) {
            return Err(Error::Config(
                "max_concurrent must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct QueueFile {
    #[serde(default)]
    queue: RawQueue,
}

/// Queue table as written, before validation. Signed integers so that
/// negative values are reported rather than failing to deserialize.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawQueue {
    capacity: Option<i64>,
    retry_enabled: Option<bool>,
    max_retries: Option<u32>,
    max_concurrent: Option<i64>,
    drain_timeout_ms: Option<u64>,
}

impl TryFrom<RawQueue> for QueueConfig {
    type Error = Error;

    fn try_from(raw: RawQueue) -> Result<Self> {
        let defaults = QueueConfig::default();
        Ok(Self {
            capacity: match raw.capacity {
                Some(n) => positive("capacity", n)?,
                None => defaults.capacity,
            },
            retry_enabled: raw.retry_enabled.unwrap_or(defaults.retry_enabled),
            max_retries: raw.max_retries.unwrap_or(defaults.max_retries),
            max_concurrent: raw
                .max_concurrent
                .map(|n| positive("max_concurrent", n))
                .transpose()?,
            drain_timeout: raw.drain_timeout_ms.map(Duration::from_millis),
        })
    }
}

/// Process-level configuration: queue settings plus telemetry.
#[derive(Debug, Clone)]
pub struct Config {
    pub queue: QueueConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            queue: QueueConfig::from_env()?,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn invalid(name: &str, value: &str) -> Error {
    Error::Config(format!("invalid value for {name}: {value:?}"))
}

fn positive(name: &str, n: i64) -> Result<usize> {
    if n <= 0 {
        return Err(Error::Config(format!(
            "{name} must be greater than zero, got {n}"
        )));
    }
    usize::try_from(n).map_err(|_| Error::Config(format!("{name} is too large: {n}")))
}

fn parse_positive(name: &str, value: &str) -> Result<usize> {
    let n: i64 = value.trim().parse().map_err(|_| invalid(name, value))?;
    positive(name, n)
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_numbers_are_rejected() {
        assert!(positive("capacity", 0).is_err());
        assert!(positive("capacity", -3).is_err());
        assert_eq!(positive("capacity", 4).unwrap(), 4);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
