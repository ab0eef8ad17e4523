//! Host configuration module
//!
//! Handles loading configuration from environment variables.

use crate::error::HostError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Timing and concurrency knobs for the lifecycle coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Default per-shard init timeout; definitions may override it
    pub init_timeout: Duration,

    /// Per-shard dispose timeout
    pub dispose_timeout: Duration,

    /// Upper bound on shards initializing at once
    pub max_concurrent_inits: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_millis(10_000),
            dispose_timeout: Duration::from_millis(5_000),
            max_concurrent_inits: 4,
        }
    }
}

/// Host process configuration
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Health/metrics/WebSocket HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    pub lifecycle: LifecycleConfig,
}

impl HostConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, HostError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HostError> {
        let defaults = LifecycleConfig::default();

        let http_port = parse_var(&lookup, "HTTP_PORT", 9090u16)?;
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let init_timeout_ms = parse_var(
            &lookup,
            "INIT_TIMEOUT_MS",
            defaults.init_timeout.as_millis() as u64,
        )?;
        let dispose_timeout_ms = parse_var(
            &lookup,
            "DISPOSE_TIMEOUT_MS",
            defaults.dispose_timeout.as_millis() as u64,
        )?;
        let max_concurrent_inits =
            parse_var(&lookup, "MAX_CONCURRENT_INITS", defaults.max_concurrent_inits)?;
        if max_concurrent_inits == 0 {
            return Err(HostError::Config(
                "MAX_CONCURRENT_INITS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            http_port,
            log_level,
            lifecycle: LifecycleConfig {
                init_timeout: Duration::from_millis(init_timeout_ms),
                dispose_timeout: Duration::from_millis(dispose_timeout_ms),
                max_concurrent_inits,
            },
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, HostError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| HostError::Config(format!("{key} must be a valid number: {e}"))),
        None => Ok(default),
    }
}
