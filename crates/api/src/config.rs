//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{CoordinatorConfig, RetryPolicy};
use thiserror::Error;

/// A variable was set to something that does not parse.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid value for {var}: '{value}'")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: Postgres saga store; unset keeps state in memory
/// - `INVENTORY_URL`, `LEDGER_URL`: downstream services; unset uses the
///   in-memory demo services
/// - `RETRY_BASE_DELAY_MS`, `RETRY_MAX_ATTEMPTS`, `RETRY_JITTER`, `STEP_TIMEOUT_MS`
/// - `LOCK_TIMEOUT_MS`, `RECONCILE_INTERVAL_SECS`, `RECONCILE_MAX_ATTEMPTS`
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub inventory_url: Option<String>,
    pub ledger_url: Option<String>,
    pub retry_base_delay_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_jitter: f64,
    pub step_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub reconcile_interval_secs: u64,
    pub reconcile_max_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: text("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            log_level: text("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&lookup, "LOG_FORMAT", defaults.log_format)?,
            database_url: text("DATABASE_URL"),
            inventory_url: text("INVENTORY_URL"),
            ledger_url: text("LEDGER_URL"),
            retry_base_delay_ms: parse(&lookup, "RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms)?,
            retry_max_attempts: parse(&lookup, "RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            retry_jitter: parse(&lookup, "RETRY_JITTER", defaults.retry_jitter)?,
            step_timeout_ms: parse(&lookup, "STEP_TIMEOUT_MS", defaults.step_timeout_ms)?,
            lock_timeout_ms: parse(&lookup, "LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?,
            reconcile_interval_secs: parse(
                &lookup,
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval_secs,
            )?,
            reconcile_max_attempts: parse(
                &lookup,
                "RECONCILE_MAX_ATTEMPTS",
                defaults.reconcile_max_attempts,
            )?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_attempts: self.retry_max_attempts.max(1),
            jitter: self.retry_jitter.clamp(0.0, 1.0),
            step_timeout: Duration::from_millis(self.step_timeout_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            retry: self.retry_policy(),
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            reconcile_max_attempts: self.reconcile_max_attempts.max(1),
            ..CoordinatorConfig::default()
        }
    }

    /// Period of the background reconciliation pass.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

fn parse<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).map(|v| v.trim().to_string()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError { var, value: v }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            inventory_url: None,
            ledger_url: None,
            retry_base_delay_ms: 200,
            retry_max_attempts: 3,
            retry_jitter: 0.2,
            step_timeout_ms: 5000,
            lock_timeout_ms: 2000,
            reconcile_interval_secs: 30,
            reconcile_max_attempts: 20,
        }
    }
}
