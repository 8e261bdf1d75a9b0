//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides for sensitive values: `TRADEHOOK_MASTER_KEY` (the vault master
//! key, 64 hex characters), `DATABASE_URL`, `TRADEHOOK_WORKER_CONCURRENCY`,
//! and `TRADEHOOK_SENTRY_DSN` (optional error-reporting sink).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::logging::LoggingConfig;
use crate::domain::account::Exchange;
use crate::error::{Error, Result};
use crate::infrastructure::breaker::BreakerConfig;

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the webhook ingress and health endpoints.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL. Overridden by `DATABASE_URL`.
    pub url: String,
    /// Per-statement timeout.
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_store_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "tradehook.db".into(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

/// Queue facade settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_execute_attempts")]
    pub execute_attempts: u32,
    #[serde(default = "default_reconcile_attempts")]
    pub reconcile_attempts: u32,
    /// Queue operation timeout.
    #[serde(default = "default_queue_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_execute_attempts() -> u32 {
    5
}

fn default_reconcile_attempts() -> u32 {
    2
}

fn default_queue_timeout_secs() -> u64 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            execute_attempts: default_execute_attempts(),
            reconcile_attempts: default_reconcile_attempts(),
            timeout_secs: default_queue_timeout_secs(),
        }
    }
}

/// Execution worker settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent job handlers per worker process. Overridden by
    /// `TRADEHOOK_WORKER_CONCURRENCY`.
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    /// Seconds allowed for in-flight jobs to drain on shutdown.
    #[serde(default = "default_drain_secs")]
    pub drain_deadline_secs: u64,
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_drain_secs() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            drain_deadline_secs: default_drain_secs(),
        }
    }
}

/// Reconciler scheduling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
    /// Per-account random stagger, up to this many seconds.
    #[serde(default = "default_reconcile_jitter_secs")]
    pub jitter_secs: u64,
    #[serde(default = "default_reconcile_concurrency")]
    pub concurrency: usize,
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_reconcile_jitter_secs() -> u64 {
    10
}

fn default_reconcile_concurrency() -> usize {
    3
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
            jitter_secs: default_reconcile_jitter_secs(),
            concurrency: default_reconcile_concurrency(),
        }
    }
}

/// Circuit breaker tuning for exchange APIs.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_breaker_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_breaker_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_breaker_window_secs() -> u64 {
    60
}

fn default_breaker_threshold() -> u32 {
    10
}

fn default_breaker_cooldown_secs() -> u64 {
    30
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            window_secs: default_breaker_window_secs(),
            failure_threshold: default_breaker_threshold(),
            cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            window: Duration::from_secs(settings.window_secs),
            failure_threshold: settings.failure_threshold,
            cooldown: Duration::from_secs(settings.cooldown_secs),
            ..Self::default()
        }
    }
}

/// Exchange REST settings shared by all adapters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    /// Per-request timeout against exchange REST APIs.
    #[serde(default = "default_exchange_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_exchange_timeout_secs() -> u64 {
    10
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_exchange_timeout_secs(),
        }
    }
}

/// Health endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// RSS above this is reported unhealthy.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    /// Exchanges probed with a public ticker ping.
    #[serde(default = "default_probe_exchanges")]
    pub probe_exchanges: Vec<Exchange>,
}

fn default_memory_limit_mb() -> u64 {
    1024
}

fn default_probe_exchanges() -> Vec<Exchange> {
    vec![Exchange::Binance]
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
            probe_exchanges: default_probe_exchanges(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub exchange: ExchangeSettings,

    #[serde(default)]
    pub health: HealthConfig,

    /// Vault master key, 64 hex characters. Environment only; never stored
    /// in the config file.
    #[serde(skip)]
    pub master_key_hex: Option<String>,

    /// Optional error-reporting sink DSN.
    #[serde(skip)]
    pub sentry_dsn: Option<String>,
}

impl Config {
    /// Load from a TOML file, apply environment overrides, and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;
        let mut config = Self::parse_toml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content without touching the environment.
    pub fn parse_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// Pull secrets and overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                self.database.url = url;
            }
        }
        if let Ok(key) = std::env::var("TRADEHOOK_MASTER_KEY") {
            if !key.trim().is_empty() {
                self.master_key_hex = Some(key);
            }
        }
        if let Ok(concurrency) = std::env::var("TRADEHOOK_WORKER_CONCURRENCY") {
            if let Ok(n) = concurrency.parse::<usize>() {
                self.worker.concurrency = n;
            }
        }
        if let Ok(dsn) = std::env::var("TRADEHOOK_SENTRY_DSN") {
            if !dsn.trim().is_empty() {
                self.sentry_dsn = Some(dsn);
            }
        }
    }

    /// Validate invariants the runtime depends on.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(Error::Config("database url cannot be empty".into()));
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "server bind address is invalid: {}",
                self.server.bind
            )));
        }
        if self.worker.concurrency == 0 {
            return Err(Error::Config("worker concurrency must be >= 1".into()));
        }
        if self.reconciler.concurrency == 0 {
            return Err(Error::Config("reconciler concurrency must be >= 1".into()));
        }
        if let Some(key) = &self.master_key_hex {
            let trimmed = key.trim();
            if trimmed.len() != 64 || hex::decode(trimmed).is_err() {
                return Err(Error::Config(
                    "TRADEHOOK_MASTER_KEY must be 64 hex characters".into(),
                ));
            }
        }
        Ok(())
    }

    /// Initialize the tracing subscriber.
    pub fn init_logging(&self) {
        self.logging.init();
    }

    /// Exchange REST timeout as a duration.
    #[must_use]
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.worker.concurrency, 5);
        assert_eq!(config.reconciler.concurrency, 3);
        assert_eq!(config.reconciler.interval_secs, 30);
        assert_eq!(config.reconciler.jitter_secs, 10);
        assert_eq!(config.queue.execute_attempts, 5);
        assert_eq!(config.queue.reconcile_attempts, 2);
        assert_eq!(config.breaker.window_secs, 60);
        assert_eq!(config.breaker.failure_threshold, 10);
        assert_eq!(config.breaker.cooldown_secs, 30);
        assert_eq!(config.exchange.timeout_secs, 10);
        assert_eq!(config.database.timeout_secs, 5);
        assert_eq!(config.queue.timeout_secs, 3);
        assert_eq!(config.worker.drain_deadline_secs, 30);
    }

    #[test]
    fn parses_partial_toml() {
        let config = Config::parse_toml(
            r#"
            [server]
            bind = "127.0.0.1:9000"

            [worker]
            concurrency = 8

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.logging.level, "debug");
        // Untouched sections keep defaults.
        assert_eq!(config.reconciler.interval_secs, 30);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.bind = "not an address".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.master_key_hex = Some("short".into());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.master_key_hex = Some("ab".repeat(32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn breaker_settings_convert() {
        let settings = BreakerSettings::default();
        let config = BreakerConfig::from(&settings);

        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.cooldown, Duration::from_secs(30));
    }
}
