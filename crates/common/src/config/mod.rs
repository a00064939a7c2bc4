//! Configuration management for NutriForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration (gateway only)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Nutrient-data provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Enrichment worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Retry scheduler configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Sustained request rate across all routes
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,

    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL, or `memory://` for the in-process store
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply bundled migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider kind: usda, openai, mock
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    /// API key for the provider
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use (openai only)
    #[serde(default = "default_provider_model")]
    pub model: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Client-side rate limit (0 disables)
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Items claimed per invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Items processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Wall-clock budget for one invocation, in seconds
    #[serde(default = "default_time_budget")]
    pub time_budget_secs: u64,

    /// Overwrite known nutrient fields with provider values
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Cooldown before a failed record is retried, in hours
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,

    /// Consecutive failures before a record is parked for human review
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Maximum records touched by one sweep
    #[serde(default = "default_sweep_limit")]
    pub sweep_limit: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_rate_limit_rps() -> u32 { 50 }
fn default_rate_limit_burst() -> u32 { 100 }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_provider_kind() -> String { "usda".to_string() }
fn default_provider_model() -> String { "gpt-4o-mini".to_string() }
fn default_provider_timeout() -> u64 { 10 }
fn default_requests_per_second() -> u32 { 5 }
fn default_batch_size() -> usize { 5 }
fn default_concurrency() -> usize { 5 }
fn default_time_budget() -> u64 { 120 }
fn default_cooldown_hours() -> i64 { 24 }
fn default_max_attempts() -> i32 { 3 }
fn default_sweep_limit() -> u64 { 500 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "nutriforge".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            rate_limit_rps: default_rate_limit_rps(),
            rate_limit_burst: default_rate_limit_burst(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            api_key: None,
            api_base: None,
            model: default_provider_model(),
            timeout_secs: default_provider_timeout(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            time_budget_secs: default_time_budget(),
            force_refresh: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: default_cooldown_hours(),
            max_attempts: default_max_attempts(),
            sweep_limit: default_sweep_limit(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__WORKER__BATCH_SIZE=10
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Provider call timeout
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    /// Worker wall-clock budget
    pub fn worker_time_budget(&self) -> Duration {
        Duration::from_secs(self.worker.time_budget_secs)
    }

    /// How long a claim may stay `processing` before it counts as abandoned
    pub fn claim_lease(&self) -> Duration {
        self.worker_time_budget() * 2
    }

    /// Retry cooldown as a chrono duration
    pub fn retry_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retry.cooldown_hours)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/nutriforge".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: false,
            },
            provider: ProviderConfig::default(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.worker.batch_size, 5);
        assert_eq!(config.retry.cooldown_hours, 24);
    }

    #[test]
    fn test_retry_cooldown() {
        let config = AppConfig::default();
        assert_eq!(config.retry_cooldown(), chrono::Duration::hours(24));
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
        assert_eq!(config.claim_lease(), Duration::from_secs(240));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("database.url", "postgres://db/test")
            .unwrap()
            .set_override("worker.batch_size", 12)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.database.url, "postgres://db/test");
        assert_eq!(config.worker.batch_size, 12);
        assert_eq!(config.worker.concurrency, 5);
        assert_eq!(config.provider.kind, "usda");
        assert_eq!(config.retry.max_attempts, 3);
    }
}
