use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RateLimitConfig {
    pub fn to_policy(&self) -> crate::rate_limiter::RetryPolicy {
        crate::rate_limiter::RetryPolicy {
            base_delay: std::time::Duration::from_millis(self.base_delay_ms),
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum candidates to consider per run; `None` means unbounded.
    #[serde(default)]
    pub scan_limit: Option<usize>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_flush_chunk_size")]
    pub flush_chunk_size: usize,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub include_detailed_ids: bool,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default = "default_detail_fetch_concurrency")]
    pub detail_fetch_concurrency: usize,
    /// Gates whether `delete_permanent` actions are honored at evaluation
    /// time. Decided Open Question: off by default; when off the action
    /// is skipped with a warning rather than rejected at save time.
    #[serde(default)]
    pub allow_delete_permanent: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            scan_limit: None,
            page_size: default_page_size(),
            flush_chunk_size: default_flush_chunk_size(),
            dry_run: false,
            include_detailed_ids: false,
            checkpoint_interval: default_checkpoint_interval(),
            detail_fetch_concurrency: default_detail_fetch_concurrency(),
            allow_delete_permanent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_completed")]
    pub max_completed: usize,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    #[serde(default = "default_max_snapshots_per_operation")]
    pub max_snapshots_per_operation: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_completed: default_max_completed(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            max_snapshots_per_operation: default_max_snapshots_per_operation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_circuit_breaker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_circuit_breaker_enabled(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_logging_level(),
            json: false,
        }
    }
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_page_size() -> u32 {
    50
}

fn default_flush_chunk_size() -> usize {
    500
}

fn default_checkpoint_interval() -> usize {
    100
}

fn default_detail_fetch_concurrency() -> usize {
    5
}

fn default_max_completed() -> usize {
    1000
}

fn default_snapshot_interval_ms() -> u64 {
    1000
}

fn default_max_snapshots_per_operation() -> usize {
    1000
}

fn default_circuit_breaker_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> u64 {
    60
}

fn default_store_path() -> String {
    "rules.json".to_string()
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_retries > 10 {
            return Err(GmailError::ConfigError(
                "rate_limit.max_retries cannot exceed 10".to_string(),
            ));
        }
        if self.rate_limit.backoff_factor < 1.0 {
            return Err(GmailError::ConfigError(
                "rate_limit.backoff_factor must be at least 1.0".to_string(),
            ));
        }

        if self.executor.page_size == 0 {
            return Err(GmailError::ConfigError(
                "executor.page_size must be at least 1".to_string(),
            ));
        }
        if self.executor.page_size > 50 {
            return Err(GmailError::ConfigError(
                "executor.page_size cannot exceed 50 (Gmail API page limit)".to_string(),
            ));
        }
        if self.executor.flush_chunk_size == 0 || self.executor.flush_chunk_size > 1000 {
            return Err(GmailError::ConfigError(
                "executor.flush_chunk_size must be between 1 and 1000".to_string(),
            ));
        }
        if self.executor.detail_fetch_concurrency == 0 {
            return Err(GmailError::ConfigError(
                "executor.detail_fetch_concurrency must be at least 1".to_string(),
            ));
        }

        if self.jobs.max_completed == 0 {
            return Err(GmailError::ConfigError(
                "jobs.max_completed must be at least 1".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(GmailError::ConfigError(
                "circuit_breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker.reset_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "circuit_breaker.reset_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.store.path.is_empty() {
            return Err(GmailError::ConfigError(
                "store.path cannot be empty".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(GmailError::ConfigError(format!(
                    "Invalid logging.level: '{}'. Must be one of trace, debug, info, warn, error",
                    other
                )));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file.
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
