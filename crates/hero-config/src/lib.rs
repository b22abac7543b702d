//! TOML-based configuration with `HERO_`-prefixed environment variable
//! overrides, one section per component the builder in `hero-core` wires
//! up.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub pool: PoolSettings,
    pub outbox: OutboxSettings,
    pub inbox: InboxSettings,
    pub scheduler: SchedulerSettings,
    pub resilience: ResilienceSettings,
    pub storage: StorageSettings,
    pub data_dir: String,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            pool: PoolSettings::default(),
            outbox: OutboxSettings::default(),
            inbox: InboxSettings::default(),
            scheduler: SchedulerSettings::default(),
            resilience: ResilienceSettings::default(),
            storage: StorageSettings::default(),
            data_dir: "./data".to_string(),
            dev_mode: false,
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Internal option bound checks; the plugin-name/implementation checks
    /// the builder also performs live in `hero-core` since they need the
    /// registered plugins, not just this config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.min_pool_size > self.pool.max_pool_size {
            return Err(ConfigError::ValidationError(
                "pool.min_pool_size must not exceed pool.max_pool_size".to_string(),
            ));
        }
        if self.pool.max_pool_size == 0 {
            return Err(ConfigError::ValidationError("pool.max_pool_size must be greater than zero".to_string()));
        }
        if self.outbox.batch_size == 0 {
            return Err(ConfigError::ValidationError("outbox.batch_size must be greater than zero".to_string()));
        }
        if self.scheduler.batch_size == 0 {
            return Err(ConfigError::ValidationError("scheduler.batch_size must be greater than zero".to_string()));
        }
        if self.resilience.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "resilience.breaker.failure_threshold must be greater than zero".to_string(),
            ));
        }
        match self.scheduler.mode.as_str() {
            "memory" | "storage" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "scheduler.mode must be 'memory' or 'storage', got '{other}'"
                )))
            }
        }
        match self.storage.backend.as_str() {
            "memory" | "sqlite" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "storage.backend must be 'memory' or 'sqlite', got '{other}'"
                )))
            }
        }
        Ok(())
    }

    pub fn example_toml() -> String {
        r#"# HeroMessaging configuration.
# Environment variables prefixed HERO_ override these settings.

[transport]
kind = "memory"  # memory, amqp
amqp_url = ""

[pool]
min_pool_size = 1
max_pool_size = 10
max_acquire_attempts = 5
acquire_retry_delay_ms = 50
health_check_interval_secs = 30
idle_timeout_secs = 300

[outbox]
batch_size = 100
polling_interval_ms = 1000
polling_jitter_ms = 200
max_retries = 5
shutdown_deadline_secs = 10

[inbox]
dedup_window_secs = 0  # 0 disables windowing (permanent dedup)

[scheduler]
mode = "memory"  # memory, storage
polling_interval_ms = 1000
batch_size = 100
max_concurrency = 8
cleanup_interval_secs = 300
cleanup_age_secs = 86400
shutdown_deadline_secs = 10
grace_period_secs = 5

[resilience.retry]
max_retries = 5
base_delay_ms = 100
max_delay_ms = 30000
jitter_factor = 0.2

[resilience.breaker]
failure_threshold = 5
break_duration_ms = 30000

[resilience.health]
window_size = 20
unhealthy_threshold = 0.5

[storage]
backend = "memory"  # memory, sqlite
sqlite_path = "./data/hero.db"

data_dir = "./data"
dev_mode = false
"#
        .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: String,
    pub amqp_url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { kind: "memory".to_string(), amqp_url: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub max_acquire_attempts: u32,
    pub acquire_retry_delay_ms: u64,
    pub health_check_interval_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_pool_size: 1,
            max_pool_size: 10,
            max_acquire_attempts: 5,
            acquire_retry_delay_ms: 50,
            health_check_interval_secs: 30,
            idle_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub batch_size: u32,
    pub polling_interval_ms: u64,
    pub polling_jitter_ms: u64,
    pub max_retries: u32,
    pub shutdown_deadline_secs: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            polling_interval_ms: 1000,
            polling_jitter_ms: 200,
            max_retries: 5,
            shutdown_deadline_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxSettings {
    /// 0 disables time-windowed dedup in favor of permanent id uniqueness.
    pub dedup_window_secs: u64,
}

impl Default for InboxSettings {
    fn default() -> Self {
        Self { dedup_window_secs: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub mode: String,
    pub polling_interval_ms: u64,
    pub batch_size: u32,
    pub max_concurrency: usize,
    pub cleanup_interval_secs: u64,
    pub cleanup_age_secs: u64,
    pub shutdown_deadline_secs: u64,
    pub grace_period_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            mode: "memory".to_string(),
            polling_interval_ms: 1000,
            batch_size: 100,
            max_concurrency: 8,
            cleanup_interval_secs: 300,
            cleanup_age_secs: 86_400,
            shutdown_deadline_secs: 10,
            grace_period_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub health: HealthSettings,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self { retry: RetrySettings::default(), breaker: BreakerSettings::default(), health: HealthSettings::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 100, max_delay_ms: 30_000, jitter_factor: 0.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub break_duration_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, break_duration_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub window_size: usize,
    pub unhealthy_threshold: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { window_size: 20, unhealthy_threshold: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: String,
    pub sqlite_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { backend: "memory".to_string(), sqlite_path: "./data/hero.db".to_string() }
    }
}
