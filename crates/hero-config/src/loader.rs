//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &["config.toml", "hero.toml", "./config/config.toml", "/etc/hero-messaging/config.toml"];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { config_path: Some(path.into()) }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("HERO_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("HERO_TRANSPORT_KIND") {
            config.transport.kind = val;
        }
        if let Ok(val) = env::var("HERO_TRANSPORT_AMQP_URL") {
            config.transport.amqp_url = val;
        }

        if let Ok(val) = env::var("HERO_POOL_MIN_SIZE") {
            if let Ok(n) = val.parse() {
                config.pool.min_pool_size = n;
            }
        }
        if let Ok(val) = env::var("HERO_POOL_MAX_SIZE") {
            if let Ok(n) = val.parse() {
                config.pool.max_pool_size = n;
            }
        }

        if let Ok(val) = env::var("HERO_OUTBOX_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.outbox.batch_size = n;
            }
        }
        if let Ok(val) = env::var("HERO_OUTBOX_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.outbox.polling_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("HERO_OUTBOX_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                config.outbox.max_retries = n;
            }
        }

        if let Ok(val) = env::var("HERO_INBOX_DEDUP_WINDOW_SECS") {
            if let Ok(n) = val.parse() {
                config.inbox.dedup_window_secs = n;
            }
        }

        if let Ok(val) = env::var("HERO_SCHEDULER_MODE") {
            config.scheduler.mode = val;
        }
        if let Ok(val) = env::var("HERO_SCHEDULER_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.scheduler.batch_size = n;
            }
        }
        if let Ok(val) = env::var("HERO_SCHEDULER_MAX_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.scheduler.max_concurrency = n;
            }
        }

        if let Ok(val) = env::var("HERO_RETRY_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                config.resilience.retry.max_retries = n;
            }
        }
        if let Ok(val) = env::var("HERO_BREAKER_FAILURE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.resilience.breaker.failure_threshold = n;
            }
        }
        if let Ok(val) = env::var("HERO_BREAKER_BREAK_DURATION_MS") {
            if let Ok(n) = val.parse() {
                config.resilience.breaker.break_duration_ms = n;
            }
        }

        if let Ok(val) = env::var("HERO_STORAGE_BACKEND") {
            config.storage.backend = val;
        }
        if let Ok(val) = env::var("HERO_STORAGE_SQLITE_PATH") {
            config.storage.sqlite_path = val;
        }

        if let Ok(val) = env::var("HERO_DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("HERO_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_override_wins_over_file_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(AppConfig::example_toml().as_bytes()).unwrap();

        std::env::set_var("HERO_POOL_MAX_SIZE", "42");
        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        std::env::remove_var("HERO_POOL_MAX_SIZE");

        assert_eq!(config.pool.max_pool_size, 42);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ConfigLoader::with_path("/nonexistent/hero.toml").load().unwrap();
        assert_eq!(config.pool.max_pool_size, AppConfig::default().pool.max_pool_size);
    }
}
