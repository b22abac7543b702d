//! Retry policy: exponential backoff with jitter, bounded by `max_retries`.

use std::sync::Arc;
use std::time::Duration;

use hero_common::RandomSource;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

pub struct RetryPolicy {
    config: RetryConfig,
    random: Arc<dyn RandomSource>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, random: Arc<dyn RandomSource>) -> Self {
        Self { config, random }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    pub fn budget_remaining(&self, retry_count: u32) -> bool {
        retry_count < self.config.max_retries
    }

    /// `delay = min(max_delay, base_delay * 2^(retry-1) * (1 + U[0, 0.3]))`.
    /// `retry` is 1-indexed: the delay before the first retry attempt.
    pub fn next_delay(&self, retry: u32) -> Duration {
        debug_assert!(retry >= 1);
        let exponent = retry.saturating_sub(1).min(32);
        let base = self.config.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);
        let jitter = 1.0 + self.random.unit() * 0.3;
        let delay_secs = (base * jitter).min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}
