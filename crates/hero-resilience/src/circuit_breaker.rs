//! Circuit breaker: a per-operation state machine that trips on sustained
//! failures to shed load from a failing downstream.
//!
//! | From | Event | To |
//! |------|-------|-----|
//! | Closed | failure count reaches `failure_threshold` | Open |
//! | Closed | success | Closed (reset count) |
//! | Open | `break_duration` elapsed since `last_failure_time` | HalfOpen (on next `can_execute`) |
//! | HalfOpen | success | Closed (reset count) |
//! | HalfOpen | failure | Open (reset `last_failure_time`) |

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hero_common::CircuitState;
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// A single-resource breaker. Operations of different names get independent
/// breakers via [`CircuitBreakerRegistry`]; this type is the unit they wrap.
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    last_failure_time: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_time: RwLock::new(None),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    /// `can_execute` is the only place Open transitions to HalfOpen; it is a
    /// query with a side effect: checking can_execute is itself what flips
    /// Open to HalfOpen once the break duration has elapsed.
    pub fn can_execute(&self) -> bool {
        let current = *self.state.read();
        match current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_time
                    .read()
                    .map(|t| t.elapsed() >= self.config.break_duration)
                    .unwrap_or(false);
                if elapsed {
                    *self.state.write() = CircuitState::HalfOpen;
                    tracing::debug!("circuit breaker transitioning to half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            tracing::info!(from = ?*state, "circuit breaker closed");
            *state = CircuitState::Closed;
        }
    }

    pub fn record_failure(&self) {
        *self.last_failure_time.write() = Some(Instant::now());
        let current = *self.state.read();
        match current {
            CircuitState::HalfOpen => {
                *self.state.write() = CircuitState::Open;
                tracing::warn!("circuit breaker reopened after half-open failure");
            }
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.failure_threshold {
                    *self.state.write() = CircuitState::Open;
                    tracing::warn!(failures = count, "circuit breaker tripped open");
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// One breaker per operation name, created lazily on first use.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, std::sync::Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, operation: &str) -> std::sync::Arc<CircuitBreaker> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(self.config)))
            .clone()
    }

    pub fn can_execute(&self, operation: &str) -> bool {
        self.get(operation).can_execute()
    }

    pub fn record_success(&self, operation: &str) {
        self.get(operation).record_success();
    }

    pub fn record_failure(&self, operation: &str) {
        self.get(operation).record_failure();
    }

    pub fn state(&self, operation: &str) -> Option<CircuitState> {
        self.breakers.get(operation).map(|b| b.state())
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, break_duration: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            break_duration,
        })
    }

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let cb = breaker(3, Duration::from_millis(50));
        assert!(cb.can_execute());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn success_resets_failure_count_in_closed() {
        let cb = breaker(3, Duration::from_millis(50));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_after_break_duration_single_success_closes() {
        let cb = breaker(1, Duration::from_millis(20));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(20));
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn registry_isolates_breakers_by_operation_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            break_duration: Duration::from_secs(30),
        });
        registry.record_failure("op-a");
        assert_eq!(registry.state("op-a"), Some(CircuitState::Open));
        assert_eq!(registry.state("op-b"), None);
        assert!(registry.can_execute("op-b"));
    }
}
