//! Health monitor: per-operation counters, rolling response-time average,
//! and an aggregate status derived from failure rates.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationHealth {
    pub operation: String,
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_failure_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_failure_reason: Option<String>,
    pub avg_response_time_ms: f64,
}

impl OperationHealth {
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthMonitorConfig {
    pub failure_rate_threshold: f64,
    /// Smoothing factor for the response-time EMA, in `(0, 1]`.
    pub ema_alpha: f64,
    pub metrics_retention: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            ema_alpha: 0.2,
            metrics_retention: Duration::from_secs(24 * 3600),
        }
    }
}

struct OperationRecord {
    total: u64,
    successes: u64,
    failures: u64,
    last_failure_time: Option<chrono::DateTime<chrono::Utc>>,
    last_failure_reason: Option<String>,
    avg_response_time_ms: f64,
    last_touched: Instant,
}

impl OperationRecord {
    fn new() -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            last_failure_time: None,
            last_failure_reason: None,
            avg_response_time_ms: 0.0,
            last_touched: Instant::now(),
        }
    }
}

/// Tracks per-operation success/failure counts and derives an overall
/// health status. Old records are pruned by [`HealthMonitor::prune`], which
/// callers should run periodically (on a timer tied
/// to `metrics_retention`).
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    records: DashMap<String, RwLock<OperationRecord>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    pub fn record_success(&self, operation: &str, response_time: Duration) {
        let entry = self
            .records
            .entry(operation.to_string())
            .or_insert_with(|| RwLock::new(OperationRecord::new()));
        let mut record = entry.write();
        record.total += 1;
        record.successes += 1;
        record.last_touched = Instant::now();
        Self::update_ema(&mut record.avg_response_time_ms, response_time, self.config.ema_alpha);
    }

    pub fn record_failure(&self, operation: &str, reason: impl Into<String>, response_time: Duration) {
        let entry = self
            .records
            .entry(operation.to_string())
            .or_insert_with(|| RwLock::new(OperationRecord::new()));
        let mut record = entry.write();
        record.total += 1;
        record.failures += 1;
        record.last_failure_time = Some(chrono::Utc::now());
        record.last_failure_reason = Some(reason.into());
        record.last_touched = Instant::now();
        Self::update_ema(&mut record.avg_response_time_ms, response_time, self.config.ema_alpha);
    }

    fn update_ema(current: &mut f64, sample: Duration, alpha: f64) {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        *current = if *current == 0.0 {
            sample_ms
        } else {
            alpha * sample_ms + (1.0 - alpha) * *current
        };
    }

    pub fn operation_health(&self, operation: &str) -> Option<OperationHealth> {
        self.records.get(operation).map(|entry| {
            let record = entry.read();
            OperationHealth {
                operation: operation.to_string(),
                total: record.total,
                successes: record.successes,
                failures: record.failures,
                last_failure_time: record.last_failure_time,
                last_failure_reason: record.last_failure_reason.clone(),
                avg_response_time_ms: record.avg_response_time_ms,
            }
        })
    }

    pub fn all_operations(&self) -> HashMap<String, OperationHealth> {
        self.records
            .iter()
            .map(|entry| {
                let record = entry.value().read();
                (
                    entry.key().clone(),
                    OperationHealth {
                        operation: entry.key().clone(),
                        total: record.total,
                        successes: record.successes,
                        failures: record.failures,
                        last_failure_time: record.last_failure_time,
                        last_failure_reason: record.last_failure_reason.clone(),
                        avg_response_time_ms: record.avg_response_time_ms,
                    },
                )
            })
            .collect()
    }

    /// `Healthy` if no operation exceeds the threshold, `Degraded` if some
    /// do but fewer than half, `Unhealthy` if half or more do, `Unknown` if
    /// there is no data at all.
    pub fn overall_status(&self) -> HealthStatus {
        if self.records.is_empty() {
            return HealthStatus::Unknown;
        }
        let total = self.records.len();
        let over_threshold = self
            .records
            .iter()
            .filter(|entry| entry.value().read().failure_rate() > self.config.failure_rate_threshold)
            .count();

        if over_threshold == 0 {
            HealthStatus::Healthy
        } else if (over_threshold as f64) < total as f64 * 0.5 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Drops operation records untouched for longer than `metrics_retention`.
    pub fn prune(&self) {
        let cutoff = self.config.metrics_retention;
        self.records
            .retain(|_, record| record.read().last_touched.elapsed() < cutoff);
    }
}

impl OperationRecord {
    fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }
}
