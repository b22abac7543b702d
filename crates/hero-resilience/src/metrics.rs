//! A single sum-typed metric snapshot instead of one interface per
//! component. Each producer (pipeline, outbox, scheduler, pool, ...)
//! contributes a variant; `MetricsCollector::snapshot` returns everything
//! gathered so far for a consumer like the demo binary or a test assertion.
//!
//! Counters also flow to the global `metrics` registry (bridged to
//! Prometheus via `metrics-exporter-prometheus` in `bin/hero-dev`) so the
//! in-process snapshot and an external scrape stay consistent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// One value contributed by a component. Kept as a small closed set rather
/// than a generic `HashMap<String, f64>` so callers get compile-time
/// checking of the fields they read.
#[derive(Debug, Clone, Serialize)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram { count: u64, sum_ms: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub values: HashMap<String, MetricValue>,
}

struct Counter(AtomicU64);
struct Histogram {
    count: AtomicU64,
    sum_ms_bits: AtomicU64,
}

/// Process-wide metrics collector, one instance shared across crates via
/// `Arc`. Named metrics are created lazily on first use.
#[derive(Default)]
pub struct MetricsCollector {
    counters: DashMap<String, Counter>,
    gauges: DashMap<String, AtomicU64>,
    histograms: DashMap<String, Histogram>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_counter(&self, name: &str, by: u64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| Counter(AtomicU64::new(0)))
            .0
            .fetch_add(by, Ordering::Relaxed);
        metrics::counter!(name.to_owned()).increment(by);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value.to_bits(), Ordering::Relaxed);
        metrics::gauge!(name.to_string()).set(value);
    }

    pub fn record_duration(&self, name: &str, duration_ms: f64) {
        let entry = self.histograms.entry(name.to_string()).or_insert_with(|| Histogram {
            count: AtomicU64::new(0),
            sum_ms_bits: AtomicU64::new(0.0f64.to_bits()),
        });
        entry.count.fetch_add(1, Ordering::Relaxed);
        // Accumulate via compare-exchange since floats have no atomic add.
        let mut current = entry.sum_ms_bits.load(Ordering::Relaxed);
        loop {
            let new_sum = f64::from_bits(current) + duration_ms;
            match entry.sum_ms_bits.compare_exchange_weak(
                current,
                new_sum.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        metrics::histogram!(name.to_string()).record(duration_ms);
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        let mut values = HashMap::new();
        for entry in self.counters.iter() {
            values.insert(
                entry.key().clone(),
                MetricValue::Counter(entry.value().0.load(Ordering::Relaxed)),
            );
        }
        for entry in self.gauges.iter() {
            values.insert(
                entry.key().clone(),
                MetricValue::Gauge(f64::from_bits(entry.value().load(Ordering::Relaxed))),
            );
        }
        for entry in self.histograms.iter() {
            values.insert(
                entry.key().clone(),
                MetricValue::Histogram {
                    count: entry.value().count.load(Ordering::Relaxed),
                    sum_ms: f64::from_bits(entry.value().sum_ms_bits.load(Ordering::Relaxed)),
                },
            );
        }
        MetricSnapshot { values }
    }
}
