//! Batch accumulator: a FIFO, thread-safe queue that emits a batch when
//! size, elapsed time, or an explicit flush signal triggers it. Grounded on
//! `fc-outbox/src/buffer.rs`'s `GlobalBuffer`: push rejects rather than
//! drops when full, and drain takes up to a configured count.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, Notify};

#[derive(Debug, Clone)]
pub struct AccumulatorFullError {
    pub capacity: usize,
}

impl fmt::Display for AccumulatorFullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch accumulator full (capacity {})", self.capacity)
    }
}

impl std::error::Error for AccumulatorFullError {}

#[derive(Debug, Clone, Copy)]
pub struct AccumulatorConfig {
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub batch_timeout: Duration,
    pub capacity: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            min_batch_size: 1,
            batch_timeout: Duration::from_millis(500),
            capacity: 10_000,
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    first_item_at: Option<Instant>,
}

/// What to do with a batch emitted below `min_batch_size` after a timeout:
/// the caller should route those items individually through the per-item
/// pipeline instead of the batch handler.
pub enum Emitted<T> {
    Batch(Vec<T>),
    BelowMinimum(Vec<T>),
}

pub struct BatchAccumulator<T> {
    config: AccumulatorConfig,
    state: Mutex<State<T>>,
    flush_tx: watch::Sender<u64>,
    flush_rx: watch::Receiver<u64>,
    arrived: Notify,
}

impl<T: Send> BatchAccumulator<T> {
    pub fn new(config: AccumulatorConfig) -> Self {
        let (flush_tx, flush_rx) = watch::channel(0);
        Self {
            config,
            state: Mutex::new(State {
                items: VecDeque::new(),
                first_item_at: None,
            }),
            flush_tx,
            flush_rx,
            arrived: Notify::new(),
        }
    }

    /// Non-blocking when below capacity; returns `AccumulatorFullError`
    /// (the documented backpressure signal) at capacity.
    pub async fn push(&self, item: T) -> Result<(), AccumulatorFullError> {
        let mut state = self.state.lock().await;
        if state.items.len() >= self.config.capacity {
            return Err(AccumulatorFullError { capacity: self.config.capacity });
        }
        if state.first_item_at.is_none() {
            state.first_item_at = Some(Instant::now());
        }
        state.items.push_back(item);
        drop(state);
        self.arrived.notify_one();
        Ok(())
    }

    /// Signals an external flush; the next `await_batch` call returns
    /// immediately with whatever is buffered.
    pub fn flush(&self) {
        self.flush_tx.send_modify(|n| *n += 1);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Waits until size, timeout, or an explicit flush triggers emission,
    /// then drains up to `max_batch_size` items in FIFO order.
    pub async fn await_batch(&self) -> Emitted<T> {
        let mut flush_rx = self.flush_rx.clone();
        let initial_flush = *flush_rx.borrow();
        loop {
            {
                let state = self.state.lock().await;
                if state.items.len() >= self.config.max_batch_size {
                    drop(state);
                    return self.drain().await;
                }
                if let Some(first_at) = state.first_item_at {
                    if first_at.elapsed() >= self.config.batch_timeout {
                        drop(state);
                        return self.drain_respecting_minimum().await;
                    }
                }
            }

            let remaining_timeout = {
                let state = self.state.lock().await;
                match state.first_item_at {
                    Some(first_at) => self
                        .config
                        .batch_timeout
                        .saturating_sub(first_at.elapsed())
                        .max(Duration::from_millis(1)),
                    None => Duration::from_secs(3600),
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(remaining_timeout) => {
                    return self.drain_respecting_minimum().await;
                }
                changed = flush_rx.changed() => {
                    if changed.is_ok() && *flush_rx.borrow() != initial_flush {
                        return self.drain().await;
                    }
                }
                _ = self.arrived.notified() => {
                    // Loop back around to re-check size/timeout with fresh state.
                }
            }
        }
    }

    async fn drain(&self) -> Emitted<T> {
        let mut state = self.state.lock().await;
        let count = state.items.len().min(self.config.max_batch_size.max(1));
        let batch: Vec<T> = state.items.drain(..count).collect();
        state.first_item_at = if state.items.is_empty() { None } else { Some(Instant::now()) };
        Emitted::Batch(batch)
    }

    async fn drain_respecting_minimum(&self) -> Emitted<T> {
        let mut state = self.state.lock().await;
        let count = state.items.len().min(self.config.max_batch_size.max(1));
        let batch: Vec<T> = state.items.drain(..count).collect();
        state.first_item_at = if state.items.is_empty() { None } else { Some(Instant::now()) };
        if batch.len() < self.config.min_batch_size {
            Emitted::BelowMinimum(batch)
        } else {
            Emitted::Batch(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_on_size_threshold() {
        let acc = BatchAccumulator::new(AccumulatorConfig {
            max_batch_size: 3,
            min_batch_size: 1,
            batch_timeout: Duration::from_secs(10),
            capacity: 100,
        });
        for i in 0..3 {
            acc.push(i).await.unwrap();
        }
        match acc.await_batch().await {
            Emitted::Batch(batch) => assert_eq!(batch, vec![0, 1, 2]),
            Emitted::BelowMinimum(_) => panic!("expected full batch"),
        }
    }

    #[tokio::test]
    async fn emits_below_minimum_on_timeout() {
        let acc = BatchAccumulator::new(AccumulatorConfig {
            max_batch_size: 10,
            min_batch_size: 5,
            batch_timeout: Duration::from_millis(20),
            capacity: 100,
        });
        acc.push(1).await.unwrap();
        match acc.await_batch().await {
            Emitted::BelowMinimum(batch) => assert_eq!(batch, vec![1]),
            Emitted::Batch(_) => panic!("expected below-minimum emission"),
        }
    }

    #[tokio::test]
    async fn explicit_flush_emits_immediately() {
        let acc = BatchAccumulator::new(AccumulatorConfig {
            max_batch_size: 100,
            min_batch_size: 1,
            batch_timeout: Duration::from_secs(60),
            capacity: 100,
        });
        acc.push(1).await.unwrap();
        acc.push(2).await.unwrap();
        let acc_handle = std::sync::Arc::new(acc);
        let acc_clone = acc_handle.clone();
        let awaiting = tokio::spawn(async move { acc_clone.await_batch().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        acc_handle.flush();
        let result = awaiting.await.unwrap();
        match result {
            Emitted::Batch(batch) => assert_eq!(batch, vec![1, 2]),
            Emitted::BelowMinimum(batch) => assert_eq!(batch, vec![1, 2]),
        }
    }

    #[tokio::test]
    async fn push_preserves_fifo_order() {
        let acc = BatchAccumulator::new(AccumulatorConfig {
            max_batch_size: 5,
            min_batch_size: 1,
            batch_timeout: Duration::from_secs(10),
            capacity: 100,
        });
        for i in 0..5 {
            acc.push(i).await.unwrap();
        }
        match acc.await_batch().await {
            Emitted::Batch(batch) => assert_eq!(batch, vec![0, 1, 2, 3, 4]),
            Emitted::BelowMinimum(_) => panic!(),
        }
    }

    #[tokio::test]
    async fn push_rejected_at_capacity() {
        let acc = BatchAccumulator::new(AccumulatorConfig {
            max_batch_size: 10,
            min_batch_size: 1,
            batch_timeout: Duration::from_secs(10),
            capacity: 2,
        });
        acc.push(1).await.unwrap();
        acc.push(2).await.unwrap();
        assert!(acc.push(3).await.is_err());
    }
}
