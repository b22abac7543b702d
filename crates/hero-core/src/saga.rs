//! Saga state store: correlated, versioned state with optimistic
//! concurrency: a caller-supplied version must match the stored one.
//! In-memory bookkeeping follows `hero-dlq`'s `parking_lot::RwLock<HashMap>`
//! pattern, generalized to the update-with-expected-version contract.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use hero_common::{ConcurrencyError, SagaState};
use parking_lot::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("saga '{0}' not found")]
    NotFound(String),
}

/// `S` is the saga's domain-specific state payload; the store only
/// understands `correlation_id` and `version`, never `S`'s internals.
#[async_trait]
pub trait SagaStore<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    /// Creates a new saga at version 0. Errors if `correlation_id` already
    /// has a saga (use `update` to advance an existing one).
    async fn start(&self, correlation_id: String, state: S) -> Result<SagaState<S>, SagaError>;

    async fn get(&self, correlation_id: &str) -> Option<SagaState<S>>;

    /// Advances the saga to `next_state`, succeeding only when
    /// `expected_version` matches the stored version; on success the
    /// stored version increments by exactly 1.
    async fn update(
        &self,
        correlation_id: &str,
        expected_version: u64,
        next_state: S,
        completed: bool,
    ) -> Result<SagaState<S>, SagaError>;

    async fn list_incomplete(&self) -> Vec<SagaState<S>>;
}

pub struct InMemorySagaStore<S> {
    sagas: RwLock<HashMap<String, SagaState<S>>>,
}

impl<S> InMemorySagaStore<S> {
    pub fn new() -> Self {
        Self {
            sagas: RwLock::new(HashMap::new()),
        }
    }
}

impl<S> Default for InMemorySagaStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> SagaStore<S> for InMemorySagaStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn start(&self, correlation_id: String, state: S) -> Result<SagaState<S>, SagaError> {
        let now = Utc::now();
        let saga = SagaState {
            correlation_id: correlation_id.clone(),
            current_state: state,
            version: 0,
            created_at: now,
            updated_at: now,
            completed: false,
        };
        let mut sagas = self.sagas.write();
        sagas.entry(correlation_id).or_insert_with(|| saga.clone());
        Ok(saga)
    }

    async fn get(&self, correlation_id: &str) -> Option<SagaState<S>> {
        self.sagas.read().get(correlation_id).cloned()
    }

    async fn update(
        &self,
        correlation_id: &str,
        expected_version: u64,
        next_state: S,
        completed: bool,
    ) -> Result<SagaState<S>, SagaError> {
        let mut sagas = self.sagas.write();
        let saga = sagas
            .get_mut(correlation_id)
            .ok_or_else(|| SagaError::NotFound(correlation_id.to_string()))?;

        if saga.version != expected_version {
            return Err(SagaError::Concurrency(ConcurrencyError {
                expected: saga.version,
                actual: expected_version,
            }));
        }

        saga.current_state = next_state;
        saga.version += 1;
        saga.completed = completed;
        saga.updated_at = Utc::now();
        Ok(saga.clone())
    }

    async fn list_incomplete(&self) -> Vec<SagaState<S>> {
        self.sagas
            .read()
            .values()
            .filter(|s| !s.completed)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum OrderSaga {
        AwaitingPayment,
        Paid,
        Shipped,
    }

    #[tokio::test]
    async fn update_with_matching_version_advances_and_bumps_version() {
        let store = InMemorySagaStore::new();
        store.start("order-1".to_string(), OrderSaga::AwaitingPayment).await.unwrap();

        let updated = store.update("order-1", 0, OrderSaga::Paid, false).await.unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.current_state, OrderSaga::Paid);

        let updated = store.update("order-1", 1, OrderSaga::Shipped, true).await.unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.completed);
    }

    #[tokio::test]
    async fn update_with_stale_version_raises_concurrency_error() {
        let store = InMemorySagaStore::new();
        store.start("order-1".to_string(), OrderSaga::AwaitingPayment).await.unwrap();
        store.update("order-1", 0, OrderSaga::Paid, false).await.unwrap();

        let err = store.update("order-1", 0, OrderSaga::Shipped, true).await.unwrap_err();
        match err {
            SagaError::Concurrency(ConcurrencyError { expected, actual }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 0);
            }
            other => panic!("expected Concurrency, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_incomplete_excludes_completed_sagas() {
        let store = InMemorySagaStore::new();
        store.start("a".to_string(), OrderSaga::AwaitingPayment).await.unwrap();
        store.start("b".to_string(), OrderSaga::AwaitingPayment).await.unwrap();
        store.update("b", 0, OrderSaga::Shipped, true).await.unwrap();

        let incomplete = store.list_incomplete().await;
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].correlation_id, "a");
    }
}
