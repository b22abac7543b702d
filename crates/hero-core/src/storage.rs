//! Generic message storage: CRUD plus simple predicate queries over a
//! typed payload, independent of the outbox/inbox/scheduler's
//! narrower purpose-built storages. Grounded on `hero-dlq`'s
//! `parking_lot::RwLock<HashMap>` bookkeeping, generalized to an
//! arbitrary stored type, plus a transaction-scoped variant that buffers
//! writes until `commit`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hero_common::HeroError;
use parking_lot::RwLock;
use uuid::Uuid;

/// A stored record: an opaque id plus a typed payload. Implementations
/// must preserve id uniqueness and make `store` durable before returning.
#[async_trait]
pub trait MessageStorage<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    async fn store(&self, id: Uuid, value: T) -> Result<(), HeroError>;

    async fn retrieve(&self, id: Uuid) -> Result<Option<T>, HeroError>;

    /// Every stored value matching `predicate`. Predicates run in-process
    /// against the in-memory snapshot; a durable backend would translate
    /// this into a query instead.
    async fn query(&self, predicate: &(dyn for<'r> Fn(&'r T) -> bool + Sync)) -> Result<Vec<(Uuid, T)>, HeroError>;

    async fn delete(&self, id: Uuid) -> Result<bool, HeroError>;

    async fn update(&self, id: Uuid, value: T) -> Result<(), HeroError>;

    async fn exists(&self, id: Uuid) -> Result<bool, HeroError>;

    async fn count(&self) -> Result<u64, HeroError>;

    async fn clear(&self) -> Result<(), HeroError>;
}

/// A begun transaction: buffers writes until `commit`, discards them on
/// `rollback` or drop. The in-memory backend's "transaction" is just a
/// deferred batch of operations against the same map; a durable backend
/// would hold a real database transaction handle instead.
#[async_trait]
pub trait StorageTransaction<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    async fn store(&mut self, id: Uuid, value: T);

    async fn commit(self: Box<Self>) -> Result<(), HeroError>;

    async fn rollback(self: Box<Self>);
}

pub struct InMemoryMessageStorage<T> {
    entries: RwLock<HashMap<Uuid, T>>,
}

impl<T> InMemoryMessageStorage<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Default for InMemoryMessageStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> MessageStorage<T> for InMemoryMessageStorage<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn store(&self, id: Uuid, value: T) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(HeroError::Storage(format!("duplicate id {id}")));
        }
        entries.insert(id, value);
        Ok(())
    }

    async fn retrieve(&self, id: Uuid) -> Result<Option<T>, HeroError> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn query(&self, predicate: &(dyn for<'r> Fn(&'r T) -> bool + Sync)) -> Result<Vec<(Uuid, T)>, HeroError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(_, v)| predicate(v))
            .map(|(id, v)| (*id, v.clone()))
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, HeroError> {
        Ok(self.entries.write().remove(&id).is_some())
    }

    async fn update(&self, id: Uuid, value: T) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if !entries.contains_key(&id) {
            return Err(HeroError::Storage(format!("no such id {id}")));
        }
        entries.insert(id, value);
        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool, HeroError> {
        Ok(self.entries.read().contains_key(&id))
    }

    async fn count(&self) -> Result<u64, HeroError> {
        Ok(self.entries.read().len() as u64)
    }

    async fn clear(&self) -> Result<(), HeroError> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Buffers writes against a shared [`InMemoryMessageStorage`] and applies
/// them atomically (under a single write-lock acquisition) on commit.
pub struct InMemoryTransaction<T> {
    target: Arc<InMemoryMessageStorage<T>>,
    pending: Vec<(Uuid, T)>,
}

impl<T> InMemoryTransaction<T> {
    pub fn new(target: Arc<InMemoryMessageStorage<T>>) -> Self {
        Self {
            target,
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl<T> StorageTransaction<T> for InMemoryTransaction<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn store(&mut self, id: Uuid, value: T) {
        self.pending.push((id, value));
    }

    async fn commit(self: Box<Self>) -> Result<(), HeroError> {
        let mut entries = self.target.entries.write();
        for (id, value) in self.pending {
            entries.insert(id, value);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        tracing::debug!(discarded = self.pending.len(), "transaction rolled back");
    }
}
