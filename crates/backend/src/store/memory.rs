use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use shared_types::Subscription;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, SubscriptionStore};

type Partition = Arc<RwLock<Vec<Subscription>>>;

/// Process-local store partitioned per user.
///
/// Each user's records sit behind their own lock, so readers of one user run
/// concurrently and writers only exclude access to that same user.
#[derive(Default)]
pub struct InMemoryStore {
    partitions: DashMap<String, Partition>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, user: &str) -> Option<Partition> {
        self.partitions.get(user).map(|p| Arc::clone(p.value()))
    }

    fn partition_or_create(&self, user: &str) -> Partition {
        Arc::clone(self.partitions.entry(user.to_string()).or_default().value())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn upsert(&self, user: &str, subscription: Subscription) -> Result<(), StoreError> {
        let partition = self.partition_or_create(user);
        let mut records = partition.write().await;

        match records.iter_mut().find(|s| s.name == subscription.name) {
            Some(existing) => *existing = subscription,
            None => records.push(subscription),
        }

        Ok(())
    }

    async fn list(&self, user: &str) -> Result<Vec<Subscription>, StoreError> {
        match self.partition(user) {
            Some(partition) => Ok(partition.read().await.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn get(&self, user: &str, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        match self.partition(user) {
            Some(partition) => Ok(partition.read().await.iter().find(|s| s.id == id).cloned()),
            None => Ok(None),
        }
    }

    async fn delete(&self, user: &str, id: Uuid) -> Result<bool, StoreError> {
        let Some(partition) = self.partition(user) else {
            return Ok(false);
        };
        let mut records = partition.write().await;

        match records.iter().position(|s| s.id == id) {
            Some(index) => {
                records.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
