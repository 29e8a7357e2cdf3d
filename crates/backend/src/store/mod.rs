//! Record store interface for subscriptions.
//!
//! Records are scoped by user identity. Within one user's set the subscription
//! `name` is the deduplication key: [`SubscriptionStore::upsert`] replaces the
//! record carrying the same name, whatever its id.

use async_trait::async_trait;
use shared_types::Subscription;
use thiserror::Error;
use uuid::Uuid;

mod memory;

pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write subscription '{name}': {reason}")]
    Write { name: String, reason: String },
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert `subscription`, or overwrite the record with the same name.
    async fn upsert(&self, user: &str, subscription: Subscription) -> Result<(), StoreError>;

    /// All records for `user`, in insertion order.
    async fn list(&self, user: &str) -> Result<Vec<Subscription>, StoreError>;

    async fn get(&self, user: &str, id: Uuid) -> Result<Option<Subscription>, StoreError>;

    /// Remove the record with `id`. Returns whether it existed.
    async fn delete(&self, user: &str, id: Uuid) -> Result<bool, StoreError>;
}
