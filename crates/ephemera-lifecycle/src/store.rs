//! In-memory ephemeral store.
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::RwLock` because the lock is never held across `.await`
//! and every operation is a single map lookup or removal.

use async_trait::async_trait;
use ephemera_core::{EphemeralStore, EpochId, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Epoch-scoped key/value store held in process memory.
///
/// Purging an epoch removes its whole bucket, so purges for distinct epochs
/// never touch each other's entries and repeating a purge is a no-op.
#[derive(Debug, Default)]
pub struct MemoryEphemeralStore {
    buckets: RwLock<HashMap<EpochId, HashMap<String, Vec<u8>>>>,
}

impl MemoryEphemeralStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held for an epoch.
    pub fn entry_count(&self, epoch_id: EpochId) -> usize {
        self.buckets
            .read()
            .get(&epoch_id)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn get(&self, epoch_id: EpochId, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .buckets
            .read()
            .get(&epoch_id)
            .and_then(|bucket| bucket.get(key).cloned()))
    }

    async fn set(&self, epoch_id: EpochId, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.buckets
            .write()
            .entry(epoch_id)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, epoch_id: EpochId, key: &str) -> Result<bool, StoreError> {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(&epoch_id) else {
            return Ok(false);
        };
        let removed = bucket.remove(key).is_some();
        if bucket.is_empty() {
            buckets.remove(&epoch_id);
        }
        Ok(removed)
    }

    async fn exists(&self, epoch_id: EpochId, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .buckets
            .read()
            .get(&epoch_id)
            .is_some_and(|bucket| bucket.contains_key(key)))
    }

    async fn purge_epoch(&self, epoch_id: EpochId) -> Result<(), StoreError> {
        if let Some(bucket) = self.buckets.write().remove(&epoch_id) {
            tracing::debug!(epoch_id, entries = bucket.len(), "Purged ephemeral bucket");
        }
        Ok(())
    }

    async fn list_epoch_ids_with_data(&self) -> Result<Vec<EpochId>, StoreError> {
        let mut ids: Vec<EpochId> = self.buckets.read().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn purge_is_scoped_and_idempotent() {
        let store = MemoryEphemeralStore::new();
        store.set(1, "a", b"one".to_vec()).await.unwrap();
        store.set(2, "a", b"two".to_vec()).await.unwrap();

        store.purge_epoch(1).await.unwrap();
        store.purge_epoch(1).await.unwrap();

        assert_eq!(store.get(1, "a").await.unwrap(), None);
        assert_eq!(store.get(2, "a").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.list_epoch_ids_with_data().await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn concurrent_purges_do_not_interfere() {
        let store = MemoryEphemeralStore::new();
        for id in 1..=4 {
            store.set(id, "a", vec![1]).await.unwrap();
            store.set(id, "b", vec![2]).await.unwrap();
        }

        let (first, second, again) = tokio::join!(
            store.purge_epoch(1),
            store.purge_epoch(2),
            store.purge_epoch(1),
        );
        first.unwrap();
        second.unwrap();
        again.unwrap();

        assert_eq!(store.list_epoch_ids_with_data().await.unwrap(), vec![3, 4]);
        assert_eq!(store.entry_count(3), 2);
    }

    #[tokio::test]
    async fn deleting_last_key_drops_the_bucket() {
        let store = MemoryEphemeralStore::new();
        store.set(5, "k", vec![1]).await.unwrap();
        assert!(store.exists(5, "k").await.unwrap());
        assert!(store.delete(5, "k").await.unwrap());
        assert!(!store.delete(5, "k").await.unwrap());
        assert_eq!(store.entry_count(5), 0);
        assert!(store.list_epoch_ids_with_data().await.unwrap().is_empty());
    }
}
