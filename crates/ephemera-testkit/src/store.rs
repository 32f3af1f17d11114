//! Ephemeral store that records purges.

use crate::observers::{TraceEntry, TraceLog};
use async_trait::async_trait;
use ephemera_core::{EphemeralStore, EpochId, StoreError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct StoreState {
    buckets: BTreeMap<EpochId, HashMap<String, Vec<u8>>>,
    /// Remaining purge failures per epoch
    purge_failures: HashMap<EpochId, usize>,
    fail_listing: bool,
}

/// In-memory store that logs each successful purge to a [`TraceLog`].
#[derive(Debug, Default)]
pub struct RecordingStore {
    state: Mutex<StoreState>,
    log: TraceLog,
}

impl RecordingStore {
    /// Store writing purges into `log`.
    pub fn new(log: TraceLog) -> Self {
        Self {
            state: Mutex::default(),
            log,
        }
    }

    /// Seed a value directly, bypassing any lifecycle guard.
    pub fn seed(&self, epoch_id: EpochId, key: &str, value: &[u8]) {
        self.state
            .lock()
            .buckets
            .entry(epoch_id)
            .or_default()
            .insert(key.to_string(), value.to_vec());
    }

    /// Whether any data is held for the epoch.
    pub fn has_data(&self, epoch_id: EpochId) -> bool {
        self.state
            .lock()
            .buckets
            .get(&epoch_id)
            .is_some_and(|bucket| !bucket.is_empty())
    }

    /// Fail the next `times` purges of the epoch.
    pub fn fail_purges(&self, epoch_id: EpochId, times: usize) {
        self.state.lock().purge_failures.insert(epoch_id, times);
    }

    /// Make listing fail until reset.
    pub fn fail_listing(&self, failing: bool) {
        self.state.lock().fail_listing = failing;
    }

    /// Number of successful purges of the epoch.
    pub fn purge_count(&self, epoch_id: EpochId) -> usize {
        self.log.count(&TraceEntry::Purged(epoch_id))
    }
}

#[async_trait]
impl EphemeralStore for RecordingStore {
    async fn get(&self, epoch_id: EpochId, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .state
            .lock()
            .buckets
            .get(&epoch_id)
            .and_then(|bucket| bucket.get(key).cloned()))
    }

    async fn set(&self, epoch_id: EpochId, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.state
            .lock()
            .buckets
            .entry(epoch_id)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, epoch_id: EpochId, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .buckets
            .get_mut(&epoch_id)
            .is_some_and(|bucket| bucket.remove(key).is_some()))
    }

    async fn exists(&self, epoch_id: EpochId, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .buckets
            .get(&epoch_id)
            .is_some_and(|bucket| bucket.contains_key(key)))
    }

    async fn purge_epoch(&self, epoch_id: EpochId) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock();
            if let Some(remaining) = state.purge_failures.get_mut(&epoch_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::backend("injected purge failure"));
                }
            }
            state.buckets.remove(&epoch_id);
        }
        self.log.push(TraceEntry::Purged(epoch_id));
        Ok(())
    }

    async fn list_epoch_ids_with_data(&self) -> Result<Vec<EpochId>, StoreError> {
        let state = self.state.lock();
        if state.fail_listing {
            return Err(StoreError::backend("injected listing failure"));
        }
        Ok(state
            .buckets
            .iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }
}
