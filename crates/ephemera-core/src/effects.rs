//! Collaborator interfaces.
//!
//! The lifecycle treats the epoch source as an opaque remote authority, the
//! presence source as the quorum oracle, and the ephemeral store as dumb
//! epoch-scoped storage. Purging on phase exit is the lifecycle's job, not
//! the store's.

use crate::epoch::{Epoch, EpochId};
use crate::errors::{SourceError, StoreError};
use crate::phase::Phase;
use crate::presence::{ActorAddress, Presence};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Message on an epoch's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochEvent {
    /// The authority moved the epoch to a new phase
    PhaseChanged(Phase),
    /// Participant count changed
    ParticipantCountChanged(u64),
    /// Authority-side countdown update
    TimerTick(Duration),
    /// Epoch closed
    Closed,
    /// Epoch finalized
    Finalized,
    /// Recoverable error on the authority side
    Error(String),
}

/// Stream of events for one epoch.
pub type EpochEventStream = BoxStream<'static, EpochEvent>;

/// Remote authority for epoch snapshots and events.
#[async_trait]
pub trait EpochSource: Send + Sync {
    /// Current snapshot of an epoch.
    async fn fetch_epoch(&self, epoch_id: EpochId) -> Result<Epoch, SourceError>;

    /// Current phase of an epoch.
    async fn fetch_epoch_phase(&self, epoch_id: EpochId) -> Result<Phase, SourceError>;

    /// Subscribe to an epoch's events.
    async fn subscribe_epoch_events(
        &self,
        epoch_id: EpochId,
    ) -> Result<EpochEventStream, SourceError>;

    /// Drop the subscription for an epoch.
    async fn unsubscribe(&self, epoch_id: EpochId) -> Result<(), SourceError>;
}

/// Source of presence records and quorum size.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    /// Presence of `actor` in an epoch, if any.
    async fn fetch_presence(
        &self,
        epoch_id: EpochId,
        actor: &ActorAddress,
    ) -> Result<Option<Presence>, SourceError>;

    /// Declare presence of `actor` in an epoch.
    async fn declare_presence(
        &self,
        epoch_id: EpochId,
        actor: &ActorAddress,
    ) -> Result<Presence, SourceError>;

    /// Votes required to validate a presence.
    async fn fetch_quorum_size(&self) -> Result<u64, SourceError>;
}

/// Key/value storage scoped by epoch.
///
/// `purge_epoch` must be idempotent and safe to call concurrently for
/// distinct epochs.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Read a value.
    async fn get(&self, epoch_id: EpochId, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value.
    async fn set(&self, epoch_id: EpochId, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete a value. Returns whether it existed.
    async fn delete(&self, epoch_id: EpochId, key: &str) -> Result<bool, StoreError>;

    /// Whether a value exists.
    async fn exists(&self, epoch_id: EpochId, key: &str) -> Result<bool, StoreError>;

    /// Remove every entry for an epoch.
    async fn purge_epoch(&self, epoch_id: EpochId) -> Result<(), StoreError>;

    /// Epochs that currently hold at least one entry.
    async fn list_epoch_ids_with_data(&self) -> Result<Vec<EpochId>, StoreError>;
}
