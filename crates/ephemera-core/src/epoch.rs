//! Epoch snapshots as returned by the epoch source.

use crate::capability::Capability;
use crate::phase::{compute_phase, Phase};
use crate::time::PhysicalTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Epoch identifier.
pub type EpochId = u64;

/// Snapshot of a time-boxed group session.
///
/// Phase is derived from these fields and the current time; see
/// [`Epoch::phase`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Epoch identifier
    pub id: EpochId,
    /// Start of the active window (inclusive)
    pub start_time: PhysicalTime,
    /// End of the active window (exclusive)
    pub end_time: PhysicalTime,
    /// Finalized epochs are immutable
    pub finalized: bool,
    /// Whether the epoch source knows this epoch
    pub exists: bool,
    /// Feature tier
    pub capability: Capability,
    /// Current number of participants
    pub participant_count: u64,
}

impl Epoch {
    /// Create an existing, unfinalized epoch.
    pub fn new(
        id: EpochId,
        start_time: PhysicalTime,
        end_time: PhysicalTime,
        capability: Capability,
    ) -> Self {
        Self {
            id,
            start_time,
            end_time,
            finalized: false,
            exists: true,
            capability,
            participant_count: 0,
        }
    }

    /// Placeholder for an epoch the source does not know.
    pub fn missing(id: EpochId) -> Self {
        Self {
            id,
            start_time: PhysicalTime::default(),
            end_time: PhysicalTime::default(),
            finalized: false,
            exists: false,
            capability: Capability::PresenceOnly,
            participant_count: 0,
        }
    }

    /// Set the participant count.
    pub fn with_participant_count(mut self, participant_count: u64) -> Self {
        self.participant_count = participant_count;
        self
    }

    /// Mark as finalized.
    pub fn finalized(mut self) -> Self {
        self.finalized = true;
        self
    }

    /// Phase at `now`.
    pub fn phase(&self, now: PhysicalTime) -> Phase {
        compute_phase(
            self.exists,
            self.finalized,
            self.start_time,
            self.end_time,
            now,
        )
    }

    /// Next timestamp at which the derived phase changes on its own.
    ///
    /// `Closed -> Finalized` is decided by the source, not by time, so there
    /// is no boundary once the epoch has ended.
    pub fn next_boundary(&self, now: PhysicalTime) -> Option<PhysicalTime> {
        match self.phase(now) {
            Phase::Scheduled => Some(self.start_time),
            Phase::Active => Some(self.end_time),
            Phase::None | Phase::Closed | Phase::Finalized => None,
        }
    }

    /// Time left until [`Epoch::next_boundary`].
    pub fn time_until_next_phase(&self, now: PhysicalTime) -> Option<Duration> {
        self.next_boundary(now)
            .map(|boundary| now.duration_until(boundary))
    }

    /// Whether ephemeral data may exist for this epoch at `now`.
    ///
    /// Depends on phase only; capability gates individual features.
    pub fn supports_ephemeral_data(&self, now: PhysicalTime) -> bool {
        self.phase(now).permits_ephemeral_data()
    }

    /// Length of the active window.
    pub fn duration(&self) -> Duration {
        self.start_time.duration_until(self.end_time)
    }
}
