//! Lifecycle notification surface.

use crate::epoch::EpochId;
use crate::presence::Presence;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Notification fanned out by the coordinator.
///
/// `Closed` and `Finalized` are only ever emitted after the epoch's
/// ephemeral data has been purged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Epoch entered its active window
    Activated(EpochId),
    /// Epoch left its active window
    Closed(EpochId),
    /// Epoch was finalized
    Finalized(EpochId),
    /// Countdown to the next phase boundary
    TimerTick {
        /// Epoch
        epoch_id: EpochId,
        /// Time until the next boundary
        remaining: Duration,
    },
    /// Presence snapshot changed
    PresenceUpdated {
        /// Epoch
        epoch_id: EpochId,
        /// New presence
        presence: Presence,
    },
}

impl LifecycleEvent {
    /// Epoch the event refers to.
    pub fn epoch_id(&self) -> EpochId {
        match self {
            LifecycleEvent::Activated(id)
            | LifecycleEvent::Closed(id)
            | LifecycleEvent::Finalized(id) => *id,
            LifecycleEvent::TimerTick { epoch_id, .. }
            | LifecycleEvent::PresenceUpdated { epoch_id, .. } => *epoch_id,
        }
    }

    /// Whether this is a timer tick.
    pub fn is_tick(&self) -> bool {
        matches!(self, LifecycleEvent::TimerTick { .. })
    }
}

/// Receiver of lifecycle notifications.
///
/// All methods default to no-ops. Callbacks run on monitor tasks and must
/// not block.
pub trait EpochObserver: Send + Sync {
    /// Epoch became active.
    fn on_activated(&self, _epoch_id: EpochId) {}

    /// Epoch closed; its ephemeral data is already gone.
    fn on_closed(&self, _epoch_id: EpochId) {}

    /// Epoch finalized; its ephemeral data is already gone.
    fn on_finalized(&self, _epoch_id: EpochId) {}

    /// Countdown update.
    fn on_timer_tick(&self, _epoch_id: EpochId, _remaining: Duration) {}

    /// Presence changed.
    fn on_presence_updated(&self, _presence: &Presence, _epoch_id: EpochId) {}

    /// Route an event to the matching callback.
    fn dispatch(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Activated(id) => self.on_activated(*id),
            LifecycleEvent::Closed(id) => self.on_closed(*id),
            LifecycleEvent::Finalized(id) => self.on_finalized(*id),
            LifecycleEvent::TimerTick {
                epoch_id,
                remaining,
            } => self.on_timer_tick(*epoch_id, *remaining),
            LifecycleEvent::PresenceUpdated { epoch_id, presence } => {
                self.on_presence_updated(presence, *epoch_id)
            }
        }
    }
}
