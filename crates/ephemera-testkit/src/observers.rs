//! Recording observer and shared trace log.

use ephemera_core::{EpochId, EpochObserver, LifecycleEvent, Presence};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One recorded side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEntry {
    /// The store purged an epoch
    Purged(EpochId),
    /// An observer received an event
    Event(LifecycleEvent),
}

/// Ordered log shared between recording collaborators.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    entries: Arc<Mutex<Vec<TraceEntry>>>,
}

impl TraceLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&self, entry: TraceEntry) {
        self.entries.lock().push(entry);
    }

    /// Every entry in order.
    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries.lock().clone()
    }

    /// Entries excluding timer ticks.
    pub fn without_ticks(&self) -> Vec<TraceEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| !matches!(entry, TraceEntry::Event(event) if event.is_tick()))
            .cloned()
            .collect()
    }

    /// Events received by observers, ticks included.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                TraceEntry::Event(event) => Some(event.clone()),
                TraceEntry::Purged(_) => None,
            })
            .collect()
    }

    /// Timer ticks received for an epoch.
    pub fn ticks(&self, epoch_id: EpochId) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::TimerTick {
                    epoch_id: id,
                    remaining,
                } if id == epoch_id => Some(remaining),
                _ => None,
            })
            .collect()
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &TraceEntry) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &TraceEntry) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Observer appending every callback to a [`TraceLog`].
#[derive(Debug)]
pub struct RecordingObserver {
    log: TraceLog,
}

impl RecordingObserver {
    /// Observer writing into `log`. Keep the `Arc` alive while recording.
    pub fn new(log: TraceLog) -> Arc<Self> {
        Arc::new(Self { log })
    }

    fn record(&self, event: LifecycleEvent) {
        self.log.push(TraceEntry::Event(event));
    }
}

impl EpochObserver for RecordingObserver {
    fn on_activated(&self, epoch_id: EpochId) {
        self.record(LifecycleEvent::Activated(epoch_id));
    }

    fn on_closed(&self, epoch_id: EpochId) {
        self.record(LifecycleEvent::Closed(epoch_id));
    }

    fn on_finalized(&self, epoch_id: EpochId) {
        self.record(LifecycleEvent::Finalized(epoch_id));
    }

    fn on_timer_tick(&self, epoch_id: EpochId, remaining: Duration) {
        self.record(LifecycleEvent::TimerTick {
            epoch_id,
            remaining,
        });
    }

    fn on_presence_updated(&self, presence: &Presence, epoch_id: EpochId) {
        self.record(LifecycleEvent::PresenceUpdated {
            epoch_id,
            presence: presence.clone(),
        });
    }
}
