//! Observer Registry
//!
//! Fans lifecycle events out to subscribers without owning them. Entries hold
//! `Weak` references keyed by the subscriber's allocation, so subscribers can
//! be dropped independently of the coordinator. Dead entries are pruned
//! lazily on each fan-out pass.
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::Mutex` for the entry list because:
//! 1. Operations are O(n) scans over a short list
//! 2. Lock is never held across `.await` points
//! 3. Callbacks run after the lock is released, so an observer may add or
//!    remove observers from inside a callback

use ephemera_core::{EpochId, EpochObserver, LifecycleEvent, Presence};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

/// Stable handle for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

struct ObserverEntry {
    id: ObserverId,
    key: usize,
    observer: Weak<dyn EpochObserver>,
}

fn observer_key<O: ?Sized>(observer: &Arc<O>) -> usize {
    Arc::as_ptr(observer) as *const () as usize
}

/// Weak-reference publish/subscribe registry.
#[derive(Default)]
pub struct ObserverRegistry {
    entries: Mutex<Vec<ObserverEntry>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Registering the same observer again returns the
    /// existing id.
    pub fn add_observer<O>(&self, observer: &Arc<O>) -> ObserverId
    where
        O: EpochObserver + 'static,
    {
        let key = observer_key(observer);
        let mut entries = self.entries.lock();

        if let Some(existing) = entries
            .iter()
            .find(|entry| entry.key == key && entry.observer.strong_count() > 0)
        {
            return existing.id;
        }
        // Same address but dead: the allocation was reused.
        entries.retain(|entry| entry.key != key);

        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let strong: Arc<dyn EpochObserver> = observer.clone();
        entries.push(ObserverEntry {
            id,
            key,
            observer: Arc::downgrade(&strong),
        });
        tracing::debug!(observer = %id, "Observer registered");
        id
    }

    /// Unregister an observer. Returns whether it was registered.
    pub fn remove_observer<O>(&self, observer: &Arc<O>) -> bool
    where
        O: EpochObserver + ?Sized,
    {
        let key = observer_key(observer);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.key != key);
        before != entries.len()
    }

    /// Unregister by id. Returns whether it was registered.
    pub fn remove_by_id(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        before != entries.len()
    }

    /// Number of entries, including dead ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of observers still alive.
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.observer.strong_count() > 0)
            .count()
    }

    /// Deliver an event to every live observer, pruning dead entries.
    pub fn notify(&self, event: &LifecycleEvent) {
        let live: Vec<Arc<dyn EpochObserver>> = {
            let mut entries = self.entries.lock();
            let mut live = Vec::with_capacity(entries.len());
            entries.retain(|entry| match entry.observer.upgrade() {
                Some(observer) => {
                    live.push(observer);
                    true
                }
                None => false,
            });
            live
        };

        for observer in live {
            observer.dispatch(event);
        }
    }

    /// Notify `on_activated`.
    pub fn notify_activated(&self, epoch_id: EpochId) {
        self.notify(&LifecycleEvent::Activated(epoch_id));
    }

    /// Notify `on_closed`.
    pub fn notify_closed(&self, epoch_id: EpochId) {
        self.notify(&LifecycleEvent::Closed(epoch_id));
    }

    /// Notify `on_finalized`.
    pub fn notify_finalized(&self, epoch_id: EpochId) {
        self.notify(&LifecycleEvent::Finalized(epoch_id));
    }

    /// Notify `on_timer_tick`.
    pub fn notify_timer_tick(&self, epoch_id: EpochId, remaining: Duration) {
        self.notify(&LifecycleEvent::TimerTick {
            epoch_id,
            remaining,
        });
    }

    /// Notify `on_presence_updated`.
    pub fn notify_presence_updated(&self, presence: &Presence, epoch_id: EpochId) {
        self.notify(&LifecycleEvent::PresenceUpdated {
            epoch_id,
            presence: presence.clone(),
        });
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

/// Observer that forwards every event into an unbounded channel.
///
/// Keep the returned `Arc` alive for as long as events should be delivered.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
    include_ticks: bool,
}

impl ChannelObserver {
    /// Observer forwarding every event, including timer ticks.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LifecycleEvent>) {
        Self::build(true)
    }

    /// Observer forwarding everything except timer ticks.
    pub fn without_ticks() -> (Arc<Self>, mpsc::UnboundedReceiver<LifecycleEvent>) {
        Self::build(false)
    }

    fn build(include_ticks: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, include_ticks }), rx)
    }

    fn forward(&self, event: LifecycleEvent) {
        if event.is_tick() && !self.include_ticks {
            return;
        }
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl EpochObserver for ChannelObserver {
    fn on_activated(&self, epoch_id: EpochId) {
        self.forward(LifecycleEvent::Activated(epoch_id));
    }

    fn on_closed(&self, epoch_id: EpochId) {
        self.forward(LifecycleEvent::Closed(epoch_id));
    }

    fn on_finalized(&self, epoch_id: EpochId) {
        self.forward(LifecycleEvent::Finalized(epoch_id));
    }

    fn on_timer_tick(&self, epoch_id: EpochId, remaining: Duration) {
        self.forward(LifecycleEvent::TimerTick {
            epoch_id,
            remaining,
        });
    }

    fn on_presence_updated(&self, presence: &Presence, epoch_id: EpochId) {
        self.forward(LifecycleEvent::PresenceUpdated {
            epoch_id,
            presence: presence.clone(),
        });
    }
}
