//! Scripted epoch and presence sources.
//!
//! Tests mutate the scripted state directly and push events into open
//! subscriptions with [`MockEpochSource::emit`].

use async_trait::async_trait;
use ephemera_core::{
    ActorAddress, Epoch, EpochEvent, EpochEventStream, EpochId, EpochSource, Phase, PhysicalTime,
    PhysicalTimeEffects, Presence, PresenceSource, SourceError,
};
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct EpochScript {
    epochs: HashMap<EpochId, Epoch>,
    phase_overrides: HashMap<EpochId, Phase>,
    failing_fetches: HashSet<EpochId>,
    failing_subscriptions: HashSet<EpochId>,
    senders: HashMap<EpochId, mpsc::UnboundedSender<EpochEvent>>,
    subscribe_calls: HashMap<EpochId, usize>,
    unsubscribe_calls: HashMap<EpochId, usize>,
}

/// Scriptable [`EpochSource`].
///
/// Unknown epochs are returned as [`Epoch::missing`]. `fetch_epoch_phase`
/// uses a phase override when one is set and otherwise derives the phase
/// from the attached clock.
pub struct MockEpochSource {
    script: Mutex<EpochScript>,
    clock: Option<Arc<dyn PhysicalTimeEffects>>,
}

impl MockEpochSource {
    /// Source without a clock; phases must be set with [`Self::set_phase`].
    pub fn new() -> Self {
        Self {
            script: Mutex::default(),
            clock: None,
        }
    }

    /// Source deriving phases from `clock`.
    pub fn with_clock(clock: Arc<dyn PhysicalTimeEffects>) -> Self {
        Self {
            script: Mutex::default(),
            clock: Some(clock),
        }
    }

    /// Add or replace an epoch.
    pub fn insert(&self, epoch: Epoch) {
        self.script.lock().epochs.insert(epoch.id, epoch);
    }

    /// Forget an epoch; later fetches report it missing.
    pub fn remove(&self, epoch_id: EpochId) {
        self.script.lock().epochs.remove(&epoch_id);
    }

    /// Mark an epoch finalized.
    pub fn finalize(&self, epoch_id: EpochId) {
        if let Some(epoch) = self.script.lock().epochs.get_mut(&epoch_id) {
            epoch.finalized = true;
        }
    }

    /// Pin the phase returned by `fetch_epoch_phase`.
    pub fn set_phase(&self, epoch_id: EpochId, phase: Phase) {
        self.script.lock().phase_overrides.insert(epoch_id, phase);
    }

    /// Make fetches for the epoch fail.
    pub fn fail_fetches(&self, epoch_id: EpochId, failing: bool) {
        let mut script = self.script.lock();
        if failing {
            script.failing_fetches.insert(epoch_id);
        } else {
            script.failing_fetches.remove(&epoch_id);
        }
    }

    /// Make subscriptions for the epoch fail.
    pub fn fail_subscriptions(&self, epoch_id: EpochId) {
        self.script.lock().failing_subscriptions.insert(epoch_id);
    }

    /// Push an event into the epoch's open subscription. Returns whether a
    /// subscriber received it.
    pub fn emit(&self, epoch_id: EpochId, event: EpochEvent) -> bool {
        self.script
            .lock()
            .senders
            .get(&epoch_id)
            .is_some_and(|tx| tx.unbounded_send(event).is_ok())
    }

    /// Close the epoch's event stream without unsubscribing.
    pub fn end_stream(&self, epoch_id: EpochId) {
        self.script.lock().senders.remove(&epoch_id);
    }

    /// Whether a subscription is open.
    pub fn is_subscribed(&self, epoch_id: EpochId) -> bool {
        self.script.lock().senders.contains_key(&epoch_id)
    }

    /// Calls to `subscribe_epoch_events` for the epoch.
    pub fn subscribe_count(&self, epoch_id: EpochId) -> usize {
        self.script
            .lock()
            .subscribe_calls
            .get(&epoch_id)
            .copied()
            .unwrap_or(0)
    }

    /// Calls to `unsubscribe` for the epoch.
    pub fn unsubscribe_count(&self, epoch_id: EpochId) -> usize {
        self.script
            .lock()
            .unsubscribe_calls
            .get(&epoch_id)
            .copied()
            .unwrap_or(0)
    }

    fn lookup(&self, epoch_id: EpochId) -> Result<Epoch, SourceError> {
        let script = self.script.lock();
        if script.failing_fetches.contains(&epoch_id) {
            return Err(SourceError::unavailable("injected fetch failure"));
        }
        Ok(script
            .epochs
            .get(&epoch_id)
            .cloned()
            .unwrap_or_else(|| Epoch::missing(epoch_id)))
    }
}

impl Default for MockEpochSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EpochSource for MockEpochSource {
    async fn fetch_epoch(&self, epoch_id: EpochId) -> Result<Epoch, SourceError> {
        self.lookup(epoch_id)
    }

    async fn fetch_epoch_phase(&self, epoch_id: EpochId) -> Result<Phase, SourceError> {
        let epoch = self.lookup(epoch_id)?;
        let pinned = self.script.lock().phase_overrides.get(&epoch_id).copied();
        if let Some(phase) = pinned {
            return Ok(phase);
        }
        let Some(clock) = &self.clock else {
            return Err(SourceError::unavailable("no phase scripted"));
        };
        let now = clock
            .physical_time()
            .await
            .map_err(|e| SourceError::unavailable(e.to_string()))?;
        Ok(epoch.phase(now))
    }

    async fn subscribe_epoch_events(
        &self,
        epoch_id: EpochId,
    ) -> Result<EpochEventStream, SourceError> {
        let mut script = self.script.lock();
        *script.subscribe_calls.entry(epoch_id).or_default() += 1;
        if script.failing_subscriptions.contains(&epoch_id) {
            return Err(SourceError::subscription("injected subscription failure"));
        }
        let (tx, rx) = mpsc::unbounded();
        script.senders.insert(epoch_id, tx);
        Ok(rx.boxed())
    }

    async fn unsubscribe(&self, epoch_id: EpochId) -> Result<(), SourceError> {
        let mut script = self.script.lock();
        *script.unsubscribe_calls.entry(epoch_id).or_default() += 1;
        script.senders.remove(&epoch_id);
        Ok(())
    }
}

#[derive(Default)]
struct PresenceScript {
    presences: HashMap<(EpochId, ActorAddress), Presence>,
    quorum_size: u64,
    failing: bool,
}

/// Scriptable [`PresenceSource`].
pub struct MockPresenceSource {
    script: Mutex<PresenceScript>,
    declared_at: PhysicalTime,
}

impl MockPresenceSource {
    /// Source requiring `quorum_size` votes. Declarations are stamped with
    /// `declared_at`.
    pub fn new(quorum_size: u64, declared_at: PhysicalTime) -> Self {
        Self {
            script: Mutex::new(PresenceScript {
                quorum_size,
                ..PresenceScript::default()
            }),
            declared_at,
        }
    }

    /// Add or replace a presence record.
    pub fn insert(&self, presence: Presence) {
        self.script
            .lock()
            .presences
            .insert((presence.epoch_id, presence.actor.clone()), presence);
    }

    /// Change the quorum size.
    pub fn set_quorum_size(&self, quorum_size: u64) {
        self.script.lock().quorum_size = quorum_size;
    }

    /// Make every call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.script.lock().failing = failing;
    }

    fn check(script: &PresenceScript) -> Result<(), SourceError> {
        if script.failing {
            return Err(SourceError::unavailable("injected presence failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PresenceSource for MockPresenceSource {
    async fn fetch_presence(
        &self,
        epoch_id: EpochId,
        actor: &ActorAddress,
    ) -> Result<Option<Presence>, SourceError> {
        let script = self.script.lock();
        Self::check(&script)?;
        Ok(script.presences.get(&(epoch_id, actor.clone())).cloned())
    }

    async fn declare_presence(
        &self,
        epoch_id: EpochId,
        actor: &ActorAddress,
    ) -> Result<Presence, SourceError> {
        let mut script = self.script.lock();
        Self::check(&script)?;
        let presence = Presence::declared(epoch_id, actor.clone(), self.declared_at);
        script
            .presences
            .insert((epoch_id, actor.clone()), presence.clone());
        Ok(presence)
    }

    async fn fetch_quorum_size(&self) -> Result<u64, SourceError> {
        let script = self.script.lock();
        Self::check(&script)?;
        Ok(script.quorum_size)
    }
}
