//! Shared fixture for lifecycle integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use ephemera_core::{Capability, Epoch, EpochId};
use ephemera_lifecycle::{LifecycleConfig, LifecycleCoordinator};
use ephemera_testkit::{
    init_test_tracing, MockEpochSource, MockPresenceSource, RecordingObserver, RecordingStore,
    TokioClock, TraceLog,
};
use std::sync::Arc;
use std::time::Duration;

/// 2024-01-01T00:00:00Z
pub const BASE_MS: u64 = 1_704_067_200_000;

/// Votes needed to validate a presence in these tests.
pub const QUORUM: u64 = 2;

pub struct Harness {
    pub clock: Arc<TokioClock>,
    pub epochs: Arc<MockEpochSource>,
    pub presence: Arc<MockPresenceSource>,
    pub store: Arc<RecordingStore>,
    pub trace: TraceLog,
    pub observer: Arc<RecordingObserver>,
    pub coordinator: LifecycleCoordinator,
}

impl Harness {
    /// Build inside a tokio runtime.
    pub fn new(config: LifecycleConfig) -> Self {
        init_test_tracing();
        let clock = Arc::new(TokioClock::new(BASE_MS));
        let epochs = Arc::new(MockEpochSource::with_clock(clock.clone()));
        let presence = Arc::new(MockPresenceSource::new(QUORUM, clock.now()));
        let trace = TraceLog::new();
        let store = Arc::new(RecordingStore::new(trace.clone()));
        let observer = RecordingObserver::new(trace.clone());

        let coordinator = LifecycleCoordinator::new(
            config,
            epochs.clone(),
            presence.clone(),
            store.clone(),
            clock.clone(),
        )
        .unwrap();
        coordinator.add_observer(&observer);

        Self {
            clock,
            epochs,
            presence,
            store,
            trace,
            observer,
            coordinator,
        }
    }

    pub fn for_testing() -> Self {
        Self::new(LifecycleConfig::for_testing())
    }

    /// Register an epoch that started a minute ago and ends after `remaining`.
    pub fn active_epoch(&self, id: EpochId, remaining: Duration) -> Epoch {
        let epoch = Epoch::new(
            id,
            self.clock.now().saturating_sub(Duration::from_secs(60)),
            self.clock.after(remaining),
            Capability::PresenceWithEphemeralData,
        );
        self.epochs.insert(epoch.clone());
        epoch
    }

    /// Register an epoch that starts after `delay` and lasts `length`.
    pub fn scheduled_epoch(&self, id: EpochId, delay: Duration, length: Duration) -> Epoch {
        let epoch = ephemera_testkit::epoch_at(id, self.clock.after(delay), length);
        self.epochs.insert(epoch.clone());
        epoch
    }

    /// Register an epoch whose window ended a minute ago.
    pub fn closed_epoch(&self, id: EpochId) -> Epoch {
        let now = self.clock.now();
        let epoch = Epoch::new(
            id,
            now.saturating_sub(Duration::from_secs(3_600)),
            now.saturating_sub(Duration::from_secs(60)),
            Capability::PresenceWithEphemeralData,
        );
        self.epochs.insert(epoch.clone());
        epoch
    }
}
