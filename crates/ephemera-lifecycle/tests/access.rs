//! Guarded ephemeral access and presence operations.

#![allow(clippy::unwrap_used)]

mod common;

use assert_matches::assert_matches;
use common::{Harness, QUORUM};
use ephemera_core::{
    ActorAddress, EpochEvent, LifecycleEvent, Phase, Presence, PresenceError, PresenceState,
};
use ephemera_lifecycle::{LifecycleConfig, LifecycleError};
use ephemera_testkit::{wait_for, TraceEntry};
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3_600);

fn actor(name: &str) -> ActorAddress {
    ActorAddress::new(name)
}

#[tokio::test(start_paused = true)]
async fn access_waits_for_startup_cleanup() {
    let h = Harness::new(LifecycleConfig::default());
    let epoch = h.active_epoch(1, HOUR);
    h.coordinator.activate_epoch(epoch).await.unwrap();

    assert_matches!(
        h.coordinator.put_ephemeral(1, "k", b"v".to_vec()).await,
        Err(LifecycleError::ReconciliationPending)
    );
    assert_matches!(
        h.coordinator.get_ephemeral(1, "k").await,
        Err(LifecycleError::ReconciliationPending)
    );

    h.coordinator.perform_startup_cleanup().await.unwrap();

    h.coordinator
        .put_ephemeral(1, "k", b"v".to_vec())
        .await
        .unwrap();
    assert_eq!(
        h.coordinator.get_ephemeral(1, "k").await.unwrap(),
        Some(b"v".to_vec())
    );
    assert!(h.coordinator.has_ephemeral(1, "k").await.unwrap());
    assert!(h.coordinator.delete_ephemeral(1, "k").await.unwrap());
    assert!(!h.coordinator.has_ephemeral(1, "k").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn access_is_refused_outside_the_active_phase() {
    let h = Harness::for_testing();
    let active = h.active_epoch(2, HOUR);
    let scheduled = h.scheduled_epoch(3, HOUR, HOUR);
    h.coordinator.activate_epoch(scheduled).await.unwrap();
    h.coordinator.activate_epoch(active).await.unwrap();

    assert_matches!(
        h.coordinator.put_ephemeral(3, "k", vec![1]).await,
        Err(LifecycleError::EpochNotActive {
            epoch_id: 3,
            phase: Phase::Scheduled
        })
    );
    assert_matches!(
        h.coordinator.get_ephemeral(99, "k").await,
        Err(LifecycleError::NotMonitoring(99))
    );

    h.coordinator.put_ephemeral(2, "k", vec![1]).await.unwrap();
    h.epochs.emit(2, EpochEvent::Closed);
    assert!(wait_for(|| h.trace.count(&TraceEntry::Purged(2)) == 1).await);

    assert!(!h.store.has_data(2));
    assert_matches!(
        h.coordinator.get_ephemeral(2, "k").await,
        Err(LifecycleError::EpochNotActive {
            epoch_id: 2,
            phase: Phase::Closed
        })
    );
    assert_matches!(
        h.coordinator.put_ephemeral(2, "k", vec![2]).await,
        Err(LifecycleError::EpochNotActive { .. })
    );
    assert!(!h.store.has_data(2));
}

#[tokio::test(start_paused = true)]
async fn presence_reaches_quorum() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(4, HOUR);
    h.coordinator.activate_epoch(epoch).await.unwrap();

    let before = h.coordinator.permissions(4).await.unwrap();
    assert!(before.declare_presence);
    assert!(!before.discover);

    let presence = h.coordinator.declare_presence(4, actor("alice")).await.unwrap();
    assert_eq!(presence.state, PresenceState::Declared);
    assert_eq!(
        h.trace.count(&TraceEntry::Event(LifecycleEvent::PresenceUpdated {
            epoch_id: 4,
            presence: presence.clone(),
        })),
        1
    );

    let after = h.coordinator.permissions(4).await.unwrap();
    assert!(!after.declare_presence);
    assert!(after.discover);
    assert!(after.capture_media);

    assert_matches!(
        h.coordinator.declare_presence(4, actor("alice")).await,
        Err(LifecycleError::Presence(PresenceError::InvalidTransition { .. }))
    );

    let voted = h.coordinator.record_validation(4, actor("bob")).await.unwrap();
    assert_eq!(voted.validation_count, 1);
    let progress = h.coordinator.quorum_progress(4).await.unwrap();
    assert_eq!(progress.quorum_size, QUORUM);
    assert_eq!(progress.votes_needed, 1);
    assert!(!progress.is_met());

    assert_matches!(
        h.coordinator.record_validation(4, actor("bob")).await,
        Err(LifecycleError::Presence(PresenceError::DuplicateVote { .. }))
    );

    let validated = h
        .coordinator
        .record_validation(4, actor("carol"))
        .await
        .unwrap();
    assert_eq!(validated.state, PresenceState::Validated);
    assert!(h.coordinator.quorum_progress(4).await.unwrap().is_met());
    assert_eq!(
        h.coordinator.current_monitor_state().unwrap().presence,
        Some(validated)
    );
}

#[tokio::test(start_paused = true)]
async fn presence_operations_respect_phase_and_ownership() {
    let h = Harness::for_testing();
    let scheduled = h.scheduled_epoch(5, HOUR, HOUR);
    let active = h.active_epoch(6, HOUR);
    h.coordinator.activate_epoch(scheduled).await.unwrap();
    h.coordinator.activate_epoch(active).await.unwrap();

    assert_matches!(
        h.coordinator.declare_presence(5, actor("alice")).await,
        Err(LifecycleError::EpochNotActive {
            phase: Phase::Scheduled,
            ..
        })
    );
    assert_matches!(
        h.coordinator.record_validation(6, actor("bob")).await,
        Err(LifecycleError::NoPresence(6))
    );
    assert_matches!(
        h.coordinator
            .update_presence(Presence::new(5, actor("alice")), 6),
        Err(LifecycleError::EpochMismatch {
            expected: 6,
            actual: 5
        })
    );
    assert_matches!(
        h.coordinator
            .update_presence(Presence::new(42, actor("alice")), 42),
        Err(LifecycleError::NotMonitoring(42))
    );

    let remote = Presence::declared(6, actor("alice"), h.clock.now());
    h.presence.insert(remote.clone());
    let refreshed = h
        .coordinator
        .refresh_presence(6, &actor("alice"))
        .await
        .unwrap();
    assert_eq!(refreshed, Some(remote.clone()));
    assert_eq!(h.coordinator.monitor_state(6).unwrap().presence, Some(remote));
    assert_eq!(
        h.coordinator
            .refresh_presence(6, &actor("nobody"))
            .await
            .unwrap(),
        None
    );
}

#[tokio::test(start_paused = true)]
async fn nothing_is_permitted_once_closed() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(7, HOUR);
    h.coordinator.activate_epoch(epoch).await.unwrap();
    h.coordinator
        .declare_presence(7, actor("alice"))
        .await
        .unwrap();

    h.epochs.emit(7, EpochEvent::Closed);
    assert!(wait_for(|| h.trace.count(&TraceEntry::Purged(7)) == 1).await);

    let permissions = h.coordinator.permissions(7).await.unwrap();
    assert_eq!(permissions.phase, Some(Phase::Closed));
    assert!(!permissions.discover);
    assert!(!permissions.message);
    assert!(!permissions.ephemeral_data);
    assert_matches!(
        h.coordinator.declare_presence(7, actor("bob")).await,
        Err(LifecycleError::EpochNotActive { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn presence_source_failures_surface_as_errors() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(8, HOUR);
    h.coordinator.activate_epoch(epoch).await.unwrap();
    h.presence.set_failing(true);

    let err = h
        .coordinator
        .declare_presence(8, actor("alice"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_matches!(err, LifecycleError::Source(_));
    assert!(h.coordinator.is_monitoring(8));
}
