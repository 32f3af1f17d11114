//! Countdown behavior under a paused tokio clock.

#![allow(clippy::unwrap_used)]

mod common;

use common::Harness;
use ephemera_core::{LifecycleEvent, Phase};
use ephemera_lifecycle::Activation;
use ephemera_testkit::{wait_for, TraceEntry};
use std::time::Duration;

fn event(event: LifecycleEvent) -> TraceEntry {
    TraceEntry::Event(event)
}

#[tokio::test(start_paused = true)]
async fn countdown_closes_then_finalizes() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(1, Duration::from_secs(8));
    h.store.seed(1, "media", b"frame");
    h.coordinator.activate_epoch(epoch).await.unwrap();

    tokio::time::sleep(Duration::from_secs(9)).await;

    assert_eq!(
        h.trace.without_ticks(),
        vec![
            event(LifecycleEvent::Activated(1)),
            TraceEntry::Purged(1),
            event(LifecycleEvent::Closed(1)),
        ]
    );
    assert!(!h.store.has_data(1));
    assert!(h.coordinator.is_monitoring(1));

    let ticks = h.trace.ticks(1);
    assert_eq!(ticks.first(), Some(&Duration::from_secs(8)));
    // Coarse sleep lands exactly on the fine window.
    assert!(ticks.contains(&Duration::from_secs(5)));
    assert!(ticks.windows(2).all(|pair| pair[0] > pair[1]));
    assert!(*ticks.last().unwrap() <= Duration::from_millis(100));
    let fine = ticks
        .iter()
        .filter(|remaining| **remaining <= Duration::from_secs(5))
        .count();
    assert!(fine >= 50);

    h.epochs.finalize(1);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!h.coordinator.is_monitoring(1));
    assert_eq!(h.epochs.unsubscribe_count(1), 1);
    assert_eq!(
        h.trace.without_ticks(),
        vec![
            event(LifecycleEvent::Activated(1)),
            TraceEntry::Purged(1),
            event(LifecycleEvent::Closed(1)),
            TraceEntry::Purged(1),
            event(LifecycleEvent::Finalized(1)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn scheduled_epoch_activates_at_its_start() {
    let h = Harness::for_testing();
    let epoch = h.scheduled_epoch(2, Duration::from_secs(2), Duration::from_secs(3_600));

    let activation = h.coordinator.activate_epoch(epoch).await.unwrap();
    assert_eq!(
        activation,
        Activation::Monitoring {
            phase: Phase::Scheduled
        }
    );
    assert!(!h.coordinator.monitor_state(2).unwrap().is_active);

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(
        h.trace.without_ticks(),
        vec![event(LifecycleEvent::Activated(2))]
    );
    let state = h.coordinator.monitor_state(2).unwrap();
    assert!(state.is_active);
    assert!(state.time_remaining > Duration::from_secs(3_500));
}

#[tokio::test(start_paused = true)]
async fn unreachable_source_at_boundary_fails_safe() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(3, Duration::from_secs(2));
    h.store.seed(3, "k", b"v");
    h.coordinator.activate_epoch(epoch).await.unwrap();
    h.epochs.fail_fetches(3, true);

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(!h.coordinator.is_monitoring(3));
    assert!(!h.store.has_data(3));
    assert_eq!(h.epochs.unsubscribe_count(3), 1);
    assert_eq!(
        h.trace.without_ticks(),
        vec![
            event(LifecycleEvent::Activated(3)),
            TraceEntry::Purged(3),
            event(LifecycleEvent::Closed(3)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn clock_failure_fails_safe() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(4, Duration::from_secs(3_600));
    h.coordinator.activate_epoch(epoch).await.unwrap();
    h.clock.set_failing(true);

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!h.coordinator.is_monitoring(4));
    assert_eq!(
        h.trace.without_ticks(),
        vec![
            event(LifecycleEvent::Activated(4)),
            TraceEntry::Purged(4),
            event(LifecycleEvent::Closed(4)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn coarse_ticks_far_from_the_boundary() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(5, Duration::from_secs(60));
    h.coordinator.activate_epoch(epoch).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20_500)).await;

    assert_eq!(
        h.trace.ticks(5),
        vec![
            Duration::from_secs(60),
            Duration::from_secs(55),
            Duration::from_secs(50),
            Duration::from_secs(45),
            Duration::from_secs(40),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn sleep_failure_fails_safe_without_spinning() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(6, Duration::from_secs(10_000));
    h.store.seed(6, "k", b"v");
    h.clock.set_sleep_failing(true);
    h.coordinator.activate_epoch(epoch).await.unwrap();

    assert!(wait_for(|| !h.coordinator.is_monitoring(6)).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(h.trace.ticks(6).len() <= 1);
    assert!(!h.store.has_data(6));
    assert_eq!(
        h.trace.without_ticks(),
        vec![
            event(LifecycleEvent::Activated(6)),
            TraceEntry::Purged(6),
            event(LifecycleEvent::Closed(6)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn timer_keeps_working_after_the_event_stream_ends() {
    let h = Harness::for_testing();
    let epoch = h.active_epoch(7, Duration::from_secs(2));
    h.coordinator.activate_epoch(epoch).await.unwrap();
    assert!(h.epochs.is_subscribed(7));

    h.epochs.end_stream(7);
    assert!(!h.epochs.is_subscribed(7));
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.trace.count(&event(LifecycleEvent::Closed(7))), 1);
    assert!(h.coordinator.is_monitoring(7));

    // The source forgets the epoch while it awaits finalization.
    h.epochs.remove(7);
    assert!(wait_for(|| !h.coordinator.is_monitoring(7)).await);
    assert_eq!(
        h.trace.without_ticks(),
        vec![
            event(LifecycleEvent::Activated(7)),
            TraceEntry::Purged(7),
            event(LifecycleEvent::Closed(7)),
            TraceEntry::Purged(7),
        ]
    );
}
