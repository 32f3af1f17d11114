//! Ephemera Testing Infrastructure
//!
//! Scripted collaborators for driving the lifecycle coordinator in tests.
//!
//! # Usage
//!
//! Add this to your crate's `Cargo.toml` dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! ephemera-testkit = { path = "../ephemera-testkit" }
//! ```
//!
//! The sources, store and observer share a [`TraceLog`] so a test can assert
//! on the interleaving of purges and notifications:
//!
//! ```rust,ignore
//! let trace = TraceLog::new();
//! let store = Arc::new(RecordingStore::new(trace.clone()));
//! let observer = RecordingObserver::new(trace.clone());
//! // ... drive the coordinator
//! assert_eq!(trace.entries(), vec![TraceEntry::Purged(1), TraceEntry::Event(LifecycleEvent::Closed(1))]);
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod logging;
pub mod observers;
pub mod sources;
pub mod store;
pub mod time;

pub use logging::init_test_tracing;
pub use observers::{RecordingObserver, TraceEntry, TraceLog};
pub use sources::{MockEpochSource, MockPresenceSource};
pub use store::RecordingStore;
pub use time::TokioClock;

use ephemera_core::{Capability, Epoch, EpochId, PhysicalTime};
use std::time::Duration;

/// Epoch whose active window is `[start, start + length)`.
pub fn epoch_at(id: EpochId, start: PhysicalTime, length: Duration) -> Epoch {
    Epoch::new(
        id,
        start,
        start.saturating_add(length),
        Capability::PresenceWithEphemeralData,
    )
}

/// Poll `condition` every 5ms of tokio time, giving up after 10s.
///
/// Under a paused runtime each poll lets spawned tasks run and advances the
/// clock by 5ms.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..2_000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
