//! Epoch phase state machine.
//!
//! The phase is never stored. It is derived from an epoch's timestamps and
//! flags every time it is needed, so "phase" and "timestamps" cannot drift.

use crate::time::PhysicalTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an epoch in its lifecycle.
///
/// Variants are declared in lifecycle order; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Epoch does not exist
    None,
    /// Epoch exists but has not started
    Scheduled,
    /// Epoch is running; the only phase that permits ephemeral data
    Active,
    /// Epoch has ended but is not yet finalized
    Closed,
    /// Epoch is finalized and immutable
    Finalized,
}

impl Phase {
    /// Only `Finalized` is terminal.
    pub fn is_terminal(self) -> bool {
        self == Phase::Finalized
    }

    /// Whether ephemeral data may be created or read in this phase.
    pub fn permits_ephemeral_data(self) -> bool {
        self == Phase::Active
    }

    /// Whether data held for an epoch in this phase must be purged.
    pub fn requires_purge(self) -> bool {
        !self.permits_ephemeral_data()
    }

    /// Short lowercase name, used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::None => "none",
            Phase::Scheduled => "scheduled",
            Phase::Active => "active",
            Phase::Closed => "closed",
            Phase::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the phase of an epoch.
///
/// Intervals are half-open: `now == start_time` is `Active` and
/// `now == end_time` is `Closed`. `exists` takes precedence over
/// `finalized`, which takes precedence over the timestamps.
pub fn compute_phase(
    exists: bool,
    finalized: bool,
    start_time: PhysicalTime,
    end_time: PhysicalTime,
    now: PhysicalTime,
) -> Phase {
    if !exists {
        Phase::None
    } else if finalized {
        Phase::Finalized
    } else if now < start_time {
        Phase::Scheduled
    } else if now < end_time {
        Phase::Active
    } else {
        Phase::Closed
    }
}
