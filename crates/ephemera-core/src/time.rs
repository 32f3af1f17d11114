//! Physical time types and the clock effect trait.
//!
//! Epoch boundaries are wall-clock instants in milliseconds since the Unix
//! epoch. All lifecycle code reads "now" through [`PhysicalTimeEffects`] so
//! that tests can drive the clock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Wall-clock instant in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PhysicalTime {
    /// Milliseconds since the Unix epoch
    pub ts_ms: u64,
}

impl PhysicalTime {
    /// Create a timestamp from milliseconds since the Unix epoch.
    pub const fn from_millis(ts_ms: u64) -> Self {
        Self { ts_ms }
    }

    /// Timestamp shifted forward by `duration`, saturating at `u64::MAX`.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let delta = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self::from_millis(self.ts_ms.saturating_add(delta))
    }

    /// Timestamp shifted backward by `duration`, saturating at zero.
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let delta = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self::from_millis(self.ts_ms.saturating_sub(delta))
    }

    /// Time left until `later`, or zero if `later` is not in the future.
    pub fn duration_until(self, later: PhysicalTime) -> Duration {
        Duration::from_millis(later.ts_ms.saturating_sub(self.ts_ms))
    }
}

impl fmt::Display for PhysicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.ts_ms)
    }
}

/// Error type for time operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// Clock is not available
    #[error("Time service unavailable")]
    ServiceUnavailable,
    /// Clock read or sleep failed
    #[error("Operation failed: {reason}")]
    OperationFailed {
        /// Failure description
        reason: String,
    },
}

/// Wall-clock access and sleeping.
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Current wall-clock time.
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError>;

    /// Suspend for `ms` milliseconds.
    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError>;
}
