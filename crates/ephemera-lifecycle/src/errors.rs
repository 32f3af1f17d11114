//! Lifecycle error types
//!
//! Transient-remote failures inside monitor tasks never surface here; they are
//! resolved by purging. These errors are returned to callers of the
//! coordinator's query, presence and guarded-store operations.

use ephemera_core::{EpochId, Phase, PresenceError, SourceError, StoreError, TimeError};
use thiserror::Error;

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors returned by the lifecycle coordinator
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No monitor exists for the epoch
    #[error("Epoch {0} is not being monitored")]
    NotMonitoring(EpochId),

    /// Operation requires the epoch to be active
    #[error("Epoch {epoch_id} is not active (phase: {phase})")]
    EpochNotActive {
        /// Epoch
        epoch_id: EpochId,
        /// Phase the epoch is in
        phase: Phase,
    },

    /// Startup reconciliation must finish before ephemeral data is read
    #[error("Startup cleanup has not completed")]
    ReconciliationPending,

    /// Presence does not belong to the epoch it was submitted for
    #[error("Presence belongs to epoch {actual}, expected {expected}")]
    EpochMismatch {
        /// Epoch the caller named
        expected: EpochId,
        /// Epoch on the presence record
        actual: EpochId,
    },

    /// No presence recorded for the epoch
    #[error("No presence recorded for epoch {0}")]
    NoPresence(EpochId),

    /// Presence transition failed
    #[error("Presence error: {0}")]
    Presence(#[from] PresenceError),

    /// Epoch or presence source failed
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Ephemeral store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Clock could not be read
    #[error("Time error: {0}")]
    Time(#[from] TimeError),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LifecycleError {
    /// Create an epoch-not-active error
    pub fn not_active(epoch_id: EpochId, phase: Phase) -> Self {
        LifecycleError::EpochNotActive { epoch_id, phase }
    }

    /// Whether the error came from a remote collaborator.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LifecycleError::Source(_) | LifecycleError::Store(_) | LifecycleError::Time(_)
        )
    }
}
