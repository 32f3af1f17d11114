//! Collaborator error types.

use crate::epoch::EpochId;

/// Failure reported by the epoch or presence source.
///
/// Every variant is a transient-remote failure from the lifecycle's point of
/// view; callers resolve it by assuming the epoch has closed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The source does not know this epoch
    #[error("Epoch {0} not found")]
    NotFound(EpochId),
    /// The source could not be reached
    #[error("Source unavailable: {reason}")]
    Unavailable {
        /// Failure description
        reason: String,
    },
    /// Event subscription could not be established
    #[error("Subscription failed: {reason}")]
    Subscription {
        /// Failure description
        reason: String,
    },
}

impl SourceError {
    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a subscription error
    pub fn subscription(reason: impl Into<String>) -> Self {
        Self::Subscription {
            reason: reason.into(),
        }
    }

    /// Whether the epoch is known not to exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Failure reported by the ephemeral store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend operation failed
    #[error("Ephemeral store backend error: {reason}")]
    Backend {
        /// Failure description
        reason: String,
    },
}

impl StoreError {
    /// Create a backend error
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}
