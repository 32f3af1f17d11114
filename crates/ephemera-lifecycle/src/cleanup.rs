//! Startup reconciliation.
//!
//! Ephemeral data can outlive a crash. On startup every epoch that still has
//! data is checked against the epoch source, and anything not provably active
//! is purged. A failed lookup counts as not active.

use ephemera_core::{EphemeralStore, EpochId, EpochSource, Phase, StoreError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

/// Outcome of a startup cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Epochs that had ephemeral data
    pub inspected: Vec<EpochId>,
    /// Epochs whose data was purged
    pub purged: Vec<EpochId>,
    /// Epochs confirmed active and left alone
    pub retained: Vec<EpochId>,
    /// Epochs whose purge failed, with the error
    pub failed: Vec<(EpochId, String)>,
}

impl CleanupReport {
    /// Whether every stale epoch was purged.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Retained,
    Purged,
    Failed(String),
}

async fn reconcile_one(
    epochs: &dyn EpochSource,
    store: &dyn EphemeralStore,
    epoch_id: EpochId,
) -> Outcome {
    match epochs.fetch_epoch_phase(epoch_id).await {
        Ok(Phase::Active) => return Outcome::Retained,
        Ok(phase) => {
            tracing::debug!(epoch_id, %phase, "Stale ephemeral data found");
        }
        Err(e) => {
            tracing::warn!(epoch_id, error = %e, "Phase lookup failed, purging");
        }
    }

    match store.purge_epoch(epoch_id).await {
        Ok(()) => Outcome::Purged,
        Err(e) => {
            tracing::error!(epoch_id, error = %e, "Startup purge failed");
            Outcome::Failed(e.to_string())
        }
    }
}

/// Purge data for every epoch that is not currently active.
///
/// Fails only when the store cannot list its epochs.
pub(crate) async fn reconcile(
    epochs: &dyn EpochSource,
    store: &dyn EphemeralStore,
) -> Result<CleanupReport, StoreError> {
    let mut inspected = store.list_epoch_ids_with_data().await?;
    inspected.sort_unstable();
    inspected.dedup();

    let outcomes = join_all(
        inspected
            .iter()
            .map(|&epoch_id| reconcile_one(epochs, store, epoch_id)),
    )
    .await;

    let mut report = CleanupReport {
        inspected: inspected.clone(),
        ..CleanupReport::default()
    };
    for (epoch_id, outcome) in inspected.into_iter().zip(outcomes) {
        match outcome {
            Outcome::Retained => report.retained.push(epoch_id),
            Outcome::Purged => report.purged.push(epoch_id),
            Outcome::Failed(reason) => report.failed.push((epoch_id, reason)),
        }
    }

    tracing::info!(
        inspected = report.inspected.len(),
        purged = report.purged.len(),
        retained = report.retained.len(),
        failed = report.failed.len(),
        "Startup cleanup complete"
    );
    Ok(report)
}
