//! Lifecycle Coordinator
//!
//! Owns the epoch monitors, the observer registry and the collaborators they
//! share. The coordinator is the only place monitors are created or removed;
//! activations and deactivations are serialized through one async lock, while
//! phase transitions inside a running monitor are serialized by that
//! monitor's own control lock.
//!
//! Ephemeral data is only reachable through the guarded accessors, which
//! refuse access outside the active phase and, when configured, before
//! startup cleanup has run.

use crate::cleanup::{self, CleanupReport};
use crate::config::LifecycleConfig;
use crate::errors::{LifecycleError, Result};
use crate::monitor::{
    EpochMonitor, EpochMonitorState, MonitorContext, MonitorRegistry, MonitorStatus, Transition,
};
use crate::observers::{ObserverId, ObserverRegistry};
use crate::time::SystemTimeHandler;
use ephemera_core::{
    ActorAddress, EphemeralStore, Epoch, EpochId, EpochObserver, EpochPermissions, EpochSource,
    Phase, PhysicalTimeEffects, Presence, PresenceError, PresenceSource, PresenceState,
    QuorumProgress,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of [`LifecycleCoordinator::activate_epoch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// A monitor was started; the epoch was in `phase`
    Monitoring {
        /// Phase at activation
        phase: Phase,
    },
    /// The epoch was already monitored; it is now the current epoch
    AlreadyMonitoring,
    /// The epoch could not be monitored and its data was purged
    Purged {
        /// Phase the epoch was treated as
        phase: Phase,
    },
}

/// Coordinates monitors, observers and purging for all epochs.
pub struct LifecycleCoordinator {
    ctx: Arc<MonitorContext>,
    presence: Arc<dyn PresenceSource>,
    lifecycle: tokio::sync::Mutex<()>,
    reconciled: AtomicBool,
}

impl LifecycleCoordinator {
    /// Create a coordinator. Fails if `config` is invalid.
    pub fn new(
        config: LifecycleConfig,
        epochs: Arc<dyn EpochSource>,
        presence: Arc<dyn PresenceSource>,
        store: Arc<dyn EphemeralStore>,
        time: Arc<dyn PhysicalTimeEffects>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(MonitorContext {
                config,
                epochs,
                store,
                time,
                observers: ObserverRegistry::new(),
                registry: Mutex::new(MonitorRegistry::default()),
            }),
            presence,
            lifecycle: tokio::sync::Mutex::new(()),
            reconciled: AtomicBool::new(false),
        })
    }

    /// Create a coordinator driven by the system clock.
    pub fn with_system_time(
        config: LifecycleConfig,
        epochs: Arc<dyn EpochSource>,
        presence: Arc<dyn PresenceSource>,
        store: Arc<dyn EphemeralStore>,
    ) -> Result<Self> {
        Self::new(config, epochs, presence, store, Arc::new(SystemTimeHandler::new()))
    }

    /// Active configuration
    pub fn config(&self) -> &LifecycleConfig {
        &self.ctx.config
    }

    /// Observer registry
    pub fn observers(&self) -> &ObserverRegistry {
        &self.ctx.observers
    }

    /// Register an observer. The coordinator holds it weakly.
    pub fn add_observer<O>(&self, observer: &Arc<O>) -> ObserverId
    where
        O: EpochObserver + 'static,
    {
        self.ctx.observers.add_observer(observer)
    }

    /// Unregister an observer.
    pub fn remove_observer<O>(&self, observer: &Arc<O>) -> bool
    where
        O: EpochObserver + ?Sized,
    {
        self.ctx.observers.remove_observer(observer)
    }

    // ------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------

    /// Start monitoring `epoch` and make it the current epoch.
    ///
    /// A finalized or unknown epoch is purged and not monitored. If the event
    /// subscription cannot be opened the epoch is treated as closed: its data
    /// is purged, observers are told it closed, and no monitor is kept. A
    /// closed epoch is monitored until finalization, with its data purged
    /// immediately.
    pub async fn activate_epoch(&self, epoch: Epoch) -> Result<Activation> {
        let _lifecycle = self.lifecycle.lock().await;
        let epoch_id = epoch.id;

        if let Some(monitor) = self.ctx.monitor(epoch_id) {
            monitor.update_snapshot(|s| {
                s.participant_count = epoch.participant_count;
                s.epoch = epoch;
            });
            self.ctx.registry.lock().current = Some(epoch_id);
            tracing::debug!(epoch_id, "Epoch already monitored");
            return Ok(Activation::AlreadyMonitoring);
        }

        let now = self.ctx.time.physical_time().await?;
        let phase = epoch.phase(now);
        if matches!(phase, Phase::None | Phase::Finalized) {
            self.ctx.store.purge_epoch(epoch_id).await?;
            tracing::info!(epoch_id, %phase, "Epoch not monitorable, data purged");
            return Ok(Activation::Purged { phase });
        }

        let events = match self.ctx.epochs.subscribe_epoch_events(epoch_id).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(
                    epoch_id,
                    error = %e,
                    "Event subscription failed, treating epoch as closed"
                );
                self.ctx.store.purge_epoch(epoch_id).await?;
                self.ctx.observers.notify_closed(epoch_id);
                return Ok(Activation::Purged {
                    phase: Phase::Closed,
                });
            }
        };

        let monitor = EpochMonitor::new(epoch, phase.min(Phase::Active), now);
        {
            let mut registry = self.ctx.registry.lock();
            registry.monitors.insert(epoch_id, Arc::clone(&monitor));
            registry.current = Some(epoch_id);
        }
        tracing::info!(epoch_id, %phase, "Epoch monitor activated");

        if phase == Phase::Active {
            self.ctx.observers.notify_activated(epoch_id);
        }
        monitor.start(Arc::clone(&self.ctx), events).await;
        if phase == Phase::Closed {
            monitor
                .transition(&self.ctx, Transition::Phase(Phase::Closed))
                .await;
        }

        Ok(Activation::Monitoring { phase })
    }

    /// Stop monitoring an epoch. Emits no notifications and does not purge.
    ///
    /// Idempotent; returns whether a monitor was running.
    pub async fn deactivate_epoch(&self, epoch_id: EpochId) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let monitor = {
            let mut registry = self.ctx.registry.lock();
            if registry.current == Some(epoch_id) {
                registry.current = None;
            }
            registry.monitors.remove(&epoch_id)
        };

        match monitor {
            Some(monitor) => {
                monitor.shutdown(&self.ctx).await;
                tracing::info!(epoch_id, "Epoch monitor deactivated");
                true
            }
            None => {
                tracing::debug!(epoch_id, "Epoch not monitored, nothing to deactivate");
                false
            }
        }
    }

    /// Deactivate every monitor.
    pub async fn shutdown(&self) {
        for epoch_id in self.monitored_epoch_ids() {
            self.deactivate_epoch(epoch_id).await;
        }
        tracing::info!("Lifecycle coordinator shut down");
    }

    /// Purge ephemeral data for every epoch that is not currently active.
    ///
    /// Call once at startup before reading ephemeral data.
    pub async fn perform_startup_cleanup(&self) -> Result<CleanupReport> {
        let report = cleanup::reconcile(self.ctx.epochs.as_ref(), self.ctx.store.as_ref()).await?;
        self.reconciled.store(true, Ordering::Release);
        Ok(report)
    }

    /// Whether startup cleanup has completed.
    pub fn reconciliation_complete(&self) -> bool {
        self.reconciled.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Most recently activated epoch, if still monitored.
    pub fn current_epoch_id(&self) -> Option<EpochId> {
        self.ctx.registry.lock().current
    }

    /// State of the current epoch's monitor.
    pub fn current_monitor_state(&self) -> Option<EpochMonitorState> {
        let epoch_id = self.current_epoch_id()?;
        self.monitor_state(epoch_id)
    }

    /// State of an epoch's monitor.
    pub fn monitor_state(&self, epoch_id: EpochId) -> Option<EpochMonitorState> {
        self.ctx.monitor(epoch_id).map(|monitor| monitor.snapshot())
    }

    /// Task status of an epoch's monitor.
    pub async fn monitor_status(&self, epoch_id: EpochId) -> Option<MonitorStatus> {
        let monitor = self.ctx.monitor(epoch_id)?;
        Some(monitor.status().await)
    }

    /// Whether a monitor exists for the epoch. Stays true while the epoch is
    /// closed and awaiting finalization.
    pub fn is_monitoring(&self, epoch_id: EpochId) -> bool {
        self.ctx.registry.lock().monitors.contains_key(&epoch_id)
    }

    /// Every monitored epoch, in ascending order.
    pub fn monitored_epoch_ids(&self) -> Vec<EpochId> {
        let mut ids: Vec<EpochId> = self.ctx.registry.lock().monitors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Record a presence for a monitored epoch and notify observers.
    pub fn update_presence(&self, presence: Presence, epoch_id: EpochId) -> Result<()> {
        if presence.epoch_id != epoch_id {
            return Err(LifecycleError::EpochMismatch {
                expected: epoch_id,
                actual: presence.epoch_id,
            });
        }
        let monitor = self.monitor(epoch_id)?;
        monitor.update_snapshot(|s| s.presence = Some(presence.clone()));
        self.ctx
            .observers
            .notify_presence_updated(&presence, epoch_id);
        Ok(())
    }

    /// Declare `actor` present in an active epoch.
    pub async fn declare_presence(&self, epoch_id: EpochId, actor: ActorAddress) -> Result<Presence> {
        let monitor = self.monitor(epoch_id)?;
        let now = self.ctx.time.physical_time().await?;
        let observed = monitor.observed_phase().await;
        let state = monitor.snapshot();

        let existing = state.presence.as_ref().filter(|p| p.actor == actor);
        let permissions = EpochPermissions::evaluate(&state.epoch, existing, now);
        if observed != Phase::Active || permissions.phase != Some(Phase::Active) {
            let phase = if observed == Phase::Active {
                permissions.phase.unwrap_or(Phase::None)
            } else {
                observed
            };
            return Err(LifecycleError::not_active(epoch_id, phase));
        }
        if !permissions.declare_presence {
            return Err(PresenceError::InvalidTransition {
                from: existing.map_or(PresenceState::None, |p| p.state),
                action: "declare",
            }
            .into());
        }

        let presence = self.presence.declare_presence(epoch_id, &actor).await?;
        self.update_presence(presence.clone(), epoch_id)?;
        Ok(presence)
    }

    /// Re-read `actor`'s presence from the presence source.
    pub async fn refresh_presence(
        &self,
        epoch_id: EpochId,
        actor: &ActorAddress,
    ) -> Result<Option<Presence>> {
        self.monitor(epoch_id)?;
        let presence = self.presence.fetch_presence(epoch_id, actor).await?;
        if let Some(presence) = &presence {
            self.update_presence(presence.clone(), epoch_id)?;
        }
        Ok(presence)
    }

    /// Count a validation vote for the local presence.
    pub async fn record_validation(&self, epoch_id: EpochId, voter: ActorAddress) -> Result<Presence> {
        let monitor = self.monitor(epoch_id)?;
        let quorum_size = self.presence.fetch_quorum_size().await?;
        let now = self.ctx.time.physical_time().await?;

        let presence = monitor.update_snapshot(|s| -> Result<Presence> {
            let presence = s
                .presence
                .as_mut()
                .ok_or(LifecycleError::NoPresence(epoch_id))?;
            let state = presence.record_validation(voter, quorum_size, now)?;
            tracing::debug!(epoch_id, %state, votes = presence.validation_count, "Validation recorded");
            Ok(presence.clone())
        })?;

        self.ctx
            .observers
            .notify_presence_updated(&presence, epoch_id);
        Ok(presence)
    }

    /// Quorum progress of the local presence.
    pub async fn quorum_progress(&self, epoch_id: EpochId) -> Result<QuorumProgress> {
        let monitor = self.monitor(epoch_id)?;
        let quorum_size = self.presence.fetch_quorum_size().await?;
        let state = monitor.snapshot();
        let presence = state
            .presence
            .ok_or(LifecycleError::NoPresence(epoch_id))?;
        Ok(presence.quorum_progress(quorum_size))
    }

    /// Effective permissions of the local presence right now.
    pub async fn permissions(&self, epoch_id: EpochId) -> Result<EpochPermissions> {
        let monitor = self.monitor(epoch_id)?;
        let now = self.ctx.time.physical_time().await?;
        let observed = monitor.observed_phase().await;
        let state = monitor.snapshot();

        if observed >= Phase::Closed {
            return Ok(EpochPermissions {
                phase: Some(observed),
                ..EpochPermissions::none()
            });
        }
        Ok(EpochPermissions::evaluate(
            &state.epoch,
            state.presence.as_ref(),
            now,
        ))
    }

    // ------------------------------------------------------------------
    // Guarded ephemeral access
    // ------------------------------------------------------------------

    /// Write ephemeral data for an active epoch.
    pub async fn put_ephemeral(&self, epoch_id: EpochId, key: &str, value: Vec<u8>) -> Result<()> {
        let monitor = self.guarded_monitor(epoch_id)?;
        let now = self.ctx.time.physical_time().await?;
        let _active = monitor
            .lock_active(now)
            .await
            .map_err(|phase| LifecycleError::not_active(epoch_id, phase))?;
        self.ctx.store.set(epoch_id, key, value).await?;
        Ok(())
    }

    /// Read ephemeral data for an active epoch.
    pub async fn get_ephemeral(&self, epoch_id: EpochId, key: &str) -> Result<Option<Vec<u8>>> {
        let monitor = self.guarded_monitor(epoch_id)?;
        let now = self.ctx.time.physical_time().await?;
        let _active = monitor
            .lock_active(now)
            .await
            .map_err(|phase| LifecycleError::not_active(epoch_id, phase))?;
        Ok(self.ctx.store.get(epoch_id, key).await?)
    }

    /// Delete ephemeral data for an active epoch.
    pub async fn delete_ephemeral(&self, epoch_id: EpochId, key: &str) -> Result<bool> {
        let monitor = self.guarded_monitor(epoch_id)?;
        let now = self.ctx.time.physical_time().await?;
        let _active = monitor
            .lock_active(now)
            .await
            .map_err(|phase| LifecycleError::not_active(epoch_id, phase))?;
        Ok(self.ctx.store.delete(epoch_id, key).await?)
    }

    /// Whether ephemeral data exists for an active epoch.
    pub async fn has_ephemeral(&self, epoch_id: EpochId, key: &str) -> Result<bool> {
        let monitor = self.guarded_monitor(epoch_id)?;
        let now = self.ctx.time.physical_time().await?;
        let _active = monitor
            .lock_active(now)
            .await
            .map_err(|phase| LifecycleError::not_active(epoch_id, phase))?;
        Ok(self.ctx.store.exists(epoch_id, key).await?)
    }

    fn monitor(&self, epoch_id: EpochId) -> Result<Arc<EpochMonitor>> {
        self.ctx
            .monitor(epoch_id)
            .ok_or(LifecycleError::NotMonitoring(epoch_id))
    }

    fn guarded_monitor(&self, epoch_id: EpochId) -> Result<Arc<EpochMonitor>> {
        if self.ctx.config.require_startup_cleanup && !self.reconciliation_complete() {
            return Err(LifecycleError::ReconciliationPending);
        }
        self.monitor(epoch_id)
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("config", &self.ctx.config)
            .field("monitored", &self.monitored_epoch_ids())
            .field("current", &self.current_epoch_id())
            .field("reconciled", &self.reconciliation_complete())
            .finish()
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        let monitors: Vec<Arc<EpochMonitor>> = {
            let mut registry = self.ctx.registry.lock();
            registry.current = None;
            registry.monitors.drain().map(|(_, monitor)| monitor).collect()
        };
        for monitor in monitors {
            monitor.abort();
        }
    }
}
