//! Epoch Monitor
//!
//! One monitor tracks one epoch through its phases. It runs two tasks:
//!
//! - a **timer task** that counts down to the next phase boundary, emitting
//!   ticks coarsely while the boundary is far and finely once it is near, and
//!   re-fetching the epoch when a boundary passes or while awaiting
//!   finalization
//! - an **event task** that drains the epoch source's event stream
//!
//! Both feed [`EpochMonitor::transition`], which holds the monitor's control
//! lock for the whole transition. That lock is the single serialization point
//! for phase changes of this epoch: purges, observer notifications and guarded
//! ephemeral writes never interleave.
//!
//! Leaving the active phase always purges first and notifies second. A failed
//! purge withholds the notification and schedules a retry.

use crate::config::LifecycleConfig;
use crate::observers::ObserverRegistry;
use crate::tasks::MonitorTasks;
use ephemera_core::{
    EphemeralStore, Epoch, EpochEvent, EpochEventStream, EpochId, EpochSource, Phase,
    PhysicalTime, PhysicalTimeEffects, Presence,
};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

/// Observable state of one monitored epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochMonitorState {
    /// Latest epoch snapshot
    pub epoch: Epoch,
    /// Local participant's presence, if known
    pub presence: Option<Presence>,
    /// Time until the next phase boundary
    pub time_remaining: Duration,
    /// Latest participant count
    pub participant_count: u64,
    /// Whether the monitor has seen the epoch become active and not yet close
    pub is_active: bool,
    /// Last error seen while monitoring
    pub error: Option<String>,
}

/// Monitor task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorStatus {
    /// Created, tasks not yet running
    Idle,
    /// Tasks running
    Monitoring,
    /// A close transition is in progress
    Transitioning,
    /// Stopped; no further notifications
    Terminated,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonitorStatus::Idle => "idle",
            MonitorStatus::Monitoring => "monitoring",
            MonitorStatus::Transitioning => "transitioning",
            MonitorStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Monitors by epoch plus the current-epoch pointer.
#[derive(Default)]
pub(crate) struct MonitorRegistry {
    pub(crate) monitors: HashMap<EpochId, Arc<EpochMonitor>>,
    pub(crate) current: Option<EpochId>,
}

/// Collaborators and shared state used by every monitor.
///
/// # Blocking Lock Usage
///
/// `registry` is a `parking_lot::Mutex`: map lookups and removals only,
/// never held across `.await`.
pub(crate) struct MonitorContext {
    pub(crate) config: LifecycleConfig,
    pub(crate) epochs: Arc<dyn EpochSource>,
    pub(crate) store: Arc<dyn EphemeralStore>,
    pub(crate) time: Arc<dyn PhysicalTimeEffects>,
    pub(crate) observers: ObserverRegistry,
    pub(crate) registry: Mutex<MonitorRegistry>,
}

impl MonitorContext {
    pub(crate) fn monitor(&self, epoch_id: EpochId) -> Option<Arc<EpochMonitor>> {
        self.registry.lock().monitors.get(&epoch_id).cloned()
    }

    /// Drop `monitor` from the registry if it is still the registered one.
    fn release(&self, monitor: &EpochMonitor) {
        let mut registry = self.registry.lock();
        let registered = registry
            .monitors
            .get(&monitor.epoch_id)
            .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), monitor));
        if registered {
            registry.monitors.remove(&monitor.epoch_id);
            if registry.current == Some(monitor.epoch_id) {
                registry.current = None;
            }
        }
    }
}

/// Input to a phase transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Phase reported by the source or derived from a fresh snapshot
    Phase(Phase),
    /// The source or clock could not be reached; treated as closed
    Unreachable(String),
}

/// What a task should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Purge failed; retry after the closed poll interval
    Backoff,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseKind {
    Closed,
    Finalized,
    Vanished,
    Unreachable,
}

#[derive(Debug)]
enum Step {
    /// Sleep, then re-evaluate
    Sleep(Duration),
    /// Sleep, then re-fetch the epoch
    PollAfter(Duration),
    /// Re-evaluate immediately
    Again,
    Stop,
}

pub(crate) struct MonitorControl {
    status: MonitorStatus,
    /// Highest phase acted on. Never decreases.
    observed: Phase,
    /// Close whose purge failed and must be retried
    pending_close: Option<CloseKind>,
}

/// Proof that the epoch was active when taken. Holding it blocks every
/// transition of the epoch, including its purge.
pub(crate) struct ActiveGuard<'a> {
    _control: AsyncMutexGuard<'a, MonitorControl>,
}

/// Per-epoch monitor.
pub(crate) struct EpochMonitor {
    epoch_id: EpochId,
    snapshot: RwLock<EpochMonitorState>,
    control: AsyncMutex<MonitorControl>,
    tasks: MonitorTasks,
}

impl EpochMonitor {
    /// Create an idle monitor. `observed` is the phase already acted on.
    pub(crate) fn new(epoch: Epoch, observed: Phase, now: PhysicalTime) -> Arc<Self> {
        let state = EpochMonitorState {
            time_remaining: epoch.time_until_next_phase(now).unwrap_or(Duration::ZERO),
            participant_count: epoch.participant_count,
            is_active: observed == Phase::Active && epoch.phase(now) == Phase::Active,
            presence: None,
            error: None,
            epoch,
        };
        Arc::new(Self {
            epoch_id: state.epoch.id,
            snapshot: RwLock::new(state),
            control: AsyncMutex::new(MonitorControl {
                status: MonitorStatus::Idle,
                observed,
                pending_close: None,
            }),
            tasks: MonitorTasks::new(),
        })
    }

    pub(crate) fn snapshot(&self) -> EpochMonitorState {
        self.snapshot.read().clone()
    }

    pub(crate) fn update_snapshot<R>(&self, f: impl FnOnce(&mut EpochMonitorState) -> R) -> R {
        f(&mut self.snapshot.write())
    }

    pub(crate) async fn status(&self) -> MonitorStatus {
        self.control.lock().await.status
    }

    pub(crate) async fn observed_phase(&self) -> Phase {
        self.control.lock().await.observed
    }

    /// Spawn the timer and event tasks.
    pub(crate) async fn start(self: &Arc<Self>, ctx: Arc<MonitorContext>, events: EpochEventStream) {
        {
            let mut control = self.control.lock().await;
            if control.status != MonitorStatus::Idle {
                return;
            }
            control.status = MonitorStatus::Monitoring;
        }

        let timer = {
            let monitor = Arc::clone(self);
            let ctx = Arc::clone(&ctx);
            let shutdown = self.tasks.subscribe();
            async move { monitor.run_timer(ctx, shutdown).await }
        };
        let drain = {
            let monitor = Arc::clone(self);
            let shutdown = self.tasks.subscribe();
            async move { monitor.run_events(ctx, events, shutdown).await }
        };
        self.tasks.spawn(timer);
        self.tasks.spawn(drain);

        tracing::debug!(epoch_id = self.epoch_id, "Epoch monitor started");
    }

    /// Stop from outside the monitor's own tasks. Waits for an in-flight
    /// transition, then aborts both tasks. Emits no notifications.
    pub(crate) async fn shutdown(&self, ctx: &MonitorContext) {
        self.tasks.cancel();
        {
            let mut control = self.control.lock().await;
            if control.status != MonitorStatus::Terminated {
                control.status = MonitorStatus::Terminated;
                if let Err(e) = ctx.epochs.unsubscribe(self.epoch_id).await {
                    tracing::debug!(epoch_id = self.epoch_id, error = %e, "Unsubscribe failed");
                }
            }
        }
        self.tasks.abort_and_join().await;
        tracing::debug!(epoch_id = self.epoch_id, "Epoch monitor shut down");
    }

    /// Abort both tasks without waiting. Used when the coordinator is dropped.
    pub(crate) fn abort(&self) {
        self.tasks.abort();
    }

    /// Lock the epoch's transitions if it is active at `now`.
    ///
    /// On refusal returns the phase that blocked access.
    pub(crate) async fn lock_active(&self, now: PhysicalTime) -> Result<ActiveGuard<'_>, Phase> {
        let control = self.control.lock().await;
        let local = self.snapshot.read().epoch.phase(now);
        if control.status == MonitorStatus::Terminated || self.tasks.is_cancelled() {
            return Err(control.observed.max(Phase::Closed));
        }
        if control.pending_close.is_some() {
            return Err(Phase::Closed);
        }
        if control.observed != Phase::Active {
            return Err(control.observed);
        }
        if local != Phase::Active {
            return Err(local);
        }
        Ok(ActiveGuard { _control: control })
    }

    /// Apply a transition. Holds the control lock throughout.
    pub(crate) async fn transition(&self, ctx: &MonitorContext, transition: Transition) -> Flow {
        let mut control = self.control.lock().await;
        if control.status == MonitorStatus::Terminated || self.tasks.is_cancelled() {
            return Flow::Stop;
        }

        match transition {
            Transition::Phase(Phase::None) => {
                tracing::warn!(epoch_id = self.epoch_id, "Epoch no longer exists");
                self.close(ctx, &mut control, CloseKind::Vanished).await
            }
            Transition::Unreachable(reason) => {
                tracing::warn!(
                    epoch_id = self.epoch_id,
                    reason = %reason,
                    "Epoch source unreachable, treating epoch as closed"
                );
                self.update_snapshot(|s| s.error = Some(reason));
                self.close(ctx, &mut control, CloseKind::Unreachable).await
            }
            // A close whose purge failed is retried whatever the source now reports.
            Transition::Phase(phase) if control.pending_close.is_some() => {
                let kind = match (phase, control.pending_close) {
                    (Phase::Finalized, _) => CloseKind::Finalized,
                    (_, Some(pending)) => pending,
                    (_, None) => CloseKind::Closed,
                };
                self.close(ctx, &mut control, kind).await
            }
            Transition::Phase(phase) if phase <= control.observed => Flow::Continue,
            Transition::Phase(Phase::Scheduled) => {
                control.observed = Phase::Scheduled;
                Flow::Continue
            }
            Transition::Phase(Phase::Active) => {
                control.observed = Phase::Active;
                self.update_snapshot(|s| s.is_active = true);
                tracing::info!(epoch_id = self.epoch_id, "Epoch active");
                ctx.observers.notify_activated(self.epoch_id);
                Flow::Continue
            }
            Transition::Phase(Phase::Closed) => {
                self.close(ctx, &mut control, CloseKind::Closed).await
            }
            Transition::Phase(Phase::Finalized) => {
                self.close(ctx, &mut control, CloseKind::Finalized).await
            }
        }
    }

    async fn close(&self, ctx: &MonitorContext, control: &mut MonitorControl, kind: CloseKind) -> Flow {
        control.status = MonitorStatus::Transitioning;

        if kind == CloseKind::Closed && control.observed == Phase::Active {
            if let Ok(now) = ctx.time.physical_time().await {
                if self.snapshot.read().epoch.phase(now) == Phase::Active {
                    tracing::warn!(
                        epoch_id = self.epoch_id,
                        "Epoch closed by source before its scheduled end"
                    );
                }
            }
        }

        self.update_snapshot(|s| {
            s.is_active = false;
            s.time_remaining = Duration::ZERO;
        });

        if let Err(e) = ctx.store.purge_epoch(self.epoch_id).await {
            tracing::error!(
                epoch_id = self.epoch_id,
                error = %e,
                "Ephemeral purge failed, withholding close notification"
            );
            self.update_snapshot(|s| s.error = Some(e.to_string()));
            control.pending_close = Some(kind);
            control.status = MonitorStatus::Monitoring;
            return Flow::Backoff;
        }
        control.pending_close = None;
        tracing::info!(epoch_id = self.epoch_id, ?kind, "Ephemeral data purged");

        if control.observed < Phase::Closed {
            control.observed = Phase::Closed;
            ctx.observers.notify_closed(self.epoch_id);
        }

        match kind {
            CloseKind::Closed => {
                control.status = MonitorStatus::Monitoring;
                Flow::Continue
            }
            CloseKind::Finalized => {
                control.observed = Phase::Finalized;
                ctx.observers.notify_finalized(self.epoch_id);
                self.terminate(ctx, control).await;
                Flow::Stop
            }
            CloseKind::Vanished | CloseKind::Unreachable => {
                self.terminate(ctx, control).await;
                Flow::Stop
            }
        }
    }

    async fn terminate(&self, ctx: &MonitorContext, control: &mut MonitorControl) {
        control.status = MonitorStatus::Terminated;
        self.tasks.cancel();
        ctx.release(self);
        if let Err(e) = ctx.epochs.unsubscribe(self.epoch_id).await {
            tracing::debug!(epoch_id = self.epoch_id, error = %e, "Unsubscribe failed");
        }
        tracing::info!(epoch_id = self.epoch_id, "Epoch monitor terminated");
    }

    async fn run_timer(self: Arc<Self>, ctx: Arc<MonitorContext>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let (wait, poll) = match self.next_step(&ctx).await {
                Step::Sleep(wait) => (wait, false),
                Step::PollAfter(wait) => (wait, true),
                Step::Again => continue,
                Step::Stop => break,
            };

            let ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX).max(1);
            tokio::select! {
                _ = shutdown.changed() => break,
                result = ctx.time.sleep_ms(ms) => {
                    if let Err(e) = result {
                        tracing::warn!(epoch_id = self.epoch_id, error = %e, "Monitor sleep failed");
                        let reason = format!("clock unavailable: {e}");
                        self.transition(&ctx, Transition::Unreachable(reason)).await;
                        break;
                    }
                }
            }

            if !poll {
                continue;
            }
            let cancelled = *shutdown.borrow();
            if cancelled || self.refetch(&ctx).await == Flow::Stop {
                break;
            }
        }
        tracing::debug!(epoch_id = self.epoch_id, "Timer task stopped");
    }

    async fn next_step(&self, ctx: &MonitorContext) -> Step {
        let now = match ctx.time.physical_time().await {
            Ok(now) => now,
            Err(e) => {
                let reason = format!("clock unavailable: {e}");
                return match self.transition(ctx, Transition::Unreachable(reason)).await {
                    Flow::Stop => Step::Stop,
                    _ => Step::Sleep(ctx.config.closed_poll_interval),
                };
            }
        };

        let (observed, retry_close) = {
            let control = self.control.lock().await;
            (control.observed, control.pending_close.is_some())
        };
        if retry_close || observed >= Phase::Closed {
            return Step::PollAfter(ctx.config.closed_poll_interval);
        }

        let epoch = self.snapshot.read().epoch.clone();
        if epoch.phase(now) > observed {
            return match self.refetch(ctx).await {
                Flow::Continue => Step::Again,
                Flow::Backoff => Step::PollAfter(ctx.config.closed_poll_interval),
                Flow::Stop => Step::Stop,
            };
        }

        let Some(remaining) = epoch.time_until_next_phase(now) else {
            return Step::PollAfter(ctx.config.closed_poll_interval);
        };
        if !self.emit_tick(ctx, remaining).await {
            return Step::Stop;
        }
        Step::Sleep(ctx.config.tick_interval_for(remaining))
    }

    async fn emit_tick(&self, ctx: &MonitorContext, remaining: Duration) -> bool {
        let control = self.control.lock().await;
        if control.status == MonitorStatus::Terminated || self.tasks.is_cancelled() {
            return false;
        }
        self.update_snapshot(|s| s.time_remaining = remaining);
        ctx.observers.notify_timer_tick(self.epoch_id, remaining);
        drop(control);
        true
    }

    /// Fetch a fresh snapshot and transition to the phase it implies.
    async fn refetch(&self, ctx: &MonitorContext) -> Flow {
        let transition = match ctx.epochs.fetch_epoch(self.epoch_id).await {
            Ok(epoch) => match ctx.time.physical_time().await {
                Ok(now) => {
                    let phase = epoch.phase(now);
                    self.update_snapshot(|s| {
                        s.participant_count = epoch.participant_count;
                        s.epoch = epoch;
                    });
                    Transition::Phase(phase)
                }
                Err(e) => Transition::Unreachable(format!("clock unavailable: {e}")),
            },
            Err(e) => Transition::Unreachable(e.to_string()),
        };
        self.transition(ctx, transition).await
    }

    async fn run_events(
        self: Arc<Self>,
        ctx: Arc<MonitorContext>,
        mut events: EpochEventStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                _ = shutdown.changed() => break,
                event = events.next() => event,
            };
            let Some(event) = event else {
                tracing::debug!(epoch_id = self.epoch_id, "Epoch event stream ended");
                break;
            };
            if self.handle_event(&ctx, event).await == Flow::Stop {
                break;
            }
        }
        tracing::debug!(epoch_id = self.epoch_id, "Event task stopped");
    }

    async fn handle_event(&self, ctx: &MonitorContext, event: EpochEvent) -> Flow {
        match event {
            EpochEvent::PhaseChanged(phase) => self.transition(ctx, Transition::Phase(phase)).await,
            EpochEvent::Closed => self.transition(ctx, Transition::Phase(Phase::Closed)).await,
            EpochEvent::Finalized => {
                self.transition(ctx, Transition::Phase(Phase::Finalized))
                    .await
            }
            EpochEvent::ParticipantCountChanged(count) => {
                self.update_snapshot(|s| {
                    s.participant_count = count;
                    s.epoch.participant_count = count;
                });
                Flow::Continue
            }
            EpochEvent::TimerTick(remaining) => {
                self.update_snapshot(|s| s.time_remaining = remaining);
                Flow::Continue
            }
            EpochEvent::Error(message) => {
                tracing::warn!(epoch_id = self.epoch_id, error = %message, "Epoch source reported an error");
                self.update_snapshot(|s| s.error = Some(message));
                Flow::Continue
            }
        }
    }
}

impl fmt::Debug for EpochMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochMonitor")
            .field("epoch_id", &self.epoch_id)
            .field("tasks", &self.tasks.task_count())
            .finish()
    }
}
