//! Ephemera Lifecycle: epoch monitoring and purge-on-exit coordination
//!
//! This crate runs the time-bounded session lifecycle on top of the types and
//! collaborator traits in `ephemera-core`:
//!
//! - [`LifecycleCoordinator`]: activates and deactivates epoch monitors,
//!   reconciles stale data at startup, gates ephemeral data access and
//!   forwards presence operations
//! - Epoch monitors: one timer task and one event task per epoch, purging
//!   ephemeral data before any observer hears that the epoch closed
//! - [`ObserverRegistry`]: weak-reference fan-out of lifecycle events
//! - [`LifecycleConfig`]: tick cadence and startup policy, loadable from TOML
//! - [`MemoryEphemeralStore`] and [`SystemTimeHandler`]: default in-process
//!   implementations of the storage and clock traits
//!
//! # Example
//!
//! ```ignore
//! let coordinator = LifecycleCoordinator::with_system_time(
//!     LifecycleConfig::default(),
//!     epochs,
//!     presence,
//!     Arc::new(MemoryEphemeralStore::new()),
//! )?;
//! coordinator.perform_startup_cleanup().await?;
//! coordinator.add_observer(&observer);
//! coordinator.activate_epoch(epoch).await?;
//! ```

#![forbid(unsafe_code)]

pub mod cleanup;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod monitor;
pub mod observers;
pub mod store;
pub mod time;

mod tasks;

pub use cleanup::CleanupReport;
pub use config::LifecycleConfig;
pub use coordinator::{Activation, LifecycleCoordinator};
pub use errors::{LifecycleError, Result};
pub use monitor::{EpochMonitorState, MonitorStatus};
pub use observers::{ChannelObserver, ObserverId, ObserverRegistry};
pub use store::MemoryEphemeralStore;
pub use time::SystemTimeHandler;

pub use ephemera_core;
