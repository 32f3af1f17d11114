//! Ephemera Core: epoch lifecycle types and collaborator interfaces
//!
//! This crate is the interface layer of the workspace. It holds:
//!
//! - **Value types**: [`Epoch`], the derived [`Phase`], the ordered
//!   [`Capability`] tier and the [`Presence`] claim
//! - **Pure predicates**: [`compute_phase`], the `can_*` permission checks,
//!   [`validation_progress`] and [`votes_needed`]
//! - **Collaborator traits**: [`EpochSource`], [`PresenceSource`],
//!   [`EphemeralStore`] and [`PhysicalTimeEffects`]
//! - **Notification surface**: [`EpochObserver`] and [`LifecycleEvent`]
//!
//! Nothing here spawns tasks or holds locks; the runtime lives in
//! `ephemera-lifecycle`.

#![forbid(unsafe_code)]

pub mod capability;
pub mod effects;
pub mod epoch;
pub mod errors;
pub mod observer;
pub mod permissions;
pub mod phase;
pub mod presence;
pub mod time;

pub use capability::{Capability, Feature, FeatureFlags};
pub use effects::{EphemeralStore, EpochEvent, EpochEventStream, EpochSource, PresenceSource};
pub use epoch::{Epoch, EpochId};
pub use errors::{SourceError, StoreError};
pub use observer::{EpochObserver, LifecycleEvent};
pub use permissions::{
    can_capture_media, can_discover, can_message, can_view_media, EpochPermissions,
};
pub use phase::{compute_phase, Phase};
pub use presence::{
    can_interact, validation_progress, votes_needed, ActorAddress, Presence, PresenceError,
    PresenceState, QuorumProgress,
};
pub use time::{PhysicalTime, PhysicalTimeEffects, TimeError};
