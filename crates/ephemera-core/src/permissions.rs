//! Feature gating: epoch phase x capability x presence state.
//!
//! Every predicate requires the epoch to be `Active`. Viewing media has no
//! grace window after the epoch closes.

use crate::capability::Feature;
use crate::epoch::Epoch;
use crate::phase::Phase;
use crate::presence::{Presence, PresenceState};
use crate::time::PhysicalTime;
use serde::{Deserialize, Serialize};

fn feature_allowed(
    feature: Feature,
    presence: Option<&Presence>,
    epoch: &Epoch,
    now: PhysicalTime,
) -> bool {
    epoch.phase(now) == Phase::Active
        && epoch.capability.supports(feature)
        && presence.is_some_and(Presence::can_interact)
}

/// Whether `presence` may discover other participants in `epoch`.
pub fn can_discover(presence: &Presence, epoch: &Epoch, now: PhysicalTime) -> bool {
    feature_allowed(Feature::Discovery, Some(presence), epoch, now)
}

/// Whether `presence` may message other participants in `epoch`.
pub fn can_message(presence: &Presence, epoch: &Epoch, now: PhysicalTime) -> bool {
    feature_allowed(Feature::Messaging, Some(presence), epoch, now)
}

/// Whether `presence` may capture ephemeral media in `epoch`.
pub fn can_capture_media(presence: &Presence, epoch: &Epoch, now: PhysicalTime) -> bool {
    feature_allowed(Feature::Media, Some(presence), epoch, now)
}

/// Whether `presence` may view ephemeral media in `epoch`.
pub fn can_view_media(presence: &Presence, epoch: &Epoch, now: PhysicalTime) -> bool {
    feature_allowed(Feature::Media, Some(presence), epoch, now)
}

/// Effective permissions for one participant at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochPermissions {
    /// Phase the permissions were computed for
    pub phase: Option<Phase>,
    /// A presence may be declared
    pub declare_presence: bool,
    /// Other participants may be discovered
    pub discover: bool,
    /// Other participants may be messaged
    pub message: bool,
    /// Shared state may be synchronized
    pub sync_state: bool,
    /// Ephemeral media may be captured
    pub capture_media: bool,
    /// Ephemeral media may be viewed
    pub view_media: bool,
    /// Ephemeral data may be read or written
    pub ephemeral_data: bool,
}

impl EpochPermissions {
    /// Evaluate permissions for `presence` (if any) in `epoch` at `now`.
    pub fn evaluate(epoch: &Epoch, presence: Option<&Presence>, now: PhysicalTime) -> Self {
        let phase = epoch.phase(now);
        let active = phase == Phase::Active;
        let undeclared = presence.map_or(true, |p| p.state == PresenceState::None);
        Self {
            phase: Some(phase),
            declare_presence: active && epoch.capability.supports(Feature::Presence) && undeclared,
            discover: feature_allowed(Feature::Discovery, presence, epoch, now),
            message: feature_allowed(Feature::Messaging, presence, epoch, now),
            sync_state: feature_allowed(Feature::StateSync, presence, epoch, now),
            capture_media: feature_allowed(Feature::Media, presence, epoch, now),
            view_media: feature_allowed(Feature::Media, presence, epoch, now),
            ephemeral_data: active,
        }
    }

    /// Nothing permitted.
    pub fn none() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::presence::{ActorAddress, PresenceState};

    fn epoch(capability: Capability) -> Epoch {
        Epoch::new(
            1,
            PhysicalTime::from_millis(100),
            PhysicalTime::from_millis(200),
            capability,
        )
    }

    fn presence(state: PresenceState) -> Presence {
        let mut p = Presence::new(1, ActorAddress::new("alice"));
        p.state = state;
        p
    }

    const DURING: PhysicalTime = PhysicalTime::from_millis(150);
    const AFTER: PhysicalTime = PhysicalTime::from_millis(200);

    #[test]
    fn signals_tier_allows_messaging_but_not_media() {
        let e = epoch(Capability::PresenceWithSignals);
        let p = presence(PresenceState::Declared);
        assert!(can_discover(&p, &e, DURING));
        assert!(can_message(&p, &e, DURING));
        assert!(!can_capture_media(&p, &e, DURING));
        assert!(!can_view_media(&p, &e, DURING));
    }

    #[test]
    fn nothing_after_close() {
        let e = epoch(Capability::PresenceWithEphemeralData);
        let p = presence(PresenceState::Validated);
        assert!(can_view_media(&p, &e, DURING));
        assert!(!can_view_media(&p, &e, AFTER));
        assert!(!can_message(&p, &e, AFTER));
        assert_eq!(
            EpochPermissions::evaluate(&e, Some(&p), AFTER),
            EpochPermissions {
                phase: Some(Phase::Closed),
                ..EpochPermissions::none()
            }
        );
    }

    #[test]
    fn slashed_presence_cannot_interact() {
        let e = epoch(Capability::PresenceWithEphemeralData);
        let p = presence(PresenceState::Slashed);
        let perms = EpochPermissions::evaluate(&e, Some(&p), DURING);
        assert!(!perms.discover && !perms.message && !perms.capture_media);
        assert!(!perms.declare_presence);
        assert!(perms.ephemeral_data);
    }

    #[test]
    fn declaration_only_without_existing_claim() {
        let e = epoch(Capability::PresenceOnly);
        assert!(EpochPermissions::evaluate(&e, None, DURING).declare_presence);
        let p = presence(PresenceState::Declared);
        let perms = EpochPermissions::evaluate(&e, Some(&p), DURING);
        assert!(!perms.declare_presence);
        assert!(!perms.discover);
    }
}
