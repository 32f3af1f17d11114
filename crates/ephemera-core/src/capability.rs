//! Capability tiers and the features they gate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered feature tier an epoch supports.
///
/// Each tier enables a strict superset of the features of the tier below.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Capability {
    /// Attendance only
    #[default]
    PresenceOnly,
    /// Attendance plus discovery, messaging and state sync
    PresenceWithSignals,
    /// Everything, including ephemeral media
    PresenceWithEphemeralData,
}

impl Capability {
    /// All tiers, lowest first.
    pub const ALL: [Capability; 3] = [
        Capability::PresenceOnly,
        Capability::PresenceWithSignals,
        Capability::PresenceWithEphemeralData,
    ];

    /// Whether this tier includes `feature`.
    pub fn supports(self, feature: Feature) -> bool {
        self >= feature.minimum_capability()
    }

    /// Feature flags enabled by this tier.
    pub fn features(self) -> FeatureFlags {
        FeatureFlags {
            presence: self.supports(Feature::Presence),
            discovery: self.supports(Feature::Discovery),
            messaging: self.supports(Feature::Messaging),
            state_sync: self.supports(Feature::StateSync),
            media: self.supports(Feature::Media),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::PresenceOnly => "presence-only",
            Capability::PresenceWithSignals => "presence-with-signals",
            Capability::PresenceWithEphemeralData => "presence-with-ephemeral-data",
        };
        f.write_str(name)
    }
}

/// A gated feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Declaring and validating presence
    Presence,
    /// Discovering other participants
    Discovery,
    /// Messaging other participants
    Messaging,
    /// Shared state synchronization
    StateSync,
    /// Capturing and viewing ephemeral media
    Media,
}

impl Feature {
    /// Lowest tier that includes this feature.
    pub fn minimum_capability(self) -> Capability {
        match self {
            Feature::Presence => Capability::PresenceOnly,
            Feature::Discovery | Feature::Messaging | Feature::StateSync => {
                Capability::PresenceWithSignals
            }
            Feature::Media => Capability::PresenceWithEphemeralData,
        }
    }
}

/// Feature flags for one capability tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Presence declaration and validation
    pub presence: bool,
    /// Participant discovery
    pub discovery: bool,
    /// Participant messaging
    pub messaging: bool,
    /// Shared state sync
    pub state_sync: bool,
    /// Ephemeral media
    pub media: bool,
}

impl FeatureFlags {
    fn as_array(self) -> [bool; 5] {
        [
            self.presence,
            self.discovery,
            self.messaging,
            self.state_sync,
            self.media,
        ]
    }

    /// Whether every flag set in `other` is also set here.
    pub fn is_superset_of(self, other: FeatureFlags) -> bool {
        self.as_array()
            .iter()
            .zip(other.as_array())
            .all(|(mine, theirs)| *mine || !theirs)
    }

    /// Number of enabled flags.
    pub fn count(self) -> usize {
        self.as_array().iter().filter(|flag| **flag).count()
    }
}
