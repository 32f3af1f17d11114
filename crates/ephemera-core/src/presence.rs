//! Presence claims and quorum validation.
//!
//! A presence progresses `None -> Declared -> Validated -> Finalized`, or
//! ends in `Slashed`. Validation votes are counted while `Declared`; reaching
//! the quorum promotes the presence to `Validated`.

use crate::epoch::EpochId;
use crate::time::PhysicalTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Address of a participant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorAddress(pub String);

impl ActorAddress {
    /// Wrap an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a presence claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceState {
    /// No claim made
    #[default]
    None,
    /// Claim made, collecting votes
    Declared,
    /// Quorum reached
    Validated,
    /// Claim settled
    Finalized,
    /// Claim rejected; terminal
    Slashed,
}

impl PresenceState {
    /// Whether a participant in this state may discover, message or capture.
    pub fn can_interact(self) -> bool {
        can_interact(self)
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, PresenceState::Finalized | PresenceState::Slashed)
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PresenceState::None => "none",
            PresenceState::Declared => "declared",
            PresenceState::Validated => "validated",
            PresenceState::Finalized => "finalized",
            PresenceState::Slashed => "slashed",
        };
        f.write_str(name)
    }
}

/// Presence transition errors, reported to the caller of presence operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// Action is not allowed from the current state
    #[error("Cannot {action} a presence in state {from}")]
    InvalidTransition {
        /// Current state
        from: PresenceState,
        /// Attempted action
        action: &'static str,
    },
    /// Quorum size is zero, so validation can never complete
    #[error("Quorum size is zero")]
    QuorumUnavailable,
    /// Voter already voted for this presence
    #[error("Validator {voter} already voted")]
    DuplicateVote {
        /// Repeated voter
        voter: ActorAddress,
    },
    /// Not enough votes to validate
    #[error("Insufficient votes: have {have}, need {need}")]
    InsufficientVotes {
        /// Votes recorded
        have: u64,
        /// Votes required
        need: u64,
    },
}

/// A participant's attendance claim in one epoch.
///
/// Identity is `(epoch_id, actor)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Epoch the claim belongs to
    pub epoch_id: EpochId,
    /// Claiming participant
    pub actor: ActorAddress,
    /// Current state
    pub state: PresenceState,
    /// When the claim was declared
    pub declared_at: Option<PhysicalTime>,
    /// When quorum was reached
    pub validated_at: Option<PhysicalTime>,
    /// Votes received; non-decreasing while declared
    pub validation_count: u64,
    /// Validators that voted, used to reject repeat votes
    #[serde(default)]
    pub validators: BTreeSet<ActorAddress>,
}

impl Presence {
    /// A presence with no claim yet.
    pub fn new(epoch_id: EpochId, actor: ActorAddress) -> Self {
        Self {
            epoch_id,
            actor,
            state: PresenceState::None,
            declared_at: None,
            validated_at: None,
            validation_count: 0,
            validators: BTreeSet::new(),
        }
    }

    /// A freshly declared presence.
    pub fn declared(epoch_id: EpochId, actor: ActorAddress, now: PhysicalTime) -> Self {
        let mut presence = Self::new(epoch_id, actor);
        presence.state = PresenceState::Declared;
        presence.declared_at = Some(now);
        presence
    }

    /// Whether this presence may interact.
    pub fn can_interact(&self) -> bool {
        self.state.can_interact()
    }

    /// Declare the claim.
    pub fn declare(&mut self, now: PhysicalTime) -> Result<(), PresenceError> {
        if self.state != PresenceState::None {
            return Err(PresenceError::InvalidTransition {
                from: self.state,
                action: "declare",
            });
        }
        self.state = PresenceState::Declared;
        self.declared_at = Some(now);
        Ok(())
    }

    /// Count a validation vote from `voter`.
    ///
    /// Promotes to `Validated` once `quorum_size` votes are in. Returns the
    /// resulting state.
    pub fn record_validation(
        &mut self,
        voter: ActorAddress,
        quorum_size: u64,
        now: PhysicalTime,
    ) -> Result<PresenceState, PresenceError> {
        if self.state != PresenceState::Declared {
            return Err(PresenceError::InvalidTransition {
                from: self.state,
                action: "validate",
            });
        }
        if quorum_size == 0 {
            return Err(PresenceError::QuorumUnavailable);
        }
        if self.validators.contains(&voter) {
            return Err(PresenceError::DuplicateVote { voter });
        }

        self.validators.insert(voter);
        self.validation_count = self.validation_count.saturating_add(1);

        if self.validation_count >= quorum_size {
            self.state = PresenceState::Validated;
            self.validated_at = Some(now);
        }
        Ok(self.state)
    }

    /// Promote to `Validated` from votes already counted elsewhere.
    pub fn validate(&mut self, quorum_size: u64, now: PhysicalTime) -> Result<(), PresenceError> {
        if self.state != PresenceState::Declared {
            return Err(PresenceError::InvalidTransition {
                from: self.state,
                action: "validate",
            });
        }
        if quorum_size == 0 {
            return Err(PresenceError::QuorumUnavailable);
        }
        if self.validation_count < quorum_size {
            return Err(PresenceError::InsufficientVotes {
                have: self.validation_count,
                need: quorum_size,
            });
        }
        self.state = PresenceState::Validated;
        self.validated_at = Some(now);
        Ok(())
    }

    /// Settle a validated claim.
    pub fn finalize(&mut self) -> Result<(), PresenceError> {
        if self.state != PresenceState::Validated {
            return Err(PresenceError::InvalidTransition {
                from: self.state,
                action: "finalize",
            });
        }
        self.state = PresenceState::Finalized;
        Ok(())
    }

    /// Reject the claim.
    pub fn slash(&mut self) -> Result<(), PresenceError> {
        if !matches!(
            self.state,
            PresenceState::Declared | PresenceState::Validated
        ) {
            return Err(PresenceError::InvalidTransition {
                from: self.state,
                action: "slash",
            });
        }
        self.state = PresenceState::Slashed;
        Ok(())
    }

    /// Quorum progress for this presence.
    pub fn quorum_progress(&self, quorum_size: u64) -> QuorumProgress {
        QuorumProgress::new(self.state, self.validation_count, quorum_size)
    }
}

/// `Declared`, `Validated` and `Finalized` may interact; `None` and
/// `Slashed` may not.
pub fn can_interact(state: PresenceState) -> bool {
    matches!(
        state,
        PresenceState::Declared | PresenceState::Validated | PresenceState::Finalized
    )
}

/// `min(1, validation_count / quorum_size)`, or `0` for an empty quorum.
pub fn validation_progress(validation_count: u64, quorum_size: u64) -> f64 {
    if quorum_size == 0 {
        return 0.0;
    }
    (validation_count as f64 / quorum_size as f64).min(1.0)
}

/// Votes still required. Zero unless the presence is `Declared`.
pub fn votes_needed(state: PresenceState, validation_count: u64, quorum_size: u64) -> u64 {
    if state != PresenceState::Declared {
        return 0;
    }
    quorum_size.saturating_sub(validation_count)
}

/// Quorum progress summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuorumProgress {
    /// Votes recorded
    pub validation_count: u64,
    /// Votes required
    pub quorum_size: u64,
    /// Fraction in `[0, 1]`
    pub progress: f64,
    /// Votes still required
    pub votes_needed: u64,
}

impl QuorumProgress {
    /// Compute progress for a presence in `state`.
    pub fn new(state: PresenceState, validation_count: u64, quorum_size: u64) -> Self {
        Self {
            validation_count,
            quorum_size,
            progress: validation_progress(validation_count, quorum_size),
            votes_needed: votes_needed(state, validation_count, quorum_size),
        }
    }

    /// Whether the quorum is met.
    pub fn is_met(&self) -> bool {
        self.quorum_size > 0 && self.validation_count >= self.quorum_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn actor(name: &str) -> ActorAddress {
        ActorAddress::new(name)
    }

    fn now() -> PhysicalTime {
        PhysicalTime::from_millis(1_000)
    }

    #[test]
    fn interaction_excludes_none_and_slashed() {
        assert!(!can_interact(PresenceState::None));
        assert!(can_interact(PresenceState::Declared));
        assert!(can_interact(PresenceState::Validated));
        assert!(can_interact(PresenceState::Finalized));
        assert!(!can_interact(PresenceState::Slashed));
    }

    #[test]
    fn quorum_promotes_to_validated() {
        let mut presence = Presence::declared(1, actor("alice"), now());
        assert_eq!(
            presence.record_validation(actor("v1"), 2, now()),
            Ok(PresenceState::Declared)
        );
        assert_eq!(presence.quorum_progress(2).votes_needed, 1);
        assert_eq!(
            presence.record_validation(actor("v2"), 2, now()),
            Ok(PresenceState::Validated)
        );
        assert_eq!(presence.validated_at, Some(now()));
        assert_eq!(presence.quorum_progress(2).votes_needed, 0);
    }

    #[test]
    fn duplicate_and_late_votes_are_rejected() {
        let mut presence = Presence::declared(1, actor("alice"), now());
        presence
            .record_validation(actor("v1"), 3, now())
            .expect("first vote");
        assert_matches!(
            presence.record_validation(actor("v1"), 3, now()),
            Err(PresenceError::DuplicateVote { .. })
        );
        assert_eq!(presence.validation_count, 1);

        presence.slash().expect("slash declared");
        assert_matches!(
            presence.record_validation(actor("v2"), 3, now()),
            Err(PresenceError::InvalidTransition {
                from: PresenceState::Slashed,
                ..
            })
        );
    }

    #[test]
    fn zero_quorum_cannot_validate() {
        let mut presence = Presence::declared(1, actor("alice"), now());
        assert_eq!(
            presence.record_validation(actor("v1"), 0, now()),
            Err(PresenceError::QuorumUnavailable)
        );
        assert_eq!(presence.validation_count, 0);
    }

    #[test]
    fn explicit_validation_checks_votes() {
        let mut presence = Presence::declared(1, actor("alice"), now());
        presence.validation_count = 1;
        assert_eq!(
            presence.validate(3, now()),
            Err(PresenceError::InsufficientVotes { have: 1, need: 3 })
        );
        presence.validation_count = 3;
        presence.validate(3, now()).expect("quorum met");
        assert_eq!(presence.state, PresenceState::Validated);
    }

    #[test]
    fn finalize_requires_validated() {
        let mut presence = Presence::new(1, actor("alice"));
        assert_matches!(
            presence.finalize(),
            Err(PresenceError::InvalidTransition { action: "finalize", .. })
        );
        presence.declare(now()).expect("declare");
        assert_matches!(presence.declare(now()), Err(_));
        presence.validation_count = 1;
        presence.validate(1, now()).expect("validate");
        presence.finalize().expect("finalize");
        assert!(presence.state.is_terminal());
        assert_matches!(presence.slash(), Err(_));
    }

    #[test]
    fn votes_needed_only_while_declared() {
        assert_eq!(votes_needed(PresenceState::Declared, 1, 4), 3);
        assert_eq!(votes_needed(PresenceState::Declared, 9, 4), 0);
        assert_eq!(votes_needed(PresenceState::Validated, 1, 4), 0);
        assert_eq!(votes_needed(PresenceState::None, 0, 4), 0);
    }

    proptest! {
        #[test]
        fn progress_is_clamped_and_monotonic(count in 0u64..10_000, quorum in 0u64..1_000) {
            let p = validation_progress(count, quorum);
            prop_assert!((0.0..=1.0).contains(&p));
            prop_assert!(validation_progress(count + 1, quorum) >= p);
            if quorum == 0 {
                prop_assert_eq!(p, 0.0);
            }
        }
    }
}
