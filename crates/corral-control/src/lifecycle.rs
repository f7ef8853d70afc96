//! Group lifecycle state machine.
//!
//! # State Machine
//!
//! ```text
//!      ┌──────────┐  admission ok   ┌─────────┐  join confirmed  ┌──────────┐
//!      │ Pending  │────────────────▶│  Ready  │─────────────────▶│  Active  │
//!      └────┬─────┘                 └────┬────┘                  └────┬─────┘
//!           │ admission failed           │ stop reached /            │ stop reached /
//!           ▼                            │ owner release             │ owner release
//!      ┌──────────┐                      ▼                           ▼
//!      │ Rejected │                 ┌─────────────────────────────────────┐
//!      └──────────┘                 │               Expired               │
//!                                   └─────────────────────────────────────┘
//! ```
//!
//! `Rejected` and `Expired` are terminal. A rejected group never owned
//! a device; an expired group owns none.

use corral_core::GroupId;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Lifecycle states for a device group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    /// Created, admission not yet attempted.
    Pending,
    /// Devices reserved, join commands dispatched.
    Ready,
    /// At least one device confirmed its join.
    Active,
    /// Lease window over; all devices released.
    Expired,
    /// Admission failed; no devices were ever bound.
    Rejected,
}

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not
/// allowed.
pub fn validate_transition(group_id: &GroupId, from: GroupState, to: GroupState) -> Result<GroupState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState {
            group_id: *group_id,
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: GroupState, to: GroupState) -> bool {
    use GroupState::{Active, Expired, Pending, Ready, Rejected};

    matches!(
        (from, to),
        // Admission binds devices or rejects the group outright.
        (Pending, Ready | Rejected | Expired)
            // First join confirmation activates the group.
            | (Ready, Active | Expired)
            | (Active, Expired)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: GroupState) -> Vec<GroupState> {
    use GroupState::{Active, Expired, Pending, Ready, Rejected};

    match state {
        Pending => vec![Ready, Rejected, Expired],
        Ready => vec![Active, Expired],
        Active => vec![Expired],
        Expired | Rejected => Vec::new(),
    }
}

/// Returns true if the group can never transition again.
#[must_use]
pub const fn is_terminal(state: GroupState) -> bool {
    matches!(state, GroupState::Expired | GroupState::Rejected)
}

/// Returns true if the group may hold device bindings in this state.
#[must_use]
pub const fn may_own_devices(state: GroupState) -> bool {
    matches!(state, GroupState::Ready | GroupState::Active)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use GroupState::*;

        assert!(is_valid_transition(Pending, Ready));
        assert!(is_valid_transition(Pending, Rejected));
        assert!(is_valid_transition(Pending, Expired));
        assert!(is_valid_transition(Ready, Active));
        assert!(is_valid_transition(Ready, Expired));
        assert!(is_valid_transition(Active, Expired));
    }

    #[test]
    fn invalid_transitions() {
        use GroupState::*;

        // Terminal states never move.
        assert!(!is_valid_transition(Expired, Ready));
        assert!(!is_valid_transition(Rejected, Pending));
        // No skipping admission.
        assert!(!is_valid_transition(Pending, Active));
        // No going backwards.
        assert!(!is_valid_transition(Active, Ready));
        assert!(!is_valid_transition(Ready, Pending));
    }

    #[test]
    fn validate_transition_err() {
        let group_id = GroupId::generate_deterministic("a@b.c", "run", 1);
        let result = validate_transition(&group_id, GroupState::Expired, GroupState::Active);

        match result {
            Err(ControlError::InvalidState { from, to, .. }) => {
                assert_eq!(from, GroupState::Expired);
                assert_eq!(to, GroupState::Active);
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn terminal_states() {
        assert!(is_terminal(GroupState::Expired));
        assert!(is_terminal(GroupState::Rejected));
        assert!(!is_terminal(GroupState::Pending));
        assert!(!is_terminal(GroupState::Active));
        assert!(valid_transitions_from(GroupState::Rejected).is_empty());
    }

    #[test]
    fn device_ownership_states() {
        assert!(may_own_devices(GroupState::Ready));
        assert!(may_own_devices(GroupState::Active));
        assert!(!may_own_devices(GroupState::Pending));
        assert!(!may_own_devices(GroupState::Expired));
        assert!(!may_own_devices(GroupState::Rejected));
    }
}
