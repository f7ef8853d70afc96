//! The device group record: one lease and the devices bound to it.

use chrono::{DateTime, Utc};
use corral_core::{GroupId, Serial, UserRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::lifecycle::GroupState;
use crate::schedule::Schedule;

/// A device group, owned exclusively by the lease manager.
///
/// Invariants: `device_serials.len() <= requested_amount`; a group in a
/// terminal state owns no devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Unique group identifier.
    pub id: GroupId,
    /// The user holding the lease.
    pub owner: UserRef,
    /// The wall-clock window the lease is entitled to.
    pub schedule: Schedule,
    /// Current lifecycle state.
    pub state: GroupState,
    /// Serials of the devices currently bound.
    pub device_serials: HashSet<Serial>,
    /// Upper bound on how many devices this group may bind.
    pub requested_amount: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// Create a fresh group in `Pending` with no devices bound.
    #[must_use]
    pub fn new(id: GroupId, owner: UserRef, schedule: Schedule, requested_amount: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            schedule,
            state: GroupState::Pending,
            device_serials: HashSet::new(),
            requested_amount,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if the group was created by an administrator.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.owner.is_admin()
    }

    /// How many more devices this group may still bind.
    #[must_use]
    pub fn remaining_capacity(&self) -> u32 {
        let bound = u32::try_from(self.device_serials.len()).unwrap_or(u32::MAX);
        self.requested_amount.saturating_sub(bound)
    }

    /// True once the lease window has passed.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule.is_past(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn group(requested: u32) -> Group {
        let start = Utc::now();
        let schedule = Schedule::once(start, start + Duration::minutes(40)).unwrap();
        Group::new(
            GroupId::generate_deterministic("a@b.c", "run", 1),
            UserRef::user("a@b.c", "Alice"),
            schedule,
            requested,
        )
    }

    #[test]
    fn new_group_is_pending_and_empty() {
        let group = group(2);
        assert_eq!(group.state, GroupState::Pending);
        assert!(group.device_serials.is_empty());
        assert_eq!(group.remaining_capacity(), 2);
        assert!(!group.is_admin());
    }

    #[test]
    fn remaining_capacity_shrinks_with_bindings() {
        let mut group = group(2);
        group.device_serials.insert(Serial::from("a"));
        assert_eq!(group.remaining_capacity(), 1);
        group.device_serials.insert(Serial::from("b"));
        assert_eq!(group.remaining_capacity(), 0);
    }

    #[test]
    fn due_once_window_passes() {
        let group = group(1);
        assert!(!group.is_due(group.schedule.start));
        assert!(group.is_due(group.schedule.stop + Duration::seconds(1)));
    }
}
