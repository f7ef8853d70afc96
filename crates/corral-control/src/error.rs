//! Error types for the lease manager and command dispatch.
//!
//! This taxonomy is what the (external) HTTP layer maps onto response
//! codes via [`ControlError::http_status_code`].

use corral_core::{GroupId, Serial};
use corral_registry::RegistryError;
use corral_wire::WireError;
use std::time::Duration;
use thiserror::Error;

use crate::lifecycle::GroupState;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in lease and dispatch operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A lease was requested for zero devices.
    #[error("cannot create a group without devices")]
    EmptyRequest,

    /// The request parameters are malformed; the caller's fault, never
    /// retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A non-administrative requester asked for more devices than the
    /// privilege cap allows.
    #[error("device quota exceeded for {email}: limit is {limit}")]
    QuotaExceeded {
        /// The requester.
        email: String,
        /// The per-request device cap for regular users.
        limit: u32,
    },

    /// The requester has too many outstanding groups.
    #[error("group quota exceeded for {email}: limit is {limit}")]
    GroupQuotaExceeded {
        /// The requester.
        email: String,
        /// The outstanding-group cap per user.
        limit: usize,
    },

    /// The requested lease window exceeds the ceiling.
    #[error("lease cannot be longer than {limit:?}")]
    LeaseTooLong {
        /// The maximum lease duration.
        limit: Duration,
    },

    /// The schedule's stop does not come after its start.
    #[error("invalid schedule: stop must be after start")]
    InvalidSchedule,

    /// Fewer matching idle devices exist than the reservation requires.
    ///
    /// Transient: the caller may retry later with a fresh group.
    #[error("insufficient devices: needed {needed}, only {available} available")]
    InsufficientDevices {
        /// The `need_amount` floor of the reservation.
        needed: u32,
        /// How many matching devices were actually claimable.
        available: u32,
    },

    /// The requested group was not found.
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    /// The requested device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(Serial),

    /// The device exists but is absent or leased to someone else.
    #[error("device {0} is currently in use or not available")]
    DeviceNotAvailable(Serial),

    /// The requester is neither the group owner nor an administrator.
    #[error("{email} is not allowed to manage group {group_id}")]
    Unauthorized {
        /// The requester.
        email: String,
        /// The group being accessed.
        group_id: GroupId,
    },

    /// The requested group state transition is not valid.
    #[error("invalid state transition for group {group_id}: {from:?} -> {to:?}")]
    InvalidState {
        /// The group being transitioned.
        group_id: GroupId,
        /// The current state.
        from: GroupState,
        /// The requested target state.
        to: GroupState,
    },

    /// The agent did not answer within the deadline.
    ///
    /// The outcome is unknown, not definitely failed; the core never
    /// retries on its own.
    #[error("device is not responding")]
    AgentTimeout,

    /// Registry/store failure.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Non-timeout wire failure.
    #[error("wire error: {0}")]
    Wire(WireError),
}

impl From<WireError> for ControlError {
    fn from(err: WireError) -> Self {
        if err.is_timeout() {
            Self::AgentTimeout
        } else {
            Self::Wire(err)
        }
    }
}

impl ControlError {
    /// The HTTP status code the (external) endpoint layer should use.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::EmptyRequest
            | Self::InvalidRequest(_)
            | Self::QuotaExceeded { .. }
            | Self::LeaseTooLong { .. }
            | Self::InvalidSchedule => 400,
            Self::GroupQuotaExceeded { .. }
            | Self::Unauthorized { .. }
            | Self::DeviceNotAvailable(_) => 403,
            Self::GroupNotFound(_) | Self::DeviceNotFound(_) | Self::InsufficientDevices { .. } => {
                404
            }
            Self::InvalidState { .. } => 409,
            Self::Registry(_) | Self::Wire(_) => 500,
            Self::AgentTimeout => 504,
        }
    }

    /// Returns true if this error might be resolved by retrying later.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::InsufficientDevices { .. } | Self::Registry(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let group_id = GroupId::generate_deterministic("a@b.c", "run", 1);

        assert_eq!(ControlError::EmptyRequest.http_status_code(), 400);
        assert_eq!(
            ControlError::QuotaExceeded {
                email: "a@b.c".to_string(),
                limit: 2
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            ControlError::GroupQuotaExceeded {
                email: "a@b.c".to_string(),
                limit: 5
            }
            .http_status_code(),
            403
        );
        assert_eq!(
            ControlError::GroupNotFound(group_id).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::InsufficientDevices {
                needed: 2,
                available: 1
            }
            .http_status_code(),
            404
        );
        assert_eq!(ControlError::AgentTimeout.http_status_code(), 504);
        assert_eq!(
            ControlError::Registry(RegistryError::Unavailable("down".into())).http_status_code(),
            500
        );
    }

    #[test]
    fn timeout_wire_errors_become_agent_timeout() {
        assert!(matches!(
            ControlError::from(WireError::Timeout),
            ControlError::AgentTimeout
        ));
        assert!(matches!(
            ControlError::from(WireError::Disconnected),
            ControlError::AgentTimeout
        ));
        assert!(matches!(
            ControlError::from(WireError::InvalidPayload("x".into())),
            ControlError::Wire(_)
        ));
    }

    #[test]
    fn retriable_classification() {
        assert!(ControlError::InsufficientDevices {
            needed: 1,
            available: 0
        }
        .is_retriable());
        assert!(!ControlError::EmptyRequest.is_retriable());
        assert!(!ControlError::AgentTimeout.is_retriable());
    }
}
