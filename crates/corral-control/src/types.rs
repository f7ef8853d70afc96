//! Configuration and request/outcome types for the lease manager.

use corral_registry::DeviceFilter;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for lease admission and expiry.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Per-request device cap for non-administrators.
    pub user_device_cap: u32,
    /// Outstanding-group cap per user.
    pub max_groups_per_user: usize,
    /// Ceiling on the lease window length.
    pub max_lease: Duration,
    /// Window length used when the caller does not name one.
    pub default_lease: Duration,
    /// How often the background sweeper looks for due groups.
    pub sweep_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            user_device_cap: 2,
            max_groups_per_user: 5,
            max_lease: Duration::from_secs(3 * 60 * 60),
            default_lease: Duration::from_secs(40 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Per-command deadlines for agent dispatch.
///
/// Installs get a generous deadline because the agent downloads and
/// installs the package before answering.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Deadline for `JoinGroup` acknowledgments.
    pub join_timeout: Duration,
    /// Deadline for `ConnectStart` replies.
    pub connect_timeout: Duration,
    /// Deadline for `InstallApk` replies.
    pub install_timeout: Duration,
    /// Deadline for `DeviceName` replies.
    pub device_name_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            install_timeout: Duration::from_secs(120),
            device_name_timeout: Duration::from_secs(5),
        }
    }
}

/// A request to create a group and bind devices to it in one step.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Human-readable group name, hashed into the group id.
    pub name: String,
    /// How many devices to try to bind.
    pub amount: u32,
    /// Minimum acceptable count; admission fails below this floor.
    pub need_amount: u32,
    /// Lease window length; `LeaseConfig::default_lease` when absent.
    pub timeout: Option<Duration>,
    /// Hardware criteria candidate devices must match.
    pub filter: DeviceFilter,
}

impl CaptureRequest {
    /// A capture of `amount` devices where all of them are required.
    #[must_use]
    pub fn exact(name: impl Into<String>, amount: u32) -> Self {
        Self {
            name: name.into(),
            amount,
            need_amount: amount,
            timeout: None,
            filter: DeviceFilter::default(),
        }
    }
}

/// What a device agent reported back for a dispatched command.
///
/// An unsuccessful outcome is an agent-level verdict (for example a
/// failed install), not a transport failure; those surface as errors.
/// Serializes to the JSON shape API layers hand back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Whether the agent reported success.
    pub success: bool,
    /// Human-readable detail from the agent.
    pub description: String,
    /// Remote-connect URL, for connect commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_connect_url: Option<String>,
    /// Advertised device name, for name queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl CommandOutcome {
    /// A successful outcome with a description.
    #[must_use]
    pub fn ok(description: impl Into<String>) -> Self {
        Self {
            success: true,
            description: description.into(),
            remote_connect_url: None,
            device_name: None,
        }
    }

    /// A failed outcome with the agent's explanation.
    #[must_use]
    pub fn fail(description: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
            remote_connect_url: None,
            device_name: None,
        }
    }

    /// Attach a remote-connect URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.remote_connect_url = Some(url.into());
        self
    }

    /// Attach a device name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }
}
