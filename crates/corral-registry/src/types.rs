//! Device records and selection filters.

use chrono::{DateTime, Utc};
use corral_core::{Capabilities, GroupId, Serial, UserRef};
use serde::{Deserialize, Serialize};

/// A device record, keyed by serial.
///
/// Mutated only through registry operations triggered by bus events or
/// lease transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Unique serial number.
    pub serial: Serial,
    /// Bus address of the device agent.
    pub channel: String,
    /// Whether the agent is currently connected.
    pub present: bool,
    /// Lease owner, when bound to a group.
    pub owner: Option<DeviceOwner>,
    /// Group the device is bound to, when leased.
    pub group: Option<GroupId>,
    /// Hardware attributes for admission filtering.
    pub capabilities: Capabilities,
    /// First registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Create a fresh, present, unowned record for a registering agent.
    #[must_use]
    pub fn new(serial: Serial, channel: impl Into<String>, capabilities: Capabilities) -> Self {
        let now = Utc::now();
        Self {
            serial,
            channel: channel.into(),
            present: true,
            owner: None,
            group: None,
            capabilities,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if the device can be offered to a new lease.
    #[must_use]
    pub const fn is_leasable(&self) -> bool {
        self.present && self.owner.is_none()
    }

    /// Derived presence/ownership status, used for lifecycle events.
    #[must_use]
    pub const fn status(&self) -> DeviceStatus {
        if !self.present {
            DeviceStatus::Offline
        } else if self.owner.is_some() {
            DeviceStatus::Busy
        } else {
            DeviceStatus::Available
        }
    }
}

/// The user holding a device lease, denormalized onto the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOwner {
    /// Owner's email.
    pub email: String,
    /// Owner's display name.
    pub name: String,
}

impl From<&UserRef> for DeviceOwner {
    fn from(user: &UserRef) -> Self {
        Self {
            email: user.email().to_string(),
            name: user.name().to_string(),
        }
    }
}

/// Derived device status for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Agent disconnected.
    Offline,
    /// Present and unowned.
    Available,
    /// Present and leased.
    Busy,
}

/// Capability criteria for device selection; unset fields match
/// anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceFilter {
    /// Required CPU ABI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,
    /// Required model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Required SDK level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<String>,
    /// Required OS version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DeviceFilter {
    /// True if the device's capabilities satisfy every set criterion.
    #[must_use]
    pub fn matches(&self, device: &Device) -> bool {
        let caps = &device.capabilities;
        self.abi.as_ref().is_none_or(|abi| *abi == caps.abi)
            && self.model.as_ref().is_none_or(|model| *model == caps.model)
            && self.sdk.as_ref().is_none_or(|sdk| *sdk == caps.sdk)
            && self
                .version
                .as_ref()
                .is_none_or(|version| *version == caps.version)
    }
}
