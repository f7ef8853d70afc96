//! The closed set of command and event kinds exchanged with agents.
//!
//! Every frame on the bus carries exactly one of these variants.
//! Matching is exhaustive; there is no runtime field inspection.

use corral_core::{Capabilities, GroupId, Serial, UserRef};
use serde::{Deserialize, Serialize};

/// A typed message, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Instruct an agent to join a device group.
    JoinGroup {
        /// Target device serial.
        serial: Serial,
        /// Group the device is being bound to.
        group: GroupId,
        /// Lease owner, so the agent knows who controls it.
        owner: UserRef,
        /// Lease duration in milliseconds.
        timeout_ms: u64,
    },
    /// Agent acknowledgment that it joined a group.
    JoinConfirmed {
        /// Confirming device serial.
        serial: Serial,
        /// Group that was joined.
        group: GroupId,
    },
    /// Device-initiated notice that it left its group.
    LeaveGroup {
        /// Leaving device serial.
        serial: Serial,
        /// Group that was left.
        group: GroupId,
    },
    /// Ask an agent to start a remote-connect endpoint.
    ConnectStart {
        /// Target device serial.
        serial: Serial,
    },
    /// Agent reply carrying the remote-connect URL.
    ConnectStarted {
        /// Replying device serial.
        serial: Serial,
        /// URL callers use to connect to the device.
        url: String,
    },
    /// Ask an agent to install an APK from a URL.
    InstallApk {
        /// Target device serial.
        serial: Serial,
        /// Where to fetch the package from.
        url: String,
        /// Extra flags passed to the installer.
        install_flags: Vec<String>,
    },
    /// Agent reply describing an install attempt.
    InstallResult {
        /// Replying device serial.
        serial: Serial,
        /// Whether the install succeeded.
        success: bool,
        /// Human-readable installer output.
        result: String,
    },
    /// Ask an agent for its advertised device name.
    DeviceName {
        /// Target device serial.
        serial: Serial,
    },
    /// Agent reply carrying the device name.
    DeviceNameResult {
        /// Replying device serial.
        serial: Serial,
        /// Advertised name.
        name: String,
    },
    /// Agent registration: the device is present and reachable.
    DeviceIntroduction {
        /// Registering device serial.
        serial: Serial,
        /// Bus address the agent listens on.
        channel: String,
        /// Hardware attributes for admission filtering.
        capabilities: Capabilities,
    },
    /// Agent deregistration: the device went away.
    DeviceAbsent {
        /// Departing device serial.
        serial: Serial,
    },
}

impl Message {
    /// The kind tag of this message, used for handler registration.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::JoinGroup { .. } => MessageKind::JoinGroup,
            Self::JoinConfirmed { .. } => MessageKind::JoinConfirmed,
            Self::LeaveGroup { .. } => MessageKind::LeaveGroup,
            Self::ConnectStart { .. } => MessageKind::ConnectStart,
            Self::ConnectStarted { .. } => MessageKind::ConnectStarted,
            Self::InstallApk { .. } => MessageKind::InstallApk,
            Self::InstallResult { .. } => MessageKind::InstallResult,
            Self::DeviceName { .. } => MessageKind::DeviceName,
            Self::DeviceNameResult { .. } => MessageKind::DeviceNameResult,
            Self::DeviceIntroduction { .. } => MessageKind::DeviceIntroduction,
            Self::DeviceAbsent { .. } => MessageKind::DeviceAbsent,
        }
    }

    /// The device serial this message concerns.
    ///
    /// Every message kind is device-scoped, so this is total; it is the
    /// usual correlation key for reply matching.
    #[must_use]
    pub const fn serial(&self) -> &Serial {
        match self {
            Self::JoinGroup { serial, .. }
            | Self::JoinConfirmed { serial, .. }
            | Self::LeaveGroup { serial, .. }
            | Self::ConnectStart { serial }
            | Self::ConnectStarted { serial, .. }
            | Self::InstallApk { serial, .. }
            | Self::InstallResult { serial, .. }
            | Self::DeviceName { serial }
            | Self::DeviceNameResult { serial, .. }
            | Self::DeviceIntroduction { serial, .. }
            | Self::DeviceAbsent { serial } => serial,
        }
    }
}

/// Field-less mirror of [`Message`], used as a routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// See [`Message::JoinGroup`].
    JoinGroup,
    /// See [`Message::JoinConfirmed`].
    JoinConfirmed,
    /// See [`Message::LeaveGroup`].
    LeaveGroup,
    /// See [`Message::ConnectStart`].
    ConnectStart,
    /// See [`Message::ConnectStarted`].
    ConnectStarted,
    /// See [`Message::InstallApk`].
    InstallApk,
    /// See [`Message::InstallResult`].
    InstallResult,
    /// See [`Message::DeviceName`].
    DeviceName,
    /// See [`Message::DeviceNameResult`].
    DeviceNameResult,
    /// See [`Message::DeviceIntroduction`].
    DeviceIntroduction,
    /// See [`Message::DeviceAbsent`].
    DeviceAbsent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let msg = Message::ConnectStart {
            serial: Serial::from("abc"),
        };
        assert_eq!(msg.kind(), MessageKind::ConnectStart);

        let msg = Message::DeviceAbsent {
            serial: Serial::from("abc"),
        };
        assert_eq!(msg.kind(), MessageKind::DeviceAbsent);
    }

    #[test]
    fn serial_accessor() {
        let msg = Message::InstallResult {
            serial: Serial::from("emulator-5554"),
            success: true,
            result: "Installed successfully".to_string(),
        };
        assert_eq!(msg.serial().as_str(), "emulator-5554");
    }

    #[test]
    fn message_serde_tagged() {
        let msg = Message::ConnectStarted {
            serial: Serial::from("abc"),
            url: "ws://host:7100".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connect_started\""));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }
}
