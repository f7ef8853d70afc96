//! Typed command dispatch to device agents.
//!
//! Each method wraps one request/reply exchange: build the command,
//! call through the correlator with the matching reply kind and a
//! serial matcher, and translate the reply into a [`CommandOutcome`].
//! Transport failures and timeouts surface as [`WireError`]s; agent
//! verdicts (a failed install, say) are successful dispatches with
//! `success == false`.

use corral_core::{GroupId, Serial, UserRef};
use corral_wire::{Message, MessageKind, Result, Transactor, WireError};
use std::sync::Arc;
use tracing::debug;

use crate::types::{CommandOutcome, DispatchConfig};

/// Sends commands to agents and interprets their replies.
pub struct CommandDispatcher {
    txn: Arc<Transactor>,
    config: DispatchConfig,
}

impl CommandDispatcher {
    /// Create a dispatcher over the given correlator.
    #[must_use]
    pub fn new(txn: Arc<Transactor>, config: DispatchConfig) -> Self {
        Self { txn, config }
    }

    /// Tell the agent on `channel` to join `group`.
    ///
    /// # Errors
    ///
    /// [`WireError::Timeout`] if the agent stays silent past the join
    /// deadline; the binding's fate is then unknown.
    pub async fn join_group(
        &self,
        channel: &str,
        serial: &Serial,
        group: &GroupId,
        owner: &UserRef,
        timeout_ms: u64,
    ) -> Result<CommandOutcome> {
        debug!(serial = serial.as_str(), %group, "dispatching join");
        let want = serial.clone();
        let reply = self
            .txn
            .call(
                channel,
                Message::JoinGroup {
                    serial: serial.clone(),
                    group: *group,
                    owner: owner.clone(),
                    timeout_ms,
                },
                MessageKind::JoinConfirmed,
                move |msg| msg.serial() == &want,
                self.config.join_timeout,
            )
            .await?;
        match reply {
            Message::JoinConfirmed { .. } => Ok(CommandOutcome::ok("Joined group")),
            other => Err(WireError::MalformedReply(format!(
                "expected join_confirmed, got {other:?}"
            ))),
        }
    }

    /// Ask the agent on `channel` for a remote-connect endpoint.
    ///
    /// # Errors
    ///
    /// [`WireError::Timeout`] if the agent stays silent.
    pub async fn connect_start(&self, channel: &str, serial: &Serial) -> Result<CommandOutcome> {
        debug!(serial = serial.as_str(), "dispatching connect start");
        let want = serial.clone();
        let reply = self
            .txn
            .call(
                channel,
                Message::ConnectStart {
                    serial: serial.clone(),
                },
                MessageKind::ConnectStarted,
                move |msg| msg.serial() == &want,
                self.config.connect_timeout,
            )
            .await?;
        match reply {
            Message::ConnectStarted { url, .. } => {
                Ok(CommandOutcome::ok("Connected").with_url(url))
            }
            other => Err(WireError::MalformedReply(format!(
                "expected connect_started, got {other:?}"
            ))),
        }
    }

    /// Ask the agent on `channel` to install an APK from `url`.
    ///
    /// # Errors
    ///
    /// [`WireError::Timeout`] if the agent stays silent past the
    /// install deadline.
    pub async fn install_apk(
        &self,
        channel: &str,
        serial: &Serial,
        url: &str,
        install_flags: Vec<String>,
    ) -> Result<CommandOutcome> {
        debug!(serial = serial.as_str(), url, "dispatching install");
        let want = serial.clone();
        let reply = self
            .txn
            .call(
                channel,
                Message::InstallApk {
                    serial: serial.clone(),
                    url: url.to_string(),
                    install_flags,
                },
                MessageKind::InstallResult,
                move |msg| msg.serial() == &want,
                self.config.install_timeout,
            )
            .await?;
        match reply {
            Message::InstallResult {
                success, result, ..
            } => Ok(if success {
                CommandOutcome::ok(result)
            } else {
                CommandOutcome::fail(result)
            }),
            other => Err(WireError::MalformedReply(format!(
                "expected install_result, got {other:?}"
            ))),
        }
    }

    /// Ask the agent on `channel` for its advertised device name.
    ///
    /// # Errors
    ///
    /// [`WireError::Timeout`] if the agent stays silent.
    pub async fn query_device_name(
        &self,
        channel: &str,
        serial: &Serial,
    ) -> Result<CommandOutcome> {
        let want = serial.clone();
        let reply = self
            .txn
            .call(
                channel,
                Message::DeviceName {
                    serial: serial.clone(),
                },
                MessageKind::DeviceNameResult,
                move |msg| msg.serial() == &want,
                self.config.device_name_timeout,
            )
            .await?;
        match reply {
            Message::DeviceNameResult { name, .. } => {
                Ok(CommandOutcome::ok("Queried").with_name(name))
            }
            other => Err(WireError::MalformedReply(format!(
                "expected device_name_result, got {other:?}"
            ))),
        }
    }
}
