//! The envelope codec: routing metadata around a typed message.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};
use crate::message::Message;

/// Prefix for single-use reply channels.
const REPLY_CHANNEL_PREFIX: &str = "txn_";

/// A typed message wrapped with routing metadata.
///
/// The `reply_channel`, when present, is globally unique for the
/// lifetime of one outstanding transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Channel of the sender (where unsolicited follow-ups would go).
    pub origin_channel: String,
    /// Single-use channel the receiver should address its reply to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_channel: Option<String>,
    /// When the envelope was constructed.
    pub sent_at: DateTime<Utc>,
    /// The payload.
    pub message: Message,
}

impl Envelope {
    /// Wrap a message with no reply expectation (fire-and-forget).
    #[must_use]
    pub fn wrap(message: Message, origin_channel: impl Into<String>) -> Self {
        Self {
            origin_channel: origin_channel.into(),
            reply_channel: None,
            sent_at: Utc::now(),
            message,
        }
    }

    /// Wrap a message and mint a fresh globally-unique reply channel.
    ///
    /// Returns the envelope together with the reply channel name so the
    /// caller can subscribe to it before publishing.
    #[must_use]
    pub fn wrap_with_reply(
        message: Message,
        origin_channel: impl Into<String>,
    ) -> (Self, String) {
        let reply_channel = format!("{REPLY_CHANNEL_PREFIX}{}", uuid::Uuid::new_v4());
        let envelope = Self {
            origin_channel: origin_channel.into(),
            reply_channel: Some(reply_channel.clone()),
            sent_at: Utc::now(),
            message,
        };
        (envelope, reply_channel)
    }

    /// Encode the envelope into bus frame bytes.
    ///
    /// # Errors
    ///
    /// Returns `WireError::InvalidPayload` if the payload cannot be
    /// serialized.
    pub fn encode(&self) -> Result<Bytes> {
        let buf =
            serde_json::to_vec(self).map_err(|err| WireError::InvalidPayload(err.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decode an envelope from bus frame bytes.
    ///
    /// # Errors
    ///
    /// Returns `WireError::MalformedReply` if the frame fails schema
    /// validation.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        serde_json::from_slice(frame).map_err(|err| WireError::MalformedReply(err.to_string()))
    }
}
