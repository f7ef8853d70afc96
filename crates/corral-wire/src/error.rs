//! Error types for the wire layer.

use thiserror::Error;

/// A result type using `WireError`.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors that can occur on the bus and in transaction correlation.
#[derive(Debug, Error)]
pub enum WireError {
    /// The outbound payload could not be encoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// An inbound frame failed schema validation.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The deadline elapsed before a matching reply arrived.
    ///
    /// A timeout means the outcome is unknown, not that the agent
    /// definitely failed.
    #[error("transaction timed out waiting for reply")]
    Timeout,

    /// The bus subscription was lost mid-transaction.
    #[error("bus subscription lost")]
    Disconnected,
}

impl WireError {
    /// Returns true if the caller should treat this as an unresponsive
    /// agent (outcome unknown).
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout | Self::Disconnected)
    }
}
