//! Identifier types for devices and device groups.
//!
//! Serials come from the device agents verbatim; group IDs are generated
//! by the control plane and are unique per lease request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A device serial number, the unique key of a device record.
///
/// Serials are opaque strings reported by the device agent at
/// registration time (e.g. `emulator-5554`, `R58M12ABCDE`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(String);

impl Serial {
    /// View the serial as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Serial {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Serial {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial({})", self.0)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 32-byte group identifier, generated via blake3 hash.
///
/// Group IDs are derived from the owner's email, the requested group
/// name, and a timestamp, so two lease requests never collide while the
/// deterministic variant keeps tests reproducible.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId([u8; 32]);

impl GroupId {
    /// Create a `GroupId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a new unique `GroupId`.
    #[must_use]
    pub fn generate(owner_email: &str, name: &str) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let mut hasher = blake3::Hasher::new();
        hasher.update(owner_email.as_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&timestamp.to_le_bytes());

        Self(*hasher.finalize().as_bytes())
    }

    /// Generate a deterministic `GroupId` for testing.
    #[must_use]
    pub fn generate_deterministic(owner_email: &str, name: &str, seed: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(owner_email.as_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&seed.to_le_bytes());

        Self(*hasher.finalize().as_bytes())
    }

    /// Parse a `GroupId` from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not exactly
    /// 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: 32,
            got: s.len() / 2,
        })?;
        Ok(Self(arr))
    }

    /// Return the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Return the hex-encoded string representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.to_hex())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for GroupId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<GroupId> for String {
    fn from(id: GroupId) -> Self {
        id.to_hex()
    }
}

impl AsRef<[u8]> for GroupId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },
}
