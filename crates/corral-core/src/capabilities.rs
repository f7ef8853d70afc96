//! Hardware capability attributes reported by device agents.

use serde::{Deserialize, Serialize};

/// Capability attributes of a device, reported at registration and used
/// as selection criteria during admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Capabilities {
    /// CPU ABI (e.g. `arm64-v8a`).
    pub abi: String,
    /// Device model name.
    pub model: String,
    /// Platform SDK level.
    pub sdk: String,
    /// OS version string.
    pub version: String,
}

impl Capabilities {
    /// Create a capability set from its four attributes.
    #[must_use]
    pub fn new(
        abi: impl Into<String>,
        model: impl Into<String>,
        sdk: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            abi: abi.into(),
            model: model.into(),
            sdk: sdk.into(),
            version: version.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_serde_roundtrip() {
        let caps = Capabilities::new("arm64-v8a", "Pixel 7", "33", "13");
        let json = serde_json::to_string(&caps).unwrap();
        let parsed: Capabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(caps, parsed);
    }
}
