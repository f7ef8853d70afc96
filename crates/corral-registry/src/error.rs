//! Error types for the registry.

use thiserror::Error;

/// A result type using `RegistryError`.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested device record was not found.
    #[error("device not found")]
    NotFound,

    /// The backing store failed; surfaced to callers as a 500.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}
