//! Device registry for corral.
//!
//! The registry is the single source of truth for device ownership.
//! Devices are created on first agent registration, marked absent on
//! deregistration, and never deleted while leased. Ownership is mutated
//! only through [`Registry::try_claim`] and [`Registry::release`], which
//! the lease manager calls inside its bind/release steps.
//!
//! # Example
//!
//! ```
//! use corral_core::{Capabilities, Serial};
//! use corral_registry::{Device, DeviceFilter, MemoryRegistry, Registry};
//!
//! let registry = MemoryRegistry::new();
//! let device = Device::new(
//!     Serial::from("emulator-5554"),
//!     "dev.emulator-5554",
//!     Capabilities::new("arm64-v8a", "Pixel 7", "33", "13"),
//! );
//! registry.save_device(&device).unwrap();
//!
//! let idle = registry.list_devices(&DeviceFilter::default()).unwrap();
//! assert_eq!(idle.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod types;

pub use error::{RegistryError, Result};
pub use memory::MemoryRegistry;
pub use types::{Device, DeviceFilter, DeviceOwner, DeviceStatus};

use corral_core::{GroupId, Serial};

/// The registry contract consumed by the lease manager.
///
/// Implementations must make [`Registry::try_claim`] a single atomic
/// check-and-write on the `owner` field so that two concurrent
/// admissions can never claim the same device.
pub trait Registry: Send + Sync {
    /// Insert or update a device record (agent registration).
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unavailable` if the store fails.
    fn save_device(&self, device: &Device) -> Result<()>;

    /// Load a device by serial.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unavailable` if the store fails.
    fn load_device(&self, serial: &Serial) -> Result<Option<Device>>;

    /// List devices matching the filter criteria.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unavailable` if the store fails.
    fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>>;

    /// Atomically claim a device for an owner and group.
    ///
    /// Compare-and-swap semantics: the claim succeeds only if the
    /// device exists, is present, and has no owner. Returns `Ok(false)`
    /// when the device was lost to a concurrent claim (or vanished);
    /// the caller is expected to skip it, not retry.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unavailable` if the store fails.
    fn try_claim(&self, serial: &Serial, owner: &DeviceOwner, group: &GroupId) -> Result<bool>;

    /// Clear a device's owner and group, re-admitting it to the pool.
    ///
    /// Returns the group the device was bound to, if any.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if the device doesn't exist.
    fn release(&self, serial: &Serial) -> Result<Option<GroupId>>;

    /// Update a device's presence flag (agent connect/disconnect).
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if the device doesn't exist.
    fn set_present(&self, serial: &Serial, present: bool) -> Result<()>;

    /// Count devices currently owned by a user, for quota accounting.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unavailable` if the store fails.
    fn count_devices_owned_by(&self, email: &str) -> Result<usize>;
}
