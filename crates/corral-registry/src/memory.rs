//! In-memory registry implementation.
//!
//! Claim and release are single critical sections over the device map,
//! which makes the check-and-write on `owner` atomic with respect to
//! concurrent admissions.

use parking_lot::RwLock;
use std::collections::HashMap;

use corral_core::{GroupId, Serial};

use crate::error::{RegistryError, Result};
use crate::types::{Device, DeviceFilter, DeviceOwner};
use crate::Registry;

/// A registry backed by a process-local map.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<Serial, Device>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered devices (present or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// True if no devices are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl Registry for MemoryRegistry {
    fn save_device(&self, device: &Device) -> Result<()> {
        self.devices
            .write()
            .insert(device.serial.clone(), device.clone());
        Ok(())
    }

    fn load_device(&self, serial: &Serial) -> Result<Option<Device>> {
        Ok(self.devices.read().get(serial).cloned())
    }

    fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .read()
            .values()
            .filter(|device| filter.matches(device))
            .cloned()
            .collect())
    }

    fn try_claim(&self, serial: &Serial, owner: &DeviceOwner, group: &GroupId) -> Result<bool> {
        let mut devices = self.devices.write();
        let Some(device) = devices.get_mut(serial) else {
            // Vanished mid-admission; the caller skips it.
            return Ok(false);
        };
        if !device.present || device.owner.is_some() {
            return Ok(false);
        }
        device.owner = Some(owner.clone());
        device.group = Some(*group);
        device.updated_at = chrono::Utc::now();
        tracing::debug!(serial = %serial, owner = %owner.email, group = %group, "claimed device");
        Ok(true)
    }

    fn release(&self, serial: &Serial) -> Result<Option<GroupId>> {
        let mut devices = self.devices.write();
        let device = devices.get_mut(serial).ok_or(RegistryError::NotFound)?;
        let group = device.group.take();
        device.owner = None;
        device.updated_at = chrono::Utc::now();
        if let Some(group) = group {
            tracing::debug!(serial = %serial, group = %group, "released device");
        }
        Ok(group)
    }

    fn set_present(&self, serial: &Serial, present: bool) -> Result<()> {
        let mut devices = self.devices.write();
        let device = devices.get_mut(serial).ok_or(RegistryError::NotFound)?;
        device.present = present;
        device.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn count_devices_owned_by(&self, email: &str) -> Result<usize> {
        Ok(self
            .devices
            .read()
            .values()
            .filter(|device| device.owner.as_ref().is_some_and(|owner| owner.email == email))
            .count())
    }
}
