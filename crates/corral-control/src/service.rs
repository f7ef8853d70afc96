//! The lease manager: group admission, device binding, and expiry.
//!
//! All group state lives behind one lock inside the service; the
//! registry is the authority on device ownership. Lock order is always
//! groups before registry, and no lock is ever held across an await.

use async_trait::async_trait;
use chrono::Utc;
use corral_core::{GroupId, Serial, UserRef};
use corral_registry::{Device, DeviceFilter, DeviceOwner, DeviceStatus, Registry};
use corral_wire::{ChannelRouter, Message, MessageKind, GLOBAL_CHANNEL};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::dispatch::CommandDispatcher;
use crate::error::{ControlError, Result};
use crate::events::{EventHub, LifecycleEvent};
use crate::group::Group;
use crate::lifecycle::{is_terminal, validate_transition, GroupState};
use crate::schedule::Schedule;
use crate::types::{CaptureRequest, CommandOutcome, LeaseConfig};

/// The lease-management surface exposed to API layers.
#[async_trait]
pub trait LeaseControl: Send + Sync {
    /// Create a group and bind devices to it in one step.
    async fn capture_devices(&self, requester: &UserRef, request: CaptureRequest)
        -> Result<Group>;

    /// Create an empty group in `Pending` after quota checks.
    async fn create_group(
        &self,
        requester: &UserRef,
        name: &str,
        schedule: Schedule,
        amount: u32,
    ) -> Result<Group>;

    /// Run admission for a pending group: reserve devices all-or-nothing
    /// and dispatch join commands. A join that times out keeps its
    /// binding but fails the call with `AgentTimeout`.
    async fn add_group_devices(
        &self,
        group_id: &GroupId,
        filter: &DeviceFilter,
        need_amount: u32,
    ) -> Result<Group>;

    /// Expire the named groups, releasing their devices. The requester
    /// must own each group or be an administrator.
    async fn delete_groups(&self, requester: &UserRef, group_ids: &[GroupId]) -> Result<usize>;

    /// Expire every non-terminal group whose window has passed. Returns
    /// how many groups were expired.
    async fn expire_due(&self) -> Result<usize>;

    /// Install an APK on a device the requester has leased.
    async fn install_on_device(
        &self,
        requester: &UserRef,
        serial: &Serial,
        url: &str,
        install_flags: Vec<String>,
    ) -> Result<CommandOutcome>;

    /// Start a remote-connect endpoint on a device the requester has
    /// leased.
    async fn use_and_connect_device(
        &self,
        requester: &UserRef,
        serial: &Serial,
    ) -> Result<CommandOutcome>;

    /// Ask a device agent for its advertised name.
    async fn query_device_name(&self, serial: &Serial) -> Result<CommandOutcome>;

    /// Fetch a group snapshot.
    async fn get_group(&self, group_id: &GroupId) -> Result<Group>;

    /// List group snapshots, optionally restricted to one owner.
    async fn list_groups(&self, owner_email: Option<&str>) -> Result<Vec<Group>>;
}

/// Lease manager over a registry, a dispatcher, and an event hub.
pub struct LeaseService<R> {
    registry: Arc<R>,
    dispatcher: Arc<CommandDispatcher>,
    events: Arc<EventHub>,
    config: LeaseConfig,
    groups: RwLock<HashMap<GroupId, Group>>,
}

impl<R: Registry + 'static> LeaseService<R> {
    /// Create a lease manager.
    #[must_use]
    pub fn new(registry: Arc<R>, dispatcher: Arc<CommandDispatcher>, config: LeaseConfig) -> Self {
        Self {
            registry,
            dispatcher,
            events: Arc::new(EventHub::new()),
            config,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// The event hub this service publishes to.
    #[must_use]
    pub fn events(&self) -> Arc<EventHub> {
        Arc::clone(&self.events)
    }

    /// Register inbound-event handlers on the shared broadcast channel:
    /// agent registration, deregistration, device-initiated leaves, and
    /// stray join confirmations.
    pub fn attach(self: &Arc<Self>, router: &ChannelRouter) {
        let service = Arc::clone(self);
        router.on(
            GLOBAL_CHANNEL,
            MessageKind::DeviceIntroduction,
            move |_, env| {
                if let Message::DeviceIntroduction {
                    serial,
                    channel,
                    capabilities,
                } = &env.message
                {
                    service.on_device_introduction(serial, channel, capabilities.clone());
                }
            },
        );

        let service = Arc::clone(self);
        router.on(GLOBAL_CHANNEL, MessageKind::DeviceAbsent, move |_, env| {
            if let Message::DeviceAbsent { serial } = &env.message {
                service.on_device_absent(serial);
            }
        });

        let service = Arc::clone(self);
        router.on(GLOBAL_CHANNEL, MessageKind::LeaveGroup, move |_, env| {
            if let Message::LeaveGroup { serial, group } = &env.message {
                service.on_device_leave(serial, group);
            }
        });

        let service = Arc::clone(self);
        router.on(GLOBAL_CHANNEL, MessageKind::JoinConfirmed, move |_, env| {
            if let Message::JoinConfirmed { group, .. } = &env.message {
                service.on_join_confirmed(group);
            }
        });
    }

    fn on_device_introduction(
        &self,
        serial: &Serial,
        channel: &str,
        capabilities: corral_core::Capabilities,
    ) {
        let result = match self.registry.load_device(serial) {
            Ok(Some(mut device)) => {
                let previous = device.status();
                device.present = true;
                device.channel = channel.to_string();
                device.capabilities = capabilities;
                device.updated_at = Utc::now();
                let new = device.status();
                let result = self.registry.save_device(&device);
                if result.is_ok() && previous != new {
                    self.events.publish(LifecycleEvent::DeviceStatusChanged {
                        serial: serial.clone(),
                        previous,
                        new,
                    });
                }
                result
            }
            Ok(None) => {
                let device = Device::new(serial.clone(), channel, capabilities);
                let result = self.registry.save_device(&device);
                if result.is_ok() {
                    info!(serial = serial.as_str(), channel, "device registered");
                }
                result
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(serial = serial.as_str(), error = %err, "device introduction failed");
        }
    }

    fn on_device_absent(&self, serial: &Serial) {
        let previous = match self.registry.load_device(serial) {
            Ok(Some(device)) => device.status(),
            _ => return,
        };
        match self.registry.set_present(serial, false) {
            Ok(()) => {
                self.events.publish(LifecycleEvent::DeviceStatusChanged {
                    serial: serial.clone(),
                    previous,
                    new: DeviceStatus::Offline,
                });
            }
            Err(err) => {
                warn!(serial = serial.as_str(), error = %err, "device absent update failed");
            }
        }
    }

    /// A device told us it left its group on its own. Unbind it; the
    /// group itself stays alive with whatever devices remain.
    fn on_device_leave(&self, serial: &Serial, group_id: &GroupId) {
        {
            let mut groups = self.groups.write();
            if let Some(group) = groups.get_mut(group_id) {
                if group.device_serials.remove(serial) {
                    group.updated_at = Utc::now();
                }
            }
        }
        match self.registry.release(serial) {
            Ok(_) => {
                info!(serial = serial.as_str(), group = %group_id, "device left its group");
                self.events.publish(LifecycleEvent::DeviceStatusChanged {
                    serial: serial.clone(),
                    previous: DeviceStatus::Busy,
                    new: DeviceStatus::Available,
                });
            }
            Err(err) => {
                warn!(serial = serial.as_str(), error = %err, "release on leave failed");
            }
        }
    }

    /// First confirmation moves the group from `Ready` to `Active`;
    /// later ones are no-ops.
    fn on_join_confirmed(&self, group_id: &GroupId) {
        let mut groups = self.groups.write();
        let Some(group) = groups.get_mut(group_id) else {
            return;
        };
        if group.state != GroupState::Ready {
            return;
        }
        group.state = GroupState::Active;
        group.updated_at = Utc::now();
        self.events.publish(LifecycleEvent::GroupStatusChanged {
            group_id: *group_id,
            previous: Some(GroupState::Ready),
            new: GroupState::Active,
        });
    }

    /// Expire one group: transition it, strip its bindings, release the
    /// devices, and emit exactly one `Leave` event.
    fn expire_group(&self, group_id: &GroupId) -> Result<Vec<Serial>> {
        let serials: Vec<Serial> = {
            let mut groups = self.groups.write();
            let group = groups
                .get_mut(group_id)
                .ok_or(ControlError::GroupNotFound(*group_id))?;
            let previous = group.state;
            group.state = validate_transition(group_id, previous, GroupState::Expired)?;
            group.updated_at = Utc::now();
            let serials = group.device_serials.drain().collect();
            self.events.publish(LifecycleEvent::GroupStatusChanged {
                group_id: *group_id,
                previous: Some(previous),
                new: GroupState::Expired,
            });
            serials
        };

        for serial in &serials {
            match self.registry.release(serial) {
                Ok(_) => {
                    self.events.publish(LifecycleEvent::DeviceStatusChanged {
                        serial: serial.clone(),
                        previous: DeviceStatus::Busy,
                        new: DeviceStatus::Available,
                    });
                }
                Err(err) => {
                    warn!(serial = serial.as_str(), error = %err, "release on expiry failed");
                }
            }
        }

        self.events.publish(LifecycleEvent::Leave {
            group_id: *group_id,
            serials: serials.clone(),
        });
        info!(group = %group_id, released = serials.len(), "group expired");
        Ok(serials)
    }

    fn outstanding_groups_of(&self, email: &str) -> usize {
        self.groups
            .read()
            .values()
            .filter(|group| group.owner.email() == email && !is_terminal(group.state))
            .count()
    }

    /// Load a device and check the requester may drive it: the device
    /// must be leased by the requester, unless the requester is an
    /// administrator.
    fn leased_device(&self, requester: &UserRef, serial: &Serial) -> Result<Device> {
        let device = self
            .registry
            .load_device(serial)?
            .ok_or_else(|| ControlError::DeviceNotFound(serial.clone()))?;
        if !device.present {
            return Err(ControlError::DeviceNotAvailable(serial.clone()));
        }
        let owned_by_requester = device
            .owner
            .as_ref()
            .is_some_and(|owner| owner.email == requester.email());
        if owned_by_requester || requester.is_admin() {
            Ok(device)
        } else {
            Err(ControlError::DeviceNotAvailable(serial.clone()))
        }
    }

    /// Claim up to `amount` leasable devices matching `filter`. Lost
    /// races are skipped, not retried.
    fn claim_candidates(
        &self,
        filter: &DeviceFilter,
        amount: u32,
        owner: &DeviceOwner,
        group_id: &GroupId,
    ) -> Result<Vec<Device>> {
        let candidates = self.registry.list_devices(filter)?;
        let mut claimed = Vec::new();
        for device in candidates {
            if claimed.len() == amount as usize {
                break;
            }
            if !device.is_leasable() {
                continue;
            }
            if self.registry.try_claim(&device.serial, owner, group_id)? {
                claimed.push(device);
            }
        }
        Ok(claimed)
    }

    fn rollback_claims(&self, claimed: &[Device]) {
        for device in claimed {
            if let Err(err) = self.registry.release(&device.serial) {
                warn!(serial = device.serial.as_str(), error = %err, "rollback release failed");
            }
        }
    }

    fn reject_group(&self, group_id: &GroupId) {
        let mut groups = self.groups.write();
        if let Some(group) = groups.get_mut(group_id) {
            if group.state == GroupState::Pending {
                group.state = GroupState::Rejected;
                group.updated_at = Utc::now();
                self.events.publish(LifecycleEvent::GroupStatusChanged {
                    group_id: *group_id,
                    previous: Some(GroupState::Pending),
                    new: GroupState::Rejected,
                });
            }
        }
    }
}

#[async_trait]
impl<R: Registry + 'static> LeaseControl for LeaseService<R> {
    async fn capture_devices(
        &self,
        requester: &UserRef,
        request: CaptureRequest,
    ) -> Result<Group> {
        if request.need_amount > request.amount {
            return Err(ControlError::InvalidRequest(format!(
                "need_amount {} exceeds amount {}",
                request.need_amount, request.amount
            )));
        }
        let lease = request.timeout.unwrap_or(self.config.default_lease);
        if lease > self.config.max_lease {
            return Err(ControlError::LeaseTooLong {
                limit: self.config.max_lease,
            });
        }

        // Small grace so the window is still open once joins land.
        let start = Utc::now() + chrono::Duration::seconds(2);
        let stop = start
            + chrono::Duration::from_std(lease)
                .map_err(|_| ControlError::LeaseTooLong {
                    limit: self.config.max_lease,
                })?;
        let schedule = Schedule::once(start, stop)?;

        let group = self
            .create_group(requester, &request.name, schedule, request.amount)
            .await?;
        self.add_group_devices(&group.id, &request.filter, request.need_amount)
            .await
    }

    async fn create_group(
        &self,
        requester: &UserRef,
        name: &str,
        schedule: Schedule,
        amount: u32,
    ) -> Result<Group> {
        if amount == 0 {
            return Err(ControlError::EmptyRequest);
        }
        if !requester.is_admin() {
            if amount > self.config.user_device_cap {
                return Err(ControlError::QuotaExceeded {
                    email: requester.email().to_string(),
                    limit: self.config.user_device_cap,
                });
            }
            // The cap covers devices held across all of the user's
            // groups, not just this request.
            let held = self.registry.count_devices_owned_by(requester.email())?;
            if held + amount as usize > self.config.user_device_cap as usize {
                return Err(ControlError::QuotaExceeded {
                    email: requester.email().to_string(),
                    limit: self.config.user_device_cap,
                });
            }
            if self.outstanding_groups_of(requester.email()) >= self.config.max_groups_per_user {
                return Err(ControlError::GroupQuotaExceeded {
                    email: requester.email().to_string(),
                    limit: self.config.max_groups_per_user,
                });
            }
        }

        let id = GroupId::generate(requester.email(), name);
        let group = Group::new(id, requester.clone(), schedule, amount);
        self.groups.write().insert(id, group.clone());
        self.events.publish(LifecycleEvent::GroupStatusChanged {
            group_id: id,
            previous: None,
            new: GroupState::Pending,
        });
        info!(group = %id, owner = %requester, amount, "group created");
        Ok(group)
    }

    async fn add_group_devices(
        &self,
        group_id: &GroupId,
        filter: &DeviceFilter,
        need_amount: u32,
    ) -> Result<Group> {
        // Snapshot under the lock, work without it.
        let (owner, amount) = {
            let groups = self.groups.read();
            let group = groups
                .get(group_id)
                .ok_or(ControlError::GroupNotFound(*group_id))?;
            validate_transition(group_id, group.state, GroupState::Ready)?;
            (group.owner.clone(), group.requested_amount)
        };

        let device_owner = DeviceOwner::from(&owner);
        let claimed = self.claim_candidates(filter, amount, &device_owner, group_id)?;

        let available = u32::try_from(claimed.len()).unwrap_or(u32::MAX);
        if available < need_amount {
            self.rollback_claims(&claimed);
            self.reject_group(group_id);
            return Err(ControlError::InsufficientDevices {
                needed: need_amount,
                available,
            });
        }

        // Re-validate under the write lock: the group may have expired
        // while we were claiming.
        let (schedule, snapshot) = {
            let mut groups = self.groups.write();
            let Some(group) = groups.get_mut(group_id) else {
                self.rollback_claims(&claimed);
                return Err(ControlError::GroupNotFound(*group_id));
            };
            if group.state != GroupState::Pending {
                let state = group.state;
                drop(groups);
                self.rollback_claims(&claimed);
                return Err(ControlError::InvalidState {
                    group_id: *group_id,
                    from: state,
                    to: GroupState::Ready,
                });
            }
            group.state = GroupState::Ready;
            group
                .device_serials
                .extend(claimed.iter().map(|device| device.serial.clone()));
            group.updated_at = Utc::now();
            (group.schedule.clone(), group.clone())
        };
        self.events.publish(LifecycleEvent::GroupStatusChanged {
            group_id: *group_id,
            previous: Some(GroupState::Pending),
            new: GroupState::Ready,
        });
        for device in &claimed {
            self.events.publish(LifecycleEvent::DeviceStatusChanged {
                serial: device.serial.clone(),
                previous: DeviceStatus::Available,
                new: DeviceStatus::Busy,
            });
        }

        // Dispatch joins concurrently.
        let timeout_ms = schedule.remaining_ms(Utc::now());
        let joins = claimed.iter().map(|device| {
            let dispatcher = Arc::clone(&self.dispatcher);
            let owner = owner.clone();
            async move {
                let result = dispatcher
                    .join_group(&device.channel, &device.serial, group_id, &owner, timeout_ms)
                    .await;
                (device.serial.clone(), result)
            }
        });
        let mut first_failure = None;
        for (serial, result) in join_all(joins).await {
            match result {
                Ok(_) => self.on_join_confirmed(group_id),
                Err(err) => {
                    warn!(serial = serial.as_str(), group = %group_id, error = %err, "join dispatch failed");
                    first_failure.get_or_insert(err);
                }
            }
        }
        // A silent agent keeps its binding (the join may have landed on
        // the device), but the caller must hear that the outcome is
        // unknown; expiry reclaims the device at the end of the window.
        if let Some(err) = first_failure {
            return Err(err.into());
        }

        Ok(self.get_group(group_id).await.unwrap_or(snapshot))
    }

    async fn delete_groups(&self, requester: &UserRef, group_ids: &[GroupId]) -> Result<usize> {
        for group_id in group_ids {
            let groups = self.groups.read();
            let group = groups
                .get(group_id)
                .ok_or(ControlError::GroupNotFound(*group_id))?;
            if group.owner.email() != requester.email() && !requester.is_admin() {
                return Err(ControlError::Unauthorized {
                    email: requester.email().to_string(),
                    group_id: *group_id,
                });
            }
        }
        let mut expired = 0;
        for group_id in group_ids {
            let state = self.groups.read().get(group_id).map(|group| group.state);
            // Deleting an already-terminal group is a no-op.
            if state.is_some_and(is_terminal) {
                continue;
            }
            self.expire_group(group_id)?;
            expired += 1;
        }
        Ok(expired)
    }

    async fn expire_due(&self) -> Result<usize> {
        // Terminal groups linger for one sweep interval so callers can
        // still observe their final state, then get reclaimed here.
        self.groups
            .write()
            .retain(|_, group| !is_terminal(group.state));

        let now = Utc::now();
        let due: Vec<GroupId> = self
            .groups
            .read()
            .values()
            .filter(|group| !is_terminal(group.state) && group.is_due(now))
            .map(|group| group.id)
            .collect();

        let mut expired = 0;
        for group_id in &due {
            match self.expire_group(group_id) {
                Ok(_) => expired += 1,
                Err(err) => warn!(group = %group_id, error = %err, "sweep expiry failed"),
            }
        }
        Ok(expired)
    }

    async fn install_on_device(
        &self,
        requester: &UserRef,
        serial: &Serial,
        url: &str,
        install_flags: Vec<String>,
    ) -> Result<CommandOutcome> {
        let device = self.leased_device(requester, serial)?;
        let outcome = self
            .dispatcher
            .install_apk(&device.channel, serial, url, install_flags)
            .await?;
        Ok(outcome)
    }

    async fn use_and_connect_device(
        &self,
        requester: &UserRef,
        serial: &Serial,
    ) -> Result<CommandOutcome> {
        let device = self.leased_device(requester, serial)?;
        let outcome = self
            .dispatcher
            .connect_start(&device.channel, serial)
            .await?;
        Ok(outcome)
    }

    async fn query_device_name(&self, serial: &Serial) -> Result<CommandOutcome> {
        let device = self
            .registry
            .load_device(serial)?
            .ok_or_else(|| ControlError::DeviceNotFound(serial.clone()))?;
        if !device.present {
            return Err(ControlError::DeviceNotAvailable(serial.clone()));
        }
        let outcome = self
            .dispatcher
            .query_device_name(&device.channel, serial)
            .await?;
        Ok(outcome)
    }

    async fn get_group(&self, group_id: &GroupId) -> Result<Group> {
        self.groups
            .read()
            .get(group_id)
            .cloned()
            .ok_or(ControlError::GroupNotFound(*group_id))
    }

    async fn list_groups(&self, owner_email: Option<&str>) -> Result<Vec<Group>> {
        let groups = self.groups.read();
        Ok(groups
            .values()
            .filter(|group| owner_email.is_none_or(|email| group.owner.email() == email))
            .cloned()
            .collect())
    }
}
