//! Lifecycle event fan-out.
//!
//! The lease manager publishes an event for every observable state
//! change; subscribers (loggers, notifiers, UI feeds) attach and detach
//! freely without affecting the manager.

use corral_core::{GroupId, Serial};
use corral_registry::DeviceStatus;
use tokio::sync::broadcast;

use crate::lifecycle::GroupState;

const EVENT_CAPACITY: usize = 256;

/// An observable state change in the lease manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A group moved to a new lifecycle state.
    GroupStatusChanged {
        /// The group that changed.
        group_id: GroupId,
        /// State before the change; `None` for creation.
        previous: Option<GroupState>,
        /// State after the change.
        new: GroupState,
    },
    /// A device's derived status changed.
    DeviceStatusChanged {
        /// The device that changed.
        serial: Serial,
        /// Status before the change.
        previous: DeviceStatus,
        /// Status after the change.
        new: DeviceStatus,
    },
    /// A group released its devices, exactly once per group.
    Leave {
        /// The group that ended.
        group_id: GroupId,
        /// The serials that were released.
        serials: Vec<Serial>,
    },
}

/// Broadcast hub for lifecycle events.
///
/// Publishing never blocks; slow subscribers lag and lose the oldest
/// events rather than stalling the manager.
pub struct EventHub {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventHub {
    /// Create a hub with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. A hub with no subscribers drops it silently.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        let group_id = GroupId::generate_deterministic("a@b.c", "run", 1);
        hub.publish(LifecycleEvent::GroupStatusChanged {
            group_id,
            previous: None,
            new: GroupState::Pending,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            LifecycleEvent::GroupStatusChanged {
                group_id,
                previous: None,
                new: GroupState::Pending,
            }
        );
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = EventHub::new();
        assert_eq!(hub.subscriber_count(), 0);
        hub.publish(LifecycleEvent::Leave {
            group_id: GroupId::generate_deterministic("a@b.c", "run", 1),
            serials: vec![Serial::from("abc")],
        });
    }
}
