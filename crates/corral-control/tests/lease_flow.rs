//! End-to-end lease flows over an in-process bus with fake agents.

use std::sync::Arc;
use std::time::Duration;

use corral_control::{
    CaptureRequest, CommandDispatcher, ControlError, DispatchConfig, GroupState, LeaseConfig,
    LeaseControl, LeaseService, LifecycleEvent, Schedule,
};
use corral_core::{Capabilities, Serial, UserRef};
use corral_registry::{MemoryRegistry, Registry};
use corral_wire::{
    Bus, ChannelRouter, Envelope, LocalBus, Message, Transactor, GLOBAL_CHANNEL,
};

struct Harness {
    bus: Arc<LocalBus>,
    registry: Arc<MemoryRegistry>,
    service: Arc<LeaseService<MemoryRegistry>>,
    _pump: tokio::task::JoinHandle<()>,
}

fn harness() -> Harness {
    let bus = Arc::new(LocalBus::new());
    let router = Arc::new(ChannelRouter::new());
    let registry = Arc::new(MemoryRegistry::new());

    let pump = corral_wire::spawn_pump(bus.subscribe(GLOBAL_CHANNEL), Arc::clone(&router));

    let txn = Arc::new(Transactor::new(
        Arc::clone(&bus) as Arc<dyn Bus>,
        Arc::clone(&router),
        "control",
    ));
    // Short deadlines keep the silent-agent tests fast.
    let dispatch_config = DispatchConfig {
        join_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_millis(200),
        install_timeout: Duration::from_millis(500),
        device_name_timeout: Duration::from_millis(200),
    };
    let dispatcher = Arc::new(CommandDispatcher::new(txn, dispatch_config));
    let service = Arc::new(LeaseService::new(
        Arc::clone(&registry),
        dispatcher,
        LeaseConfig::default(),
    ));
    service.attach(&router);

    Harness {
        bus,
        registry,
        service,
        _pump: pump,
    }
}

fn device_channel(serial: &str) -> String {
    format!("dev.{serial}")
}

impl Harness {
    /// Announce a device on the shared channel, as its agent would.
    async fn register_device(&self, serial: &str) {
        let env = Envelope::wrap(
            Message::DeviceIntroduction {
                serial: Serial::from(serial),
                channel: device_channel(serial),
                capabilities: Capabilities::new("arm64-v8a", "Pixel 7", "33", "13"),
            },
            device_channel(serial),
        );
        self.bus
            .publish(GLOBAL_CHANNEL, env.encode().unwrap())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// A fake agent that answers every command on its device channel.
    fn spawn_agent(&self, serial: &str) -> tokio::task::JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let mut rx = self.bus.subscribe(&device_channel(serial));
        tokio::spawn(async move {
            while let Ok(frame) = rx.recv().await {
                let Ok(env) = Envelope::decode(&frame.payload) else {
                    continue;
                };
                let Some(reply_to) = env.reply_channel.clone() else {
                    continue;
                };
                let reply = match &env.message {
                    Message::JoinGroup { serial, group, .. } => Some(Message::JoinConfirmed {
                        serial: serial.clone(),
                        group: *group,
                    }),
                    Message::ConnectStart { serial } => Some(Message::ConnectStarted {
                        serial: serial.clone(),
                        url: format!("ws://farm/{serial}"),
                    }),
                    Message::InstallApk { serial, url, .. } => Some(Message::InstallResult {
                        serial: serial.clone(),
                        success: !url.contains("fail"),
                        result: if url.contains("fail") {
                            "INSTALL_FAILED_NO_MATCHING_ABIS".to_string()
                        } else {
                            "Success".to_string()
                        },
                    }),
                    Message::DeviceName { serial } => Some(Message::DeviceNameResult {
                        serial: serial.clone(),
                        name: format!("Fake {serial}"),
                    }),
                    _ => None,
                };
                if let Some(message) = reply {
                    let env = Envelope::wrap(message, frame.channel.clone());
                    let _ = bus.publish(&reply_to, env.encode().unwrap());
                }
            }
        })
    }
}

fn drain_leaves(rx: &mut tokio::sync::broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut leaves = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if matches!(event, LifecycleEvent::Leave { .. }) {
            leaves.push(event);
        }
    }
    leaves
}

#[tokio::test]
async fn capture_connect_and_delete() {
    let h = harness();
    h.register_device("a").await;
    h.register_device("b").await;
    let agent_a = h.spawn_agent("a");
    let agent_b = h.spawn_agent("b");

    let alice = UserRef::user("alice@corral.io", "Alice");
    let group = h
        .service
        .capture_devices(&alice, CaptureRequest::exact("smoke", 2))
        .await
        .unwrap();

    // Both joins confirmed, so the group went Ready then Active.
    assert_eq!(group.state, GroupState::Active);
    assert_eq!(group.device_serials.len(), 2);

    let device = h.registry.load_device(&Serial::from("a")).unwrap().unwrap();
    assert_eq!(
        device.owner.as_ref().map(|owner| owner.email.as_str()),
        Some("alice@corral.io")
    );
    assert_eq!(device.group, Some(group.id));

    let outcome = h
        .service
        .use_and_connect_device(&alice, &Serial::from("a"))
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.remote_connect_url.as_deref(), Some("ws://farm/a"));

    let mut events = h.service.events().subscribe();
    let deleted = h.service.delete_groups(&alice, &[group.id]).await.unwrap();
    assert_eq!(deleted, 1);

    let group = h.service.get_group(&group.id).await.unwrap();
    assert_eq!(group.state, GroupState::Expired);
    assert!(group.device_serials.is_empty());

    // Devices are back in the pool.
    let device = h.registry.load_device(&Serial::from("a")).unwrap().unwrap();
    assert!(device.is_leasable());

    let leaves = drain_leaves(&mut events);
    assert_eq!(leaves.len(), 1);

    agent_a.abort();
    agent_b.abort();
}

#[tokio::test]
async fn user_device_cap_blocks_before_any_lookup() {
    let h = harness();
    // No devices registered at all: the quota check must fire first.
    let bob = UserRef::user("bob@corral.io", "Bob");

    let result = h
        .service
        .capture_devices(&bob, CaptureRequest::exact("greedy", 3))
        .await;

    match result {
        Err(err @ ControlError::QuotaExceeded { .. }) => {
            assert_eq!(err.http_status_code(), 400);
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
    assert!(h.service.list_groups(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn admin_is_exempt_from_device_cap() {
    let h = harness();
    for serial in ["a", "b", "c"] {
        h.register_device(serial).await;
        h.spawn_agent(serial);
    }

    let root = UserRef::admin("root@corral.io", "Root");
    let group = h
        .service
        .capture_devices(&root, CaptureRequest::exact("farm", 3))
        .await
        .unwrap();
    assert_eq!(group.device_serials.len(), 3);
}

#[tokio::test]
async fn silent_agent_surfaces_timeout_but_keeps_binding() {
    let h = harness();
    // Registered but nobody answers on the device channel.
    h.register_device("mute").await;

    let alice = UserRef::user("alice@corral.io", "Alice");
    let result = h
        .service
        .capture_devices(&alice, CaptureRequest::exact("quiet", 1))
        .await;

    // The join timed out: the caller gets the 504-equivalent, because
    // the outcome on the device is unknown.
    match result {
        Err(err @ ControlError::AgentTimeout) => assert_eq!(err.http_status_code(), 504),
        other => panic!("expected AgentTimeout, got {other:?}"),
    }

    // The binding is retained: the group went Ready (never Active) and
    // the device stays bound until expiry reclaims it.
    let groups = h
        .service
        .list_groups(Some("alice@corral.io"))
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].state, GroupState::Ready);
    assert!(groups[0].device_serials.contains(&Serial::from("mute")));

    let device = h
        .registry
        .load_device(&Serial::from("mute"))
        .unwrap()
        .unwrap();
    assert!(!device.is_leasable());
    assert_eq!(device.group, Some(groups[0].id));
}

#[tokio::test]
async fn insufficient_devices_rejects_and_rolls_back() {
    let h = harness();
    h.register_device("a").await;
    h.register_device("b").await;

    let root = UserRef::admin("root@corral.io", "Root");
    let result = h
        .service
        .capture_devices(&root, CaptureRequest::exact("big", 3))
        .await;

    match result {
        Err(ControlError::InsufficientDevices { needed, available }) => {
            assert_eq!(needed, 3);
            assert_eq!(available, 2);
        }
        other => panic!("expected InsufficientDevices, got {other:?}"),
    }

    // All-or-nothing: the partial claims were rolled back.
    for serial in ["a", "b"] {
        let device = h
            .registry
            .load_device(&Serial::from(serial))
            .unwrap()
            .unwrap();
        assert!(device.is_leasable());
    }
    let groups = h.service.list_groups(Some("root@corral.io")).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].state, GroupState::Rejected);
}

#[tokio::test]
async fn install_surfaces_agent_verdict() {
    let h = harness();
    h.register_device("a").await;
    h.spawn_agent("a");

    let alice = UserRef::user("alice@corral.io", "Alice");
    h.service
        .capture_devices(&alice, CaptureRequest::exact("ci", 1))
        .await
        .unwrap();

    let outcome = h
        .service
        .install_on_device(&alice, &Serial::from("a"), "https://apks/good.apk", vec![])
        .await
        .unwrap();
    assert!(outcome.success);

    // Agent-level failure is a successful dispatch with a verdict, not
    // a transport error.
    let outcome = h
        .service
        .install_on_device(&alice, &Serial::from("a"), "https://apks/fail.apk", vec![])
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.description, "INSTALL_FAILED_NO_MATCHING_ABIS");
}

#[tokio::test]
async fn only_the_lessee_may_drive_a_device() {
    let h = harness();
    h.register_device("a").await;
    h.spawn_agent("a");

    let alice = UserRef::user("alice@corral.io", "Alice");
    let mallory = UserRef::user("mallory@corral.io", "Mallory");
    h.service
        .capture_devices(&alice, CaptureRequest::exact("mine", 1))
        .await
        .unwrap();

    let result = h
        .service
        .use_and_connect_device(&mallory, &Serial::from("a"))
        .await;
    assert!(matches!(result, Err(ControlError::DeviceNotAvailable(_))));
}

#[tokio::test]
async fn device_name_query() {
    let h = harness();
    h.register_device("a").await;
    h.spawn_agent("a");

    let outcome = h
        .service
        .query_device_name(&Serial::from("a"))
        .await
        .unwrap();
    assert_eq!(outcome.device_name.as_deref(), Some("Fake a"));
}

#[tokio::test]
async fn sweeper_expires_due_groups_once() {
    let h = harness();
    h.register_device("a").await;
    h.spawn_agent("a");

    let alice = UserRef::user("alice@corral.io", "Alice");
    // A window that is already over; admission still binds the device
    // and the sweeper reclaims it on its next pass.
    let now = chrono::Utc::now();
    let schedule = Schedule::once(now - chrono::Duration::hours(1), now - chrono::Duration::seconds(1))
        .unwrap();
    let group = h
        .service
        .create_group(&alice, "stale", schedule, 1)
        .await
        .unwrap();
    h.service
        .add_group_devices(&group.id, &corral_registry::DeviceFilter::default(), 1)
        .await
        .unwrap();

    let mut events = h.service.events().subscribe();
    assert_eq!(h.service.expire_due().await.unwrap(), 1);

    let device = h.registry.load_device(&Serial::from("a")).unwrap().unwrap();
    assert!(device.is_leasable());
    let leaves = drain_leaves(&mut events);
    assert_eq!(leaves.len(), 1);

    // Terminal groups are not swept again.
    assert_eq!(h.service.expire_due().await.unwrap(), 0);
}

#[tokio::test]
async fn sweeper_prunes_drained_terminal_groups() {
    let h = harness();
    h.register_device("a").await;
    h.spawn_agent("a");

    let alice = UserRef::user("alice@corral.io", "Alice");
    let group = h
        .service
        .capture_devices(&alice, CaptureRequest::exact("brief", 1))
        .await
        .unwrap();
    h.service.delete_groups(&alice, &[group.id]).await.unwrap();

    // The expired group stays observable until the next sweep, then the
    // map gives it up entirely.
    let expired = h.service.get_group(&group.id).await.unwrap();
    assert_eq!(expired.state, GroupState::Expired);

    h.service.expire_due().await.unwrap();
    assert!(matches!(
        h.service.get_group(&group.id).await,
        Err(ControlError::GroupNotFound(_))
    ));
    assert!(h
        .service
        .list_groups(Some("alice@corral.io"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn device_cap_counts_devices_already_held() {
    let h = harness();
    for serial in ["a", "b", "c"] {
        h.register_device(serial).await;
        h.spawn_agent(serial);
    }

    let alice = UserRef::user("alice@corral.io", "Alice");
    h.service
        .capture_devices(&alice, CaptureRequest::exact("first", 1))
        .await
        .unwrap();

    // One device held plus two requested would exceed the cap of two.
    let result = h
        .service
        .capture_devices(&alice, CaptureRequest::exact("second", 2))
        .await;
    assert!(matches!(result, Err(ControlError::QuotaExceeded { .. })));
}

#[tokio::test]
async fn delete_is_idempotent_for_terminal_groups() {
    let h = harness();
    h.register_device("a").await;
    h.spawn_agent("a");

    let alice = UserRef::user("alice@corral.io", "Alice");
    let group = h
        .service
        .capture_devices(&alice, CaptureRequest::exact("twice", 1))
        .await
        .unwrap();

    assert_eq!(h.service.delete_groups(&alice, &[group.id]).await.unwrap(), 1);
    // A second delete of the same group is a harmless no-op.
    assert_eq!(h.service.delete_groups(&alice, &[group.id]).await.unwrap(), 0);
    assert_eq!(
        h.service.get_group(&group.id).await.unwrap().state,
        GroupState::Expired
    );
}
