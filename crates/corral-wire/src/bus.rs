//! Bus primitives: the publish/subscribe transport the control plane
//! rides on.
//!
//! Delivery is at-most-once and unordered across channels; within one
//! channel frames arrive in publish order. The core never assumes more
//! than that.

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::router::ChannelRouter;
use std::sync::Arc;

/// Per-channel buffer depth for the in-process bus.
const CHANNEL_CAPACITY: usize = 64;

/// A raw frame as it travels the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// The channel the frame was published to.
    pub channel: String,
    /// Encoded envelope bytes.
    pub payload: Bytes,
}

/// The bus contract: fire-and-forget publish plus channel subscription.
///
/// Unsubscribing is dropping the receiver.
pub trait Bus: Send + Sync {
    /// Subscribe to a channel, receiving every frame published to it
    /// from this point on.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage>;

    /// Publish a frame to a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the frame. Publishing
    /// to a channel nobody subscribes to is not an error; the frame is
    /// silently dropped (at-most-once delivery).
    fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;
}

/// In-process bus for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct LocalBus {
    channels: parking_lot::RwLock<std::collections::HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl LocalBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<BusMessage> {
        let mut guard = self.channels.write();
        guard
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(channel).subscribe()
    }

    fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let sender = self.sender_for(channel);
        // A send error only means no subscriber is listening right now.
        let _ = sender.send(BusMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Drain a subscription into a router until the subscription closes.
///
/// Frames that fail envelope decoding are logged and dropped; a lagged
/// receiver skips ahead rather than aborting the pump.
pub fn spawn_pump(
    mut rx: broadcast::Receiver<BusMessage>,
    router: Arc<ChannelRouter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(frame) => match Envelope::decode(&frame.payload) {
                    Ok(envelope) => router.dispatch(&frame.channel, &envelope),
                    Err(err) => {
                        tracing::warn!(channel = %frame.channel, error = %err, "dropping malformed frame");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "bus receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageKind};
    use corral_core::Serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("dev.abc");
        bus.publish("dev.abc", Bytes::from_static(b"ping")).unwrap();
        let frame = sub.recv().await.unwrap();
        assert_eq!(frame.channel, "dev.abc");
        assert_eq!(frame.payload, Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_dropped() {
        let bus = LocalBus::new();
        assert!(bus.publish("nobody", Bytes::from_static(b"x")).is_ok());
    }

    #[tokio::test]
    async fn pump_feeds_router_and_drops_garbage() {
        let bus = LocalBus::new();
        let router = Arc::new(ChannelRouter::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = Arc::clone(&hits);
        router.on("dev.abc", MessageKind::ConnectStart, move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        let pump = spawn_pump(bus.subscribe("dev.abc"), Arc::clone(&router));

        // One malformed frame, then one valid one.
        bus.publish("dev.abc", Bytes::from_static(b"garbage"))
            .unwrap();
        let env = Envelope::wrap(
            Message::ConnectStart {
                serial: Serial::from("abc"),
            },
            "api",
        );
        bus.publish("dev.abc", env.encode().unwrap()).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        pump.abort();
    }
}
