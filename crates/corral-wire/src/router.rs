//! Per-channel demultiplexer for inbound envelopes.
//!
//! The routing table is owned by the router instance; there is one
//! router per bus connection, constructed and torn down explicitly.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::message::MessageKind;

/// A registered handler. Receives the delivery channel and the envelope.
pub type Handler = Arc<dyn Fn(&str, &Envelope) + Send + Sync>;

/// Token returned by [`ChannelRouter::on`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Entry {
    id: HandlerId,
    kind: MessageKind,
    handler: Handler,
}

#[derive(Default)]
struct RouterInner {
    next_id: u64,
    table: HashMap<String, Vec<Entry>>,
}

/// Dispatches inbound envelopes to handlers registered against a
/// logical channel name and message kind.
///
/// The router is best-effort: envelopes with no matching handler are
/// dropped without error.
#[derive(Default)]
pub struct ChannelRouter {
    inner: Mutex<RouterInner>,
}

impl ChannelRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `(channel, kind)`.
    ///
    /// Multiple handlers may share a channel; they are invoked in
    /// registration order.
    pub fn on<F>(&self, channel: &str, kind: MessageKind, handler: F) -> HandlerId
    where
        F: Fn(&str, &Envelope) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = HandlerId(inner.next_id);
        inner.table.entry(channel.to_string()).or_default().push(Entry {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Deregister a handler. Returns false if it was already gone.
    pub fn off(&self, channel: &str, id: HandlerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.table.get_mut(channel) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            inner.table.remove(channel);
        }
        removed
    }

    /// Dispatch an envelope delivered on `channel` to every matching
    /// handler, synchronously and in registration order.
    ///
    /// The handler list is snapshotted before iterating, so handlers may
    /// register or deregister handlers (including themselves) during
    /// dispatch.
    pub fn dispatch(&self, channel: &str, envelope: &Envelope) {
        let kind = envelope.message.kind();
        let snapshot: Vec<Handler> = {
            let inner = self.inner.lock();
            match inner.table.get(channel) {
                Some(entries) => entries
                    .iter()
                    .filter(|entry| entry.kind == kind)
                    .map(|entry| Arc::clone(&entry.handler))
                    .collect(),
                None => Vec::new(),
            }
        };
        for handler in snapshot {
            handler(channel, envelope);
        }
    }

    /// Number of handlers currently registered on a channel.
    #[must_use]
    pub fn handler_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .table
            .get(channel)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use corral_core::Serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connect_start() -> Envelope {
        Envelope::wrap(
            Message::ConnectStart {
                serial: Serial::from("abc"),
            },
            "api",
        )
    }

    #[test]
    fn dispatch_invokes_matching_handlers_in_order() {
        let router = ChannelRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order1 = Arc::clone(&order);
        router.on("ch", MessageKind::ConnectStart, move |_, _| {
            order1.lock().push(1);
        });
        let order2 = Arc::clone(&order);
        router.on("ch", MessageKind::ConnectStart, move |_, _| {
            order2.lock().push(2);
        });
        // Different kind on the same channel: a per-channel demux.
        let order3 = Arc::clone(&order);
        router.on("ch", MessageKind::DeviceAbsent, move |_, _| {
            order3.lock().push(3);
        });

        router.dispatch("ch", &connect_start());
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn unmatched_envelopes_are_dropped() {
        let router = ChannelRouter::new();
        // No handlers at all: must not panic or error.
        router.dispatch("nowhere", &connect_start());
    }

    #[test]
    fn off_removes_handler() {
        let router = ChannelRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = Arc::clone(&hits);
        let id = router.on("ch", MessageKind::ConnectStart, move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        router.dispatch("ch", &connect_start());
        assert!(router.off("ch", id));
        assert!(!router.off("ch", id));
        router.dispatch("ch", &connect_start());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(router.handler_count("ch"), 0);
    }

    #[test]
    fn handlers_may_mutate_router_during_dispatch() {
        let router = Arc::new(ChannelRouter::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let router2 = Arc::clone(&router);
        let hits2 = Arc::clone(&hits);
        router.on("ch", MessageKind::ConnectStart, move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
            // Registering during dispatch must not deadlock or affect
            // the in-flight snapshot.
            let hits3 = Arc::clone(&hits2);
            router2.on("ch", MessageKind::ConnectStart, move |_, _| {
                hits3.fetch_add(10, Ordering::SeqCst);
            });
        });

        router.dispatch("ch", &connect_start());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // The handler registered mid-dispatch fires on the next one.
        router.dispatch("ch", &connect_start());
        assert!(hits.load(Ordering::SeqCst) >= 12);
    }
}
