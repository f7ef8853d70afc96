//! Request/reply correlation over the one-way bus.
//!
//! Each call mints a single-use reply channel, subscribes to it, arms a
//! deadline, publishes the command, and resolves to the first matching
//! reply or a timeout. Exactly one of {resolve, timeout} ever fires per
//! call; the loser of the race is a no-op.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::bus::{spawn_pump, Bus};
use crate::envelope::Envelope;
use crate::error::{Result, WireError};
use crate::message::{Message, MessageKind};
use crate::router::ChannelRouter;

/// One outstanding transaction, keyed by its reply channel.
///
/// The oneshot sender is the settle flag: whichever of `complete` or
/// `expire` takes it first wins, the other finds it gone. The armed
/// sleep in [`Transactor::call`] embodies the deadline.
struct PendingTransaction {
    reply: Option<oneshot::Sender<Message>>,
}

/// Table of outstanding transactions.
///
/// An entry is removed the instant its call resolves or times out,
/// never both.
#[derive(Default)]
struct PendingTable {
    inner: Mutex<HashMap<String, PendingTransaction>>,
}

impl PendingTable {
    fn insert(&self, reply_channel: String, sender: oneshot::Sender<Message>) {
        self.inner.lock().insert(
            reply_channel,
            PendingTransaction {
                reply: Some(sender),
            },
        );
    }

    /// Resolve a transaction with a reply. Returns false if it was
    /// already settled (idempotent).
    fn complete(&self, reply_channel: &str, message: Message) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(reply_channel).and_then(|txn| txn.reply.take()) {
            Some(sender) => {
                // The receiver may already be gone; that still counts
                // as settled.
                let _ = sender.send(message);
                true
            }
            None => false,
        }
    }

    /// Mark a transaction timed out. Returns false if it was already
    /// settled (idempotent).
    fn expire(&self, reply_channel: &str) -> bool {
        let mut inner = self.inner.lock();
        inner
            .get_mut(reply_channel)
            .and_then(|txn| txn.reply.take())
            .is_some()
    }

    fn remove(&self, reply_channel: &str) {
        self.inner.lock().remove(reply_channel);
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// The request/reply veneer over the publish/subscribe bus.
///
/// The correlator performs no retries; retry policy, if any, belongs to
/// the caller.
pub struct Transactor {
    bus: Arc<dyn Bus>,
    router: Arc<ChannelRouter>,
    origin_channel: String,
    pending: Arc<PendingTable>,
}

impl Transactor {
    /// Create a correlator publishing from the given origin channel.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, router: Arc<ChannelRouter>, origin_channel: impl Into<String>) -> Self {
        Self {
            bus,
            router,
            origin_channel: origin_channel.into(),
            pending: Arc::new(PendingTable::default()),
        }
    }

    /// Number of transactions currently awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send `message` to `target_channel` and await the first reply of
    /// `reply_kind` accepted by `matcher`, or fail with
    /// [`WireError::Timeout`] once `timeout` elapses.
    ///
    /// The reply subscription and router handler are released on every
    /// exit path. A reply arriving after the deadline finds no handler
    /// and is dropped; callers must treat a timeout as "outcome
    /// unknown", not "definitely failed".
    ///
    /// # Errors
    ///
    /// - [`WireError::Timeout`]: the agent stayed silent.
    /// - [`WireError::Disconnected`]: the bus subscription was lost;
    ///   callers treat this like a timeout.
    /// - [`WireError::InvalidPayload`]: the command could not be
    ///   encoded.
    pub async fn call<F>(
        &self,
        target_channel: &str,
        message: Message,
        reply_kind: MessageKind,
        matcher: F,
        timeout: Duration,
    ) -> Result<Message>
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let (envelope, reply_channel) = Envelope::wrap_with_reply(message, self.origin_channel.clone());

        // Subscribe before publishing so the reply cannot slip past.
        let rx = self.bus.subscribe(&reply_channel);
        let pump = spawn_pump(rx, Arc::clone(&self.router));

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(reply_channel.clone(), reply_tx);

        let pending = Arc::clone(&self.pending);
        let settle_channel = reply_channel.clone();
        let handler_id = self.router.on(&reply_channel, reply_kind, move |_, env| {
            if matcher(&env.message) {
                pending.complete(&settle_channel, env.message.clone());
            }
        });

        let outcome = match envelope
            .encode()
            .and_then(|frame| self.bus.publish(target_channel, frame))
        {
            Ok(()) => {
                tokio::select! {
                    // Prefer a reply that is ready in the same tick the
                    // deadline fires.
                    biased;
                    reply = reply_rx => reply.map_err(|_| WireError::Disconnected),
                    () = tokio::time::sleep(timeout) => {
                        self.pending.expire(&reply_channel);
                        Err(WireError::Timeout)
                    }
                }
            }
            Err(err) => Err(err),
        };

        // Cleanup on every exit path: a leaked subscription wastes a
        // channel and risks cross-talk if its name is ever reused.
        self.router.off(&reply_channel, handler_id);
        self.pending.remove(&reply_channel);
        pump.abort();

        outcome
    }
}
