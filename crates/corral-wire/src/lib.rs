//! Message bus, routing and request/reply correlation for corral.
//!
//! This crate turns a fire-and-forget publish/subscribe bus into a
//! request/reply protocol:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Transactor                         │
//! │   mint reply channel → subscribe → arm deadline →        │
//! │   publish → first matching reply OR timeout              │
//! └──────────────────────────────────────────────────────────┘
//!                 │                         │
//!                 ▼                         ▼
//!        ┌────────────────┐       ┌────────────────┐
//!        │ ChannelRouter  │       │      Bus       │
//!        │ (per-channel   │◄──────│  (LocalBus /   │
//!        │  demultiplexer)│ pump  │   transport)   │
//!        └────────────────┘       └────────────────┘
//! ```
//!
//! Envelopes wrap a typed [`Message`] with routing metadata; the
//! [`ChannelRouter`] dispatches inbound envelopes to handlers keyed by
//! `(channel, message kind)`; the [`Transactor`] correlates each
//! outbound command with the single reply that answers it, under a
//! deadline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod envelope;
pub mod error;
pub mod message;
pub mod router;
pub mod txn;

pub use bus::{spawn_pump, Bus, BusMessage, LocalBus};
pub use envelope::Envelope;
pub use error::{Result, WireError};
pub use message::{Message, MessageKind};
pub use router::{ChannelRouter, HandlerId};
pub use txn::Transactor;

/// The well-known channel every control-plane node and agent listens on.
pub const GLOBAL_CHANNEL: &str = "*ALL";
