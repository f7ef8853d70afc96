//! Group lease manager and command dispatch for the corral device farm.
//!
//! The control plane sits between API callers and the device agents on
//! the bus. It admits lease requests against quotas, reserves devices
//! all-or-nothing through the registry, walks each group through its
//! lifecycle, and relays commands (join, connect, install) to agents
//! with per-command deadlines.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dispatch;
pub mod error;
pub mod events;
pub mod group;
pub mod lifecycle;
pub mod schedule;
pub mod service;
pub mod types;

pub use dispatch::CommandDispatcher;
pub use error::{ControlError, Result};
pub use events::{EventHub, LifecycleEvent};
pub use group::Group;
pub use lifecycle::{is_terminal, is_valid_transition, may_own_devices, GroupState};
pub use schedule::{Interval, Schedule, ScheduleClass};
pub use service::{LeaseControl, LeaseService};
pub use types::{CaptureRequest, CommandOutcome, DispatchConfig, LeaseConfig};
