//! Core types and identifiers for the corral device farm.
//!
//! This crate provides the foundational types used throughout the corral
//! control plane:
//!
//! - **Identifiers**: strongly-typed IDs for devices and device groups
//! - **Users**: the requester reference and privilege tiers consulted by
//!   admission control
//!
//! # Example
//!
//! ```
//! use corral_core::{GroupId, Serial, UserRef};
//!
//! let owner = UserRef::user("tester@example.com", "Tester");
//! let group_id = GroupId::generate(owner.email(), "nightly-run");
//! let serial = Serial::from("emulator-5554");
//! assert_eq!(serial.as_str(), "emulator-5554");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod capabilities;
pub mod ids;
pub mod user;

pub use capabilities::Capabilities;
pub use ids::{GroupId, IdError, Serial};
pub use user::{Privilege, UserRef};
