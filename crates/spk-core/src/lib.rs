//! Speaker Gateway Core
//!
//! Core types and wire frames shared by every speaker-server adapter.
//!
//! This crate provides:
//! - Abstract command types ([`ActionKey`], [`ActionStatus`], [`Command`], [`StateChange`])
//! - Spon broadcast frames and destination bitmaps ([`spon`])
//! - Bosch OIP session frames ([`bosch`])
//! - Modbus/TCP coil frames for ADAM I/O modules ([`modbus`])
//!
//! Everything here is pure: no sockets, no timers.

pub mod action;
pub mod bosch;
pub mod error;
pub mod modbus;
pub mod spon;

pub use action::{ActionKey, ActionStatus, Command, StateChange, ZoneId};
pub use error::{Error, Result};
pub use spon::{DestinationBitmap, Opcode, SponFrame, Switch, TerminalAction};

/// Default speaker server port when the configured URL has none
pub const DEFAULT_SERVER_PORT: u16 = 2048;

/// Default release time for AUTO actions (seconds)
pub const DEFAULT_RELEASE_TIME: u64 = 20;

/// Routing key the gateway consumes commands from
pub const ACTIONS_ROUTING_KEY: &str = "Actions.speaker";

/// Routing key the gateway publishes state changes to
pub const ALARMS_ROUTING_KEY: &str = "Alarms.speaker";
