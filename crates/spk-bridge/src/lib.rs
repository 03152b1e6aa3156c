//! Speaker Server Adapters
//!
//! Drive speaker zones on legacy PA/intercom servers behind one trait:
//! - Spon (binary UDP datagrams)
//! - Bosch (OIP over a persistent, self-healing TCP session)
//! - Adam (Modbus/TCP relay outputs)

pub mod error;
pub mod traits;

#[cfg(feature = "spon")]
pub mod spon;

#[cfg(feature = "bosch")]
pub mod bosch;

#[cfg(feature = "adam")]
pub mod adam;

pub use error::{BridgeError, Result};
pub use traits::{SendOutcome, SpeakerServer, AUTO_RELEASE_GRACE};

#[cfg(feature = "spon")]
pub use spon::{SponClient, SponConfig, SponServer};

#[cfg(feature = "bosch")]
pub use bosch::{BoschConfig, BoschServer, BoschSession, Connector, SessionState, TcpConnector};

#[cfg(feature = "adam")]
pub use adam::{AdamConfig, AdamServer};
