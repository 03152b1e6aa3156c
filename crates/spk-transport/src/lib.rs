//! Speaker Gateway Transport Layer
//!
//! This crate provides the transports the device adapters speak over:
//! - UDP (request/reply with a bounded wait, for Spon servers)
//! - TCP (raw unframed byte stream, for Bosch OIP sessions and Modbus/TCP)

pub mod error;
pub mod traits;

#[cfg(feature = "udp")]
pub mod udp;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use error::{Result, TransportError};
pub use traits::{TransportEvent, TransportReceiver, TransportSender};

#[cfg(feature = "udp")]
pub use udp::{UdpConfig, UdpTransport};

#[cfg(feature = "tcp")]
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer, TcpTransport};
