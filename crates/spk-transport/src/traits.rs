//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// Data received
    Data(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send data
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the sender (and the underlying connection)
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event, `None` once the transport is gone
    async fn recv(&mut self) -> Option<TransportEvent>;
}
