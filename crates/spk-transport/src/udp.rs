//! UDP transport implementation
//!
//! Speaker servers on UDP answer each command datagram with (at most) one
//! reply datagram. [`UdpTransport::request`] sends and then waits a bounded
//! time for that reply; the wait is async and never blocks the runtime.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// UDP configuration
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Largest reply accepted; longer datagrams are truncated
    pub recv_buffer_size: usize,
    /// How long [`UdpTransport::request`] waits for a reply
    pub reply_timeout: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 1024,
            reply_timeout: Duration::from_millis(100),
        }
    }
}

/// Resolve `host:port` to the first socket address
pub async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(addr.to_string()))
}

/// UDP transport (connectionless)
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    config: UdpConfig,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, UdpConfig::default()).await
    }

    /// Bind with config
    pub async fn bind_with_config(addr: &str, config: UdpConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        if let Ok(local) = socket.local_addr() {
            info!("UDP bound to {}", local);
        }

        Ok(Self {
            socket: Arc::new(socket),
            config,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    /// Send to a specific address
    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        self.socket
            .send_to(data, target)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Receive the next datagram
    pub async fn recv_from(&self) -> Result<(Bytes, SocketAddr)> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        buf.truncate(len);
        Ok((Bytes::from(buf), from))
    }

    /// Drop datagrams already queued, such as late replies to requests that
    /// timed out, so they are not taken for the next reply
    fn discard_pending(&self) {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        while let Ok((len, from)) = self.socket.try_recv_from(&mut buf) {
            debug!("UDP discarding stale {} bytes from {}", len, from);
        }
    }

    /// Send `data` to `target` and wait up to `reply_timeout` for its reply.
    ///
    /// Datagrams from other peers are skipped. Returns
    /// [`TransportError::Timeout`] when nothing arrives in time.
    pub async fn request(&self, data: &[u8], target: SocketAddr) -> Result<Bytes> {
        self.discard_pending();
        self.send_to(data, target).await?;
        debug!("UDP sent {} bytes to {}", data.len(), target);

        let wait = async {
            loop {
                let (reply, from) = self.recv_from().await?;
                if from == target {
                    return Ok::<_, TransportError>(reply);
                }
                debug!("UDP ignoring {} bytes from unexpected peer {}", reply.len(), from);
            }
        };

        tokio::time::timeout(self.config.reply_timeout, wait)
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}
