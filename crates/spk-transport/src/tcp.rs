//! TCP transport implementation
//!
//! Raw TCP transport: bytes are written verbatim and whatever arrives is
//! surfaced as [`TransportEvent::Data`] chunks. Device protocols on top of it
//! (Bosch OIP, Modbus/TCP) carry their own length fields.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender};

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 256;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8192,
            keepalive_secs: 30,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// TCP transport
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Connect to a TCP server
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver)> {
        debug!("Connecting to TCP: {}", addr);

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // Enable TCP keepalive if configured
        if self.config.keepalive_secs > 0 {
            let socket = socket2::SockRef::from(&stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(self.config.keepalive_secs));
            let _ = socket.set_tcp_keepalive(&keepalive);
        }

        info!("TCP connected to {}", addr);
        Ok(spawn_connection(stream, self.config.read_buffer_size))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a stream into a sender/receiver pair driven by a background IO task
fn spawn_connection(stream: TcpStream, read_buffer_size: usize) -> (TcpSender, TcpReceiver) {
    let connected = Arc::new(Mutex::new(true));
    let closed = Arc::new(Notify::new());
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(DEFAULT_CHANNEL_BUFFER_SIZE);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(DEFAULT_CHANNEL_BUFFER_SIZE);

    let sender = TcpSender {
        tx: outgoing_tx,
        connected: connected.clone(),
        closed: closed.clone(),
    };
    let receiver = TcpReceiver { rx: incoming_rx };

    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        run_tcp_io_loop(
            reader,
            writer,
            outgoing_rx,
            incoming_tx,
            read_buffer_size,
            connected,
            closed,
        )
        .await;
    });

    (sender, receiver)
}

/// Shared IO loop for TCP connections
async fn run_tcp_io_loop(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<Bytes>,
    incoming_tx: mpsc::Sender<TransportEvent>,
    read_buffer_size: usize,
    connected: Arc<Mutex<bool>>,
    closed: Arc<Notify>,
) {
    let mut read_buf = BytesMut::with_capacity(read_buffer_size);

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => {
                let Some(data) = outgoing else {
                    debug!("TCP sender dropped, closing connection");
                    break;
                };
                if let Err(e) = writer.write_all(&data).await {
                    error!("TCP write error: {}", e);
                    let _ = incoming_tx.send(TransportEvent::Disconnected {
                        reason: Some(e.to_string()),
                    }).await;
                    break;
                }
            }

            result = reader.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!("TCP connection closed by peer");
                        let _ = incoming_tx.send(TransportEvent::Disconnected { reason: None }).await;
                        break;
                    }
                    Ok(_) => {
                        let data = read_buf.split().freeze();
                        if incoming_tx.send(TransportEvent::Data(data)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("TCP read error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }

            _ = closed.notified() => {
                debug!("TCP connection closed locally");
                break;
            }
        }
    }

    *connected.lock() = false;
    let _ = writer.shutdown().await;
}

/// TCP sender for writing raw bytes
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<Mutex<bool>>,
    closed: Arc<Notify>,
}

#[async_trait]
impl TransportSender for TcpSender {
    /// Queue `data` for the IO task. Fails instead of waiting when the peer
    /// has stopped reading and the queue is full.
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::SendFailed("send queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::SendFailed("Channel closed".into())
            }
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.closed.notify_one();
        Ok(())
    }
}

/// TCP receiver for reading raw chunks
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// TCP server for accepting connections (device simulators, echo servers)
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", addr);

        Ok(Self { listener, config })
    }

    /// Accept a new connection
    pub async fn accept(&self) -> Result<(TcpSender, TcpReceiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        info!("TCP connection accepted from {}", peer_addr);

        let (sender, receiver) = spawn_connection(stream, self.config.read_buffer_size);
        Ok((sender, receiver, peer_addr))
    }

    /// Get the local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.keepalive_secs, 30);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_tcp_raw_echo() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let accept_handle = tokio::spawn(async move {
            let (sender, mut receiver, _peer) = server.accept().await.unwrap();
            if let Some(TransportEvent::Data(data)) = receiver.recv().await {
                sender.send(data).await.unwrap();
            }
            (sender, receiver)
        });

        let (client_sender, mut client_receiver) =
            TcpTransport::new().connect(&addr.to_string()).await.unwrap();

        // raw bytes, no length prefix on the wire
        let payload = Bytes::from_static(&[0x27, 0x70, 0x44, 0x00]);
        client_sender.send(payload.clone()).await.unwrap();

        match timeout(Duration::from_secs(2), client_receiver.recv()).await {
            Ok(Some(TransportEvent::Data(received))) => assert_eq!(received, payload),
            other => panic!("Expected Data event, got {:?}", other),
        }

        client_sender.close().await.unwrap();
        assert!(!client_sender.is_connected());
        let _ = accept_handle.await;
    }

    #[tokio::test]
    async fn test_tcp_peer_close_reports_disconnect() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let accept_handle = tokio::spawn(async move {
            let (sender, _receiver, _peer) = server.accept().await.unwrap();
            sender.close().await.unwrap();
        });

        let (_client_sender, mut client_receiver) =
            TcpTransport::new().connect(&addr.to_string()).await.unwrap();
        accept_handle.await.unwrap();

        match timeout(Duration::from_secs(2), client_receiver.recv()).await {
            Ok(Some(TransportEvent::Disconnected { .. })) => {}
            other => panic!("Expected Disconnected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tcp_send_fails_fast_when_peer_stalls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_handle = tokio::spawn(async move { listener.accept().await.unwrap() });

        let (sender, _receiver) = TcpTransport::new().connect(&addr.to_string()).await.unwrap();
        // held open, never read
        let _peer = accept_handle.await.unwrap();

        let frame = Bytes::from(vec![0u8; 64 * 1024]);
        let mut refused = None;
        for queued in 0..10_000usize {
            let result = timeout(Duration::from_secs(1), sender.send(frame.clone()))
                .await
                .expect("send waited on a stalled peer");
            if let Err(e) = result {
                refused = Some((queued, e));
                break;
            }
        }

        let (queued, err) = refused.expect("send queue never filled");
        assert!(queued >= DEFAULT_CHANNEL_BUFFER_SIZE);
        assert!(matches!(err, TransportError::SendFailed(_)));
        assert!(sender.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TcpTransport::new().connect(&addr.to_string()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }
}
