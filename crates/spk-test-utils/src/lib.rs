//! Common test helpers and utilities for speaker gateway tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps, works with paused time)
//! - Fake speaker servers over UDP and TCP that record what they receive
//! - A scriptable session connector for the Bosch adapter
//! - Collectors for published values

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use spk_bridge::bosch::{Connection, Connector};
use spk_transport::{TransportError, TransportEvent, TransportReceiver, TransportSender};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Collector - for verifying published values
// ============================================================================

/// Thread-safe collector for values handed to a callback
#[derive(Clone)]
pub struct Collector<T> {
    values: Arc<Mutex<Vec<T>>>,
    count: Arc<AtomicU32>,
}

impl<T: Clone + Send + 'static> Collector<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Create a callback that records every value
    pub fn callback(&self) -> impl Fn(T) + Send + Sync + 'static {
        let values = self.values.clone();
        let count = self.count.clone();

        move |value| {
            values.lock().push(value);
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Get the count of received values
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n values to be received
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// Get all collected values
    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    /// Get the last value received
    pub fn last(&self) -> Option<T> {
        self.values.lock().last().cloned()
    }
}

impl<T: Clone + Send + 'static> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Fake UDP speaker server
// ============================================================================

/// UDP server that records datagrams and optionally answers each one.
/// Stops on drop.
pub struct UdpRecorder {
    addr: SocketAddr,
    received: Collector<Bytes>,
    handle: Option<JoinHandle<()>>,
}

impl UdpRecorder {
    /// Record without answering
    pub async fn silent() -> Self {
        Self::start("127.0.0.1:0", None).await
    }

    /// Record without answering on a specific local address
    pub async fn silent_at(bind: &str) -> Self {
        Self::start(bind, None).await
    }

    /// Answer every datagram with `reply`
    pub async fn replying(reply: &'static [u8]) -> Self {
        Self::start("127.0.0.1:0", Some(Bytes::from_static(reply))).await
    }

    async fn start(bind: &str, reply: Option<Bytes>) -> Self {
        let socket = UdpSocket::bind(bind).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let received = Collector::new();
        let record = received.callback();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                record(Bytes::copy_from_slice(&buf[..len]));
                if let Some(reply) = &reply {
                    let _ = socket.send_to(reply, from).await;
                }
            }
        });

        Self {
            addr,
            received,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Datagrams received so far
    pub fn received(&self) -> Vec<Bytes> {
        self.received.values()
    }

    pub async fn wait_for_count(&self, n: u32) -> bool {
        self.received.wait_for_count(n, DEFAULT_TIMEOUT).await
    }
}

impl Drop for UdpRecorder {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Fake TCP speaker server
// ============================================================================

/// How a [`TcpRecorder`] answers incoming chunks
#[derive(Debug, Clone)]
pub enum ReplyMode {
    Silent,
    /// Write every chunk back
    Echo,
    /// Answer every chunk with fixed bytes
    Fixed(Bytes),
}

/// TCP server that records every chunk it reads, across connections.
/// Stops on drop.
pub struct TcpRecorder {
    addr: SocketAddr,
    received: Collector<Bytes>,
    connections: Arc<AtomicU32>,
    kick: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl TcpRecorder {
    pub async fn start(mode: ReplyMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Collector::new();
        let connections = Arc::new(AtomicU32::new(0));
        let kick = Arc::new(Notify::new());

        let record = Arc::new(received.callback());
        let accepted = connections.clone();
        let kicked = kick.clone();

        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let record = record.clone();
                let mode = mode.clone();
                let kicked = kicked.clone();

                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        tokio::select! {
                            read = stream.read(&mut buf) => {
                                let len = match read {
                                    Ok(0) | Err(_) => break,
                                    Ok(len) => len,
                                };
                                let chunk = Bytes::copy_from_slice(&buf[..len]);
                                record(chunk.clone());
                                let answer = match &mode {
                                    ReplyMode::Silent => None,
                                    ReplyMode::Echo => Some(chunk),
                                    ReplyMode::Fixed(reply) => Some(reply.clone()),
                                };
                                if let Some(answer) = answer {
                                    if stream.write_all(&answer).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            _ = kicked.notified() => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            received,
            connections,
            kick,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Chunks read so far, in arrival order
    pub fn received(&self) -> Vec<Bytes> {
        self.received.values()
    }

    /// Everything read so far, concatenated
    pub fn received_bytes(&self) -> Vec<u8> {
        self.received.values().concat()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.connections, n, max_wait).await
    }

    pub async fn wait_for_count(&self, n: u32) -> bool {
        self.received.wait_for_count(n, DEFAULT_TIMEOUT).await
    }

    /// Close every open connection from the server side
    pub fn drop_connections(&self) {
        self.kick.notify_waiters();
    }
}

impl Drop for TcpRecorder {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Scriptable session connector
// ============================================================================

/// Test side of a connection handed out by [`MockConnector`]
pub struct MockLink {
    /// Frames the session wrote
    pub sent: mpsc::UnboundedReceiver<Bytes>,
    /// Inject events the session reads
    pub events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
}

impl MockLink {
    /// Frames written so far, without waiting
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Simulate the peer closing the connection
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Disconnected { reason: None });
    }

    /// Whether the session still holds this connection open
    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct MockSender {
    tx: mpsc::UnboundedSender<Bytes>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSender for MockSender {
    async fn send(&self, data: Bytes) -> spk_transport::Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(data)
            .map_err(|_| TransportError::SendFailed("link dropped".into()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> spk_transport::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MockReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[derive(Default)]
struct MockState {
    refuse: bool,
    attempts: u32,
    links: VecDeque<MockLink>,
}

/// Connector that hands out in-memory links, or refuses on demand
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make following connect attempts fail (or succeed again)
    pub fn refuse(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Connect attempts so far
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Oldest link not yet taken by the test
    pub fn take_link(&self) -> Option<MockLink> {
        self.state.lock().links.pop_front()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, addr: &str) -> spk_transport::Result<Connection> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if state.refuse {
            return Err(TransportError::ConnectionFailed(format!(
                "{}: connection refused",
                addr
            )));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        state.links.push_back(MockLink {
            sent: sent_rx,
            events: events_tx,
            connected: connected.clone(),
        });

        let sender = MockSender {
            tx: sent_tx,
            connected,
        };
        let receiver = MockReceiver { rx: events_rx };
        Ok((Box::new(sender), Box::new(receiver)))
    }
}
