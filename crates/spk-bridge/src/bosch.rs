//! Bosch speaker server adapter (OIP over a persistent TCP session)
//!
//! The session is an actor task that owns the connection. It:
//! - polls for a connection every `reconnect_interval` while disconnected,
//!   running each attempt as its own task so commands and keepalives never wait
//!   on a hanging connect
//! - sends the login frame once per established connection
//! - sends a keepalive on a fixed schedule whenever a connection is present
//! - drops the connection on peer close or write failure and reconnects on the
//!   next poll
//!
//! Callers talk to the actor through [`BoschSession`], a cheap cloneable handle.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use spk_core::bosch::{self, OipHeader};
use spk_core::{ZoneId, DEFAULT_RELEASE_TIME, DEFAULT_SERVER_PORT};
use spk_transport::tcp::{TcpConfig, TcpTransport};
use spk_transport::{TransportError, TransportEvent, TransportReceiver, TransportSender};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{Result, SendOutcome, SpeakerServer};

/// An established connection as seen by the session
pub type Connection = (Box<dyn TransportSender>, Box<dyn TransportReceiver>);

/// Opens connections for the session
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> spk_transport::Result<Connection>;
}

/// Raw TCP connector
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    transport: TcpTransport,
}

impl TcpConnector {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            transport: TcpTransport::with_config(config),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> spk_transport::Result<Connection> {
        let (sender, receiver) = self.transport.connect(addr).await?;
        Ok((Box::new(sender), Box::new(receiver)))
    }
}

/// Bosch adapter configuration
#[derive(Debug, Clone)]
pub struct BoschConfig {
    /// Server address (`host:port`)
    pub server_addr: String,
    pub user: String,
    pub passwd: String,
    /// Release time for AUTO actions
    pub release_time: Duration,
    /// Connection poll period; the first poll happens one period after start
    pub reconnect_interval: Duration,
    /// Delay before the first keepalive
    pub keepalive_delay: Duration,
    pub keepalive_interval: Duration,
    /// Upper bound on one connect attempt
    pub connect_timeout: Option<Duration>,
}

impl Default for BoschConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("localhost:{}", DEFAULT_SERVER_PORT),
            user: "admin".to_string(),
            passwd: "admin".to_string(),
            release_time: Duration::from_secs(DEFAULT_RELEASE_TIME),
            reconnect_interval: Duration::from_secs(5),
            keepalive_delay: Duration::from_secs(6),
            keepalive_interval: Duration::from_secs(5),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Connected => f.write_str("connected"),
        }
    }
}

enum SessionCommand {
    Send {
        frame: Bytes,
        reply: oneshot::Sender<SendOutcome>,
    },
    Shutdown,
}

/// Handle to a running session actor
#[derive(Clone)]
pub struct BoschSession {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BoschSession {
    /// Spawn the session actor on the current runtime.
    ///
    /// Fails only when the credentials do not fit into a login frame.
    pub fn spawn(config: BoschConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let login = bosch::login_frame(&config.user, &config.passwd)?;
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let actor = SessionActor {
            config,
            connector,
            login,
            state: state_tx,
            link: None,
            generation: 0,
        };
        let task = tokio::spawn(actor.run(commands_rx));

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Current connection state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Write a frame on the current connection.
    ///
    /// Never waits for a connection: without one the result is
    /// [`SendOutcome::Failed`].
    pub async fn send(&self, frame: Bytes) -> SendOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = SessionCommand::Send {
            frame,
            reply: reply_tx,
        };

        if self.commands.send(command).await.is_err() {
            return SendOutcome::Failed("session stopped".to_string());
        }
        reply_rx
            .await
            .unwrap_or_else(|_| SendOutcome::Failed("session stopped".to_string()))
    }

    /// Stop the actor and close any connection
    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

type ConnectResult = spk_transport::Result<Connection>;

struct Link {
    sender: Box<dyn TransportSender>,
    reader: JoinHandle<()>,
}

struct SessionActor {
    config: BoschConfig,
    connector: Arc<dyn Connector>,
    login: Bytes,
    state: watch::Sender<SessionState>,
    link: Option<Link>,
    generation: u64,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let start = Instant::now();
        let mut reconnect = interval_at(
            start + self.config.reconnect_interval,
            self.config.reconnect_interval,
        );
        reconnect.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keepalive = interval_at(
            start + self.config.keepalive_delay,
            self.config.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (connect_tx, mut connect_rx) = mpsc::channel::<ConnectResult>(4);
        let (event_tx, mut event_rx) = mpsc::channel::<(u64, TransportEvent)>(64);

        info!("Bosch session started for {}", self.config.server_addr);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Send { frame, reply }) => {
                            let outcome = self.write(frame).await;
                            let _ = reply.send(outcome);
                        }
                        Some(SessionCommand::Shutdown) | None => break,
                    }
                }

                _ = reconnect.tick() => {
                    if *self.state.borrow() == SessionState::Disconnected {
                        self.spawn_connect(connect_tx.clone());
                    }
                }

                Some(result) = connect_rx.recv() => {
                    self.on_connect(result, event_tx.clone()).await;
                }

                _ = keepalive.tick() => {
                    if self.link.is_some() {
                        debug!("Bosch keepalive");
                        if let SendOutcome::Failed(reason) = self.write(bosch::keepalive_frame()).await {
                            warn!("Bosch keepalive failed: {}", reason);
                        }
                    }
                }

                Some((generation, event)) = event_rx.recv() => {
                    if generation == self.generation {
                        self.on_event(event).await;
                    }
                }
            }
        }

        self.drop_link().await;
        info!("Bosch session stopped");
    }

    fn spawn_connect(&mut self, results: mpsc::Sender<ConnectResult>) {
        self.state.send_replace(SessionState::Connecting);
        info!("Bosch connecting to {}", self.config.server_addr);

        let connector = self.connector.clone();
        let addr = self.config.server_addr.clone();
        let timeout = self.config.connect_timeout;

        tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, connector.connect(&addr))
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => connector.connect(&addr).await,
            };
            let _ = results.send(result).await;
        });
    }

    async fn on_connect(
        &mut self,
        result: ConnectResult,
        events: mpsc::Sender<(u64, TransportEvent)>,
    ) {
        let (sender, mut receiver) = match result {
            Ok(connection) => connection,
            Err(e) => {
                error!("Bosch connect to {} failed: {}", self.config.server_addr, e);
                self.state.send_replace(SessionState::Disconnected);
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let reader = tokio::spawn(async move {
            loop {
                let event = receiver
                    .recv()
                    .await
                    .unwrap_or(TransportEvent::Disconnected { reason: None });
                let last = matches!(
                    event,
                    TransportEvent::Disconnected { .. } | TransportEvent::Error(_)
                );
                if events.send((generation, event)).await.is_err() || last {
                    break;
                }
            }
        });

        self.link = Some(Link { sender, reader });
        self.state.send_replace(SessionState::Connected);
        info!("Bosch connected to {}", self.config.server_addr);

        if let SendOutcome::Failed(reason) = self.write(self.login.clone()).await {
            warn!("Bosch login failed: {}", reason);
        }
    }

    async fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Data(data) => match OipHeader::parse(&data[..]) {
                Ok(header) => debug!(
                    "Bosch <- {} ({} bytes): {:02X?}",
                    header.type_name(),
                    header.length,
                    data.as_ref()
                ),
                Err(_) => debug!("Bosch <- {:02X?}", data.as_ref()),
            },
            TransportEvent::Disconnected { reason } => {
                warn!(
                    "Bosch connection lost: {}",
                    reason.as_deref().unwrap_or("closed by peer")
                );
                self.drop_link().await;
            }
            TransportEvent::Error(e) => {
                error!("Bosch connection error: {}", e);
                self.drop_link().await;
            }
        }
    }

    async fn write(&mut self, frame: Bytes) -> SendOutcome {
        let Some(link) = self.link.as_ref() else {
            error!("Bosch server not connected, dropping {} bytes", frame.len());
            return SendOutcome::Failed("not connected".to_string());
        };

        debug!("Bosch -> {:02X?}", frame.as_ref());
        match link.sender.send(frame).await {
            Ok(()) => SendOutcome::Unconfirmed,
            Err(e) => {
                error!("Bosch write failed: {}", e);
                self.drop_link().await;
                SendOutcome::Failed(e.to_string())
            }
        }
    }

    async fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.reader.abort();
            let _ = link.sender.close().await;
        }
        self.state.send_replace(SessionState::Disconnected);
    }
}

/// Bosch speaker server: start opens a call, stop has no wire command
pub struct BoschServer {
    config: BoschConfig,
    connector: Arc<dyn Connector>,
    session: Mutex<Option<BoschSession>>,
}

impl BoschServer {
    pub fn new(config: BoschConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector::default()))
    }

    pub fn with_connector(config: BoschConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            session: Mutex::new(None),
        }
    }

    /// Running session, if started
    pub fn session(&self) -> Option<BoschSession> {
        self.session.lock().clone()
    }
}

#[async_trait]
impl SpeakerServer for BoschServer {
    fn name(&self) -> &str {
        "bosch"
    }

    fn release_time(&self) -> Duration {
        self.config.release_time
    }

    async fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_none() {
            *session = Some(BoschSession::spawn(
                self.config.clone(),
                self.connector.clone(),
            )?);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.shutdown().await;
        }
        Ok(())
    }

    async fn send_start(&self, zone: ZoneId) -> SendOutcome {
        let Some(session) = self.session() else {
            error!("Bosch session not started, cannot start zone {}", zone);
            return SendOutcome::Failed("session not started".to_string());
        };
        debug!("Bosch start call for zone {}", zone);
        session.send(bosch::start_call_frame()).await
    }

    async fn send_stop(&self, zone: ZoneId) -> SendOutcome {
        debug!("Bosch has no stop command, zone {} released locally", zone);
        SendOutcome::Skipped
    }
}
