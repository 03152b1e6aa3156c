//! Spon speaker server adapter (UDP)
//!
//! Every command is one datagram built by [`SponFrame`]; the server may answer
//! with one datagram. A missing answer is not an error.

use async_trait::async_trait;
use bytes::Bytes;
use spk_core::spon::{SponFrame, Switch, TerminalAction};
use spk_core::{ZoneId, DEFAULT_SERVER_PORT, DEFAULT_RELEASE_TIME};
use spk_transport::udp::{self, UdpConfig, UdpTransport};
use spk_transport::TransportError;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::{Result, SendOutcome, SpeakerServer};

/// Default source terminal id
pub const DEFAULT_TERMINAL: u16 = 1;

/// Spon adapter configuration
#[derive(Debug, Clone)]
pub struct SponConfig {
    /// Server address (`host:port`)
    pub server_addr: String,
    /// Local address to bind, `None` binds the wildcard address of the
    /// server's address family
    pub bind_addr: Option<String>,
    /// Source terminal for terminal control
    pub local_term: u16,
    /// Source terminal for broadcast forms
    pub broadcast_term: u16,
    /// Release time for AUTO actions
    pub release_time: Duration,
    pub udp: UdpConfig,
}

impl Default for SponConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("localhost:{}", DEFAULT_SERVER_PORT),
            bind_addr: None,
            local_term: DEFAULT_TERMINAL,
            broadcast_term: DEFAULT_TERMINAL,
            release_time: Duration::from_secs(DEFAULT_RELEASE_TIME),
            udp: UdpConfig::default(),
        }
    }
}

/// Spon protocol client bound to one server
pub struct SponClient {
    transport: UdpTransport,
    server: SocketAddr,
    local_term: u16,
    broadcast_term: u16,
}

impl SponClient {
    /// Bind the local socket and resolve the server address
    pub async fn bind(config: &SponConfig) -> Result<Self> {
        let server = udp::resolve(&config.server_addr).await?;
        let bind_addr = match &config.bind_addr {
            Some(addr) => addr.as_str(),
            None if server.is_ipv6() => "[::]:0",
            None => "0.0.0.0:0",
        };
        let transport = UdpTransport::bind_with_config(bind_addr, config.udp.clone()).await?;

        info!("Spon client targeting {}", server);

        Ok(Self {
            transport,
            server,
            local_term: config.local_term,
            broadcast_term: config.broadcast_term,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Intercom call/answer/hangup between two terminals.
    /// A `source` of 0 uses the configured local terminal.
    pub async fn terminal_control(
        &self,
        action: TerminalAction,
        dest: u16,
        source: u16,
    ) -> SendOutcome {
        let source = or_default(source, self.local_term);
        debug!("Spon terminal control {:?} {} -> {}", action, source, dest);
        self.exchange(SponFrame::terminal_control(action, dest, source))
            .await
    }

    /// Broadcast to destinations 1-128; others are dropped
    pub async fn broadcast_control<I, D>(&self, switch: Switch, dests: I, source: u16) -> SendOutcome
    where
        I: IntoIterator<Item = D>,
        D: Into<i64>,
    {
        let source = or_default(source, self.broadcast_term);
        self.exchange(SponFrame::broadcast_control(switch, dests, source))
            .await
    }

    /// Broadcast to destinations 1-1000; others are dropped
    pub async fn broadcast_extend<I, D>(&self, switch: Switch, dests: I, source: u16) -> SendOutcome
    where
        I: IntoIterator<Item = D>,
        D: Into<i64>,
    {
        let source = or_default(source, self.broadcast_term);
        self.exchange(SponFrame::broadcast_extend(switch, dests, source))
            .await
    }

    /// Broadcast to one destination in a zone
    pub async fn broadcast_single(&self, switch: Switch, dest: u16, zone: u16) -> SendOutcome {
        self.exchange(SponFrame::broadcast_single(switch, dest, zone))
            .await
    }

    /// Start or stop an alarm task.
    ///
    /// `zone` is not part of the frame and is only logged.
    pub async fn alarm_task(&self, switch: Switch, task: u16, zone: Option<ZoneId>) -> SendOutcome {
        debug!("Spon alarm task {} {} (zone {:?})", switch, task, zone);
        self.exchange(SponFrame::alarm_task(switch, task)).await
    }

    /// Send arbitrary bytes and wait for the reply like any other command
    pub async fn send_raw(&self, data: Bytes) -> SendOutcome {
        self.exchange_bytes(&data).await
    }

    async fn exchange(&self, frame: SponFrame) -> SendOutcome {
        self.exchange_bytes(&frame.encode()).await
    }

    async fn exchange_bytes(&self, data: &[u8]) -> SendOutcome {
        debug!("Spon -> {}: {:02X?}", self.server, data);

        match self.transport.request(data, self.server).await {
            Ok(reply) => {
                debug!("Spon <- {}: {:02X?}", self.server, reply.as_ref());
                SendOutcome::Replied(reply)
            }
            Err(TransportError::Timeout) => {
                debug!("Spon server {} did not reply", self.server);
                SendOutcome::Unconfirmed
            }
            Err(e) => {
                error!("Spon send to {} failed: {}", self.server, e);
                SendOutcome::Failed(e.to_string())
            }
        }
    }
}

fn or_default(source: u16, default: u16) -> u16 {
    if source == 0 {
        default
    } else {
        source
    }
}

/// Spon speaker server: zones are driven as alarm tasks
pub struct SponServer {
    client: SponClient,
    release_time: Duration,
}

impl SponServer {
    pub async fn bind(config: SponConfig) -> Result<Self> {
        let client = SponClient::bind(&config).await?;
        Ok(Self {
            client,
            release_time: config.release_time,
        })
    }

    pub fn client(&self) -> &SponClient {
        &self.client
    }
}

#[async_trait]
impl SpeakerServer for SponServer {
    fn name(&self) -> &str {
        "spon"
    }

    fn release_time(&self) -> Duration {
        self.release_time
    }

    async fn start(&self) -> Result<()> {
        info!("Spon server adapter ready ({})", self.client.server_addr());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!("Spon server adapter stopped");
        Ok(())
    }

    async fn send_start(&self, zone: ZoneId) -> SendOutcome {
        self.client.alarm_task(Switch::Start, zone, Some(zone)).await
    }

    async fn send_stop(&self, zone: ZoneId) -> SendOutcome {
        self.client.alarm_task(Switch::Stop, zone, Some(zone)).await
    }
}
