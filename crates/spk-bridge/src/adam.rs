//! Adam speaker server adapter (Modbus/TCP digital outputs)
//!
//! Each zone is wired to one relay output. A command opens a short-lived
//! connection, writes the coil, and waits briefly for the echo.

use async_trait::async_trait;
use bytes::BytesMut;
use spk_core::modbus::{CoilResponse, WriteCoil};
use spk_core::{ZoneId, DEFAULT_RELEASE_TIME, DEFAULT_SERVER_PORT};
use spk_transport::tcp::{TcpConfig, TcpTransport};
use spk_transport::{TransportEvent, TransportReceiver, TransportSender};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{Result, SendOutcome, SpeakerServer};

/// Coil of the first digital output on ADAM-6000 modules
pub const DEFAULT_COIL_OFFSET: u16 = 16;

/// Adam adapter configuration
#[derive(Debug, Clone)]
pub struct AdamConfig {
    /// Server address (`host:port`)
    pub server_addr: String,
    pub unit_id: u8,
    /// Coil driven by zone 1
    pub coil_offset: u16,
    /// Release time for AUTO actions
    pub release_time: Duration,
    /// How long to wait for the write echo
    pub reply_timeout: Duration,
    pub tcp: TcpConfig,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("localhost:{}", DEFAULT_SERVER_PORT),
            unit_id: 1,
            coil_offset: DEFAULT_COIL_OFFSET,
            release_time: Duration::from_secs(DEFAULT_RELEASE_TIME),
            reply_timeout: Duration::from_secs(1),
            tcp: TcpConfig::default(),
        }
    }
}

/// Adam speaker server
pub struct AdamServer {
    config: AdamConfig,
    transport: TcpTransport,
    transaction: AtomicU16,
}

impl AdamServer {
    pub fn new(config: AdamConfig) -> Self {
        let transport = TcpTransport::with_config(config.tcp.clone());
        Self {
            config,
            transport,
            transaction: AtomicU16::new(1),
        }
    }

    /// Coil address for a zone, `None` when it falls outside the address space
    pub fn coil_for(&self, zone: ZoneId) -> Option<u16> {
        zone.checked_sub(1)?.checked_add(self.config.coil_offset)
    }

    async fn write_coil(&self, zone: ZoneId, on: bool) -> SendOutcome {
        let Some(address) = self.coil_for(zone) else {
            warn!("Adam zone {} has no coil", zone);
            return SendOutcome::Failed(format!("zone {} out of coil range", zone));
        };

        let request = WriteCoil {
            transaction_id: self.transaction.fetch_add(1, Ordering::Relaxed),
            unit_id: self.config.unit_id,
            address,
            on,
        };

        let (sender, mut receiver) = match self.transport.connect(&self.config.server_addr).await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Adam connect to {} failed: {}", self.config.server_addr, e);
                return SendOutcome::Failed(e.to_string());
            }
        };

        debug!("Adam -> coil {} = {} ({:?})", address, on, request);
        let outcome = match sender.send(request.encode()).await {
            Ok(()) => self.await_echo(&mut receiver, request).await,
            Err(e) => {
                error!("Adam write failed: {}", e);
                SendOutcome::Failed(e.to_string())
            }
        };

        let _ = sender.close().await;
        outcome
    }

    async fn await_echo(
        &self,
        receiver: &mut impl TransportReceiver,
        request: WriteCoil,
    ) -> SendOutcome {
        let mut buf = BytesMut::new();

        let wait = async {
            while let Some(event) = receiver.recv().await {
                match event {
                    TransportEvent::Data(data) => {
                        buf.extend_from_slice(&data);
                        match CoilResponse::decode(&buf[..]) {
                            Err(spk_core::Error::BufferTooSmall { .. }) => continue,
                            Ok(CoilResponse::Written { .. }) => {
                                return SendOutcome::Replied(buf.split().freeze());
                            }
                            Ok(CoilResponse::Exception { code, .. }) => {
                                warn!("Adam exception {:#04x} for coil {}", code, request.address);
                                return SendOutcome::Failed(format!("modbus exception {:#04x}", code));
                            }
                            Err(e) => {
                                warn!("Adam sent an unexpected reply: {}", e);
                                return SendOutcome::Unconfirmed;
                            }
                        }
                    }
                    TransportEvent::Disconnected { .. } | TransportEvent::Error(_) => break,
                }
            }
            SendOutcome::Unconfirmed
        };

        tokio::time::timeout(self.config.reply_timeout, wait)
            .await
            .unwrap_or_else(|_| {
                debug!("Adam reply timed out");
                SendOutcome::Unconfirmed
            })
    }
}

#[async_trait]
impl SpeakerServer for AdamServer {
    fn name(&self) -> &str {
        "adam"
    }

    fn release_time(&self) -> Duration {
        self.config.release_time
    }

    async fn start(&self) -> Result<()> {
        info!("Adam server adapter ready ({})", self.config.server_addr);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!("Adam server adapter stopped");
        Ok(())
    }

    async fn send_start(&self, zone: ZoneId) -> SendOutcome {
        self.write_coil(zone, true).await
    }

    async fn send_stop(&self, zone: ZoneId) -> SendOutcome {
        self.write_coil(zone, false).await
    }
}
