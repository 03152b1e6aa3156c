//! Speaker server trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use spk_core::{ActionStatus, ZoneId};
use std::fmt;
use std::time::Duration;

use crate::Result;

/// Grace added on top of the release time for AUTO actions
pub const AUTO_RELEASE_GRACE: Duration = Duration::from_secs(1);

/// What happened to a single wire command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The device answered
    Replied(Bytes),
    /// Written to the wire, no confirmation came back
    Unconfirmed,
    /// The protocol has no wire command for this request
    Skipped,
    /// Nothing reached the device
    Failed(String),
}

impl SendOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SendOutcome::Failed(_))
    }

    /// True when bytes were handed to the transport
    pub fn reached_wire(&self) -> bool {
        matches!(self, SendOutcome::Replied(_) | SendOutcome::Unconfirmed)
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Replied(reply) => write!(f, "replied ({} bytes)", reply.len()),
            SendOutcome::Unconfirmed => f.write_str("unconfirmed"),
            SendOutcome::Skipped => f.write_str("skipped"),
            SendOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A speaker server adapter, selected once at startup.
///
/// Command methods never return transport errors: they report what happened
/// through [`SendOutcome`] and leave recovery (reconnects, retries) to the
/// adapter.
#[async_trait]
pub trait SpeakerServer: Send + Sync {
    /// Adapter name used in logs
    fn name(&self) -> &str;

    /// Time an AUTO action stays active before it is released
    fn release_time(&self) -> Duration;

    /// Timer to register for an action entering `status`.
    ///
    /// AUTO gets the release time plus a one second grace, every other status
    /// is latched (zero).
    fn register_timeout(&self, status: ActionStatus) -> Duration {
        match status {
            ActionStatus::Auto => self.release_time() + AUTO_RELEASE_GRACE,
            ActionStatus::On | ActionStatus::Off => Duration::ZERO,
        }
    }

    /// Start background work (sessions, keepalives)
    async fn start(&self) -> Result<()>;

    /// Stop background work
    async fn stop(&self) -> Result<()>;

    /// Turn a zone on
    async fn send_start(&self, zone: ZoneId) -> SendOutcome;

    /// Turn a zone off
    async fn send_stop(&self, zone: ZoneId) -> SendOutcome;
}
