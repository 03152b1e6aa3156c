//! Bridge error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while setting an adapter up.
///
/// Failures on the command path are reported as
/// [`SendOutcome::Failed`](crate::SendOutcome::Failed) instead.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] spk_transport::TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] spk_core::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
