//! Gateway error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("speaker server error: {0}")]
    Bridge(#[from] spk_bridge::BridgeError),
}
