//! Error types for the speaker gateway core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Action key is not of the form `SPK_<id>`
    #[error("invalid action key: {0}")]
    InvalidActionKey(String),

    /// Zone id could not be parsed or is zero
    #[error("invalid zone id in {key}: {reason}")]
    InvalidZone { key: String, reason: String },

    /// Unknown action status
    #[error("unknown action status: {0}")]
    UnknownStatus(String),

    /// Unknown terminal or broadcast action name
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Frame buffer too small
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Preamble did not match the protocol
    #[error("invalid preamble: 0x{0:02x}{1:02x}")]
    InvalidPreamble(u8, u8),

    /// Opcode is not part of the protocol
    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    /// Sub-action is not valid for the opcode
    #[error("unknown sub-action 0x{sub_action:02x} for opcode 0x{opcode:02x}")]
    UnknownSubAction { opcode: u8, sub_action: u8 },

    /// Frame field does not fit its wire width
    #[error("field too large: {field} = {value}")]
    FieldTooLarge { field: &'static str, value: usize },
}
