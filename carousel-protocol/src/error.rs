//! Error types for the carousel notification protocol.

use thiserror::Error;

/// Protocol-level errors that can occur while exchanging notifications.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a notification.
    #[error("Failed to encode message: {0}")]
    EncodeError(String),

    /// Failed to decode a notification.
    #[error("Failed to decode message: {0}")]
    DecodeError(String),

    /// A line exceeded the maximum accepted length.
    #[error("Line too large: {0} bytes (max: {1})")]
    LineTooLarge(usize, usize),
}
