//! Protocol error types

use thiserror::Error;

use crate::message::MessageType;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Header announced one message type but the payload decoded to another
    #[error("Frame header announced {announced:?} but payload is {actual:?}")]
    TypeMismatch {
        announced: MessageType,
        actual: MessageType,
    },

    /// Unknown message type
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// A handshake expected a different frame
    #[error("Unexpected {0:?} frame")]
    UnexpectedMessage(MessageType),

    /// Stream ended before a complete frame was read
    #[error("Connection closed before a complete frame was received")]
    ConnectionClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
