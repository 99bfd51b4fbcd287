//! Message types for the backhaul protocol
//!
//! Messages are serialized into frames using the codec defined in `codec.rs`.
//!
//! # Message Flow
//!
//! 1. Worker opens a control transport and sends `Hello`
//! 2. Control plane answers with `Welcome`, naming the tunnel instance
//! 3. Both sides send `Keepalive` periodically
//! 4. To reach the worker: control plane sends `DialRequest` with a fresh request id
//! 5. Worker opens a new stream whose only frame is `StreamHello` carrying that
//!    request id; everything after it is application bytes
//! 6. If the worker cannot open the stream it sends `DialResponse { accepted: false }`
//!    on the control transport instead

use serde::{Deserialize, Serialize};

/// Current protocol version string.
///
/// Format: "MAJOR.MINOR" where MAJOR changes indicate breaking changes.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Identifier of one tunnel instance, chosen by the control plane.
///
/// A worker that reconnects gets a new tunnel id, which lets reply streams
/// aimed at the retired tunnel be told apart from ones for the new tunnel.
pub type TunnelId = u64;

/// Whether a peer's advertised version can talk to this implementation.
///
/// A missing version is treated as 1.0.
pub fn is_compatible_version(version: Option<&str>) -> bool {
    let Some(version) = version else {
        return true;
    };
    let major = |v: &str| v.split('.').next().map(str::to_owned);
    major(version) == major(PROTOCOL_VERSION)
}

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Worker identification on a new control transport
    Hello = 0x01,
    /// Control plane acknowledgment of `Hello`
    Welcome = 0x02,
    /// Ask the worker to open a new stream
    DialRequest = 0x03,
    /// Worker's answer to a dial request it could not serve
    DialResponse = 0x04,
    /// First frame of a reply stream
    StreamHello = 0x05,
    /// Liveness ping
    Keepalive = 0x06,
    /// Error response
    Error = 0xFF,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Welcome),
            0x03 => Some(Self::DialRequest),
            0x04 => Some(Self::DialResponse),
            0x05 => Some(Self::StreamHello),
            0x06 => Some(Self::Keepalive),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown error
    Unknown = 0,
    /// Peer speaks an incompatible protocol version
    VersionMismatch = 1,
    /// Handshake frame was not what the receiver expected
    InvalidHandshake = 2,
    /// Invalid message
    InvalidMessage = 3,
    /// Control plane is shutting down; the worker may retry later
    ShuttingDown = 4,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Worker registration.
    ///
    /// Must be the first frame on a control transport.
    Hello {
        /// Stable worker identifier
        worker_id: String,
        /// Protocol version (e.g., "1.0"); `None` is accepted as 1.0
        version: Option<String>,
    },

    /// Registration acknowledgment
    Welcome {
        /// Tunnel instance the worker must quote in `StreamHello`
        tunnel_id: TunnelId,
    },

    /// Open a new stream back to the control plane.
    ///
    /// The request id travels in the frame header.
    DialRequest,

    /// Worker's answer to a dial request
    DialResponse {
        /// Whether the worker is opening the stream
        accepted: bool,
        /// Reason if not accepted
        reason: Option<String>,
    },

    /// Reply stream identification. The request id travels in the frame header.
    StreamHello {
        /// Worker answering the dial
        worker_id: String,
        /// Tunnel the dial request came from
        tunnel_id: TunnelId,
    },

    /// Liveness ping
    Keepalive {
        /// Sender's clock in milliseconds since the Unix epoch
        timestamp: u64,
    },

    /// Error response
    Error {
        /// Error code
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello { .. } => MessageType::Hello,
            Message::Welcome { .. } => MessageType::Welcome,
            Message::DialRequest => MessageType::DialRequest,
            Message::DialResponse { .. } => MessageType::DialResponse,
            Message::StreamHello { .. } => MessageType::StreamHello,
            Message::Keepalive { .. } => MessageType::Keepalive,
            Message::Error { .. } => MessageType::Error,
        }
    }

    /// Build a `Hello` carrying the current protocol version
    pub fn hello(worker_id: impl Into<String>) -> Self {
        Message::Hello {
            worker_id: worker_id.into(),
            version: Some(PROTOCOL_VERSION.to_string()),
        }
    }

    /// Build a refusal for a dial request
    pub fn dial_refused(reason: impl Into<String>) -> Self {
        Message::DialResponse {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}
