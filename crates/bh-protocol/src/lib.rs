//! bh-protocol: Wire protocol for backhaul reverse-dial tunnels
//!
//! This crate defines the binary framing used on a worker's control
//! transport (dial requests, dial responses, keepalives) and the one-frame
//! handshakes that open control transports and reply streams.

pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod request;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use handshake::{read_frame, write_frame};
pub use message::{
    is_compatible_version, ErrorCode, Message, MessageType, TunnelId, PROTOCOL_VERSION,
};
pub use request::RequestId;
