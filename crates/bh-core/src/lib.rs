//! bh-core: Core abstractions and configuration for backhaul
//!
//! This crate provides shared types, the dial error taxonomy, transport
//! traits and configuration structures used by the control plane and the
//! worker agent.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{BhError, DialError};
pub use traits::{
    BoxedStream, HandshakeAcceptor, StreamAcceptor, StreamHandshake, Transport, TransportConnector,
};
pub use types::{TunnelState, WorkerId};
