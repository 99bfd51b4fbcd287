//! bh-agent: Worker-side agent for backhaul
//!
//! The agent runs next to a service that cannot accept inbound connections.
//! It keeps an outbound control transport open to the control plane and,
//! whenever the control plane dials the worker, opens a fresh stream back
//! and pipes it to the local service.

pub mod forwarder;
pub mod tunnel;

pub use forwarder::forward_to;
pub use tunnel::{AgentSession, ExponentialBackoff, ReverseListener, TcpConnector};
