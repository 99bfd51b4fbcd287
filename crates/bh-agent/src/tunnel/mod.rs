//! Tunnel management for connecting to the control plane

mod connector;
mod reconnect;
mod session;

pub use connector::TcpConnector;
pub use reconnect::ExponentialBackoff;
pub use session::{AgentSession, ReverseListener};
