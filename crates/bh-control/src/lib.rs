//! bh-control: Control plane for backhaul reverse-dial tunnels
//!
//! Workers behind NAT open an outbound control transport to the control
//! plane. The registry keeps one tunnel per worker, and any part of the
//! control plane can dial a worker through it: the worker is asked over its
//! control transport to open a fresh stream back, which is then handed to
//! the caller.

pub mod connection;
pub mod forward;
pub mod server;

pub use connection::{Registry, RegistryStats, ReverseStream, Tunnel};
pub use forward::Forwarder;
pub use server::{serve_connection, Accepted, ControlServer};
