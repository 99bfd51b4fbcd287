//! Control server: accepts worker connections and routes handshakes

mod handler;
mod listener;

pub use handler::{serve_connection, Accepted};
pub use listener::ControlServer;
