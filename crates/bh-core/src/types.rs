//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier naming a worker process.
///
/// Supplied by the worker in its `Hello` and reused across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Create a new worker ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Worker ID for this host, derived from its hostname
    pub fn from_hostname() -> Self {
        Self(gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelState {
    /// Tunnel is being set up
    Connecting,
    /// Read loop is running and dials are accepted
    Active,
    /// Terminal; transport released and pending dials failed
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Connecting => write!(f, "connecting"),
            TunnelState::Active => write!(f, "active"),
            TunnelState::Closed => write!(f, "closed"),
        }
    }
}
