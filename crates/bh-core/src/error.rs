//! Core error types for backhaul

use bh_protocol::ProtocolError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::WorkerId;

/// Top-level error type for the backhaul ecosystem
#[derive(Error, Debug)]
pub enum BhError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Dial error
    #[error("Dial error: {0}")]
    Dial(#[from] DialError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer did not send its handshake frame in time
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Peer speaks an incompatible protocol version
    #[error("Protocol version mismatch: {0}")]
    VersionMismatch(String),

    /// Control plane refused the registration
    #[error("Registration refused: {0}")]
    Refused(String),

    /// Control plane is shutting down and accepts no new workers
    #[error("Control plane is shutting down")]
    ShuttingDown,

    /// Nothing was received on a control transport for too long
    #[error("No traffic for {0:?}")]
    KeepaliveTimeout(Duration),
}

/// Why a dial to a worker did not produce a stream.
///
/// Every failed dial surfaces as one of these; nothing is retried internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialError {
    /// No tunnel is registered for the worker
    #[error("No connection for worker {0}")]
    NoConnection(WorkerId),

    /// The tunnel's transport failed or closed before the dial completed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The caller's deadline elapsed before a stream arrived
    #[error("Dial timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the dial
    #[error("Dial cancelled")]
    Cancelled,

    /// The worker refused to open the stream
    #[error("Dial rejected by worker: {0}")]
    Rejected(String),

    /// The worker did not re-register within the reconnect grace period
    #[error("Worker {0} did not reconnect within the grace period")]
    ReconnectTimeout(WorkerId),

    /// Too many dials are already waiting for this worker to reconnect
    #[error("Too many pending dials for worker {worker_id} (limit {limit})")]
    TooManyPendingDials { worker_id: WorkerId, limit: usize },
}

impl DialError {
    /// Whether a later attempt could plausibly succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DialError::ConnectionClosed | DialError::Timeout(_) | DialError::ReconnectTimeout(_)
        )
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
