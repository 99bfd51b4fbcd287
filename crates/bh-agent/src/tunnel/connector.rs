//! Outbound TCP connector
//!
//! Opens the control transport and every reply stream to the control plane.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use bh_core::{BhError, BoxedStream, TransportConnector};

/// Connects to a fixed control plane address over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Control plane address (host:port)
    address: String,
    /// Deadline for a single connect
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a new connector
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    /// Control plane address
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(&self) -> Result<BoxedStream, BhError> {
        tracing::trace!("Connecting to {}", self.address);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "connecting to {} timed out after {:?}",
                        self.address, self.connect_timeout
                    ),
                )
            })??;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }
        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}
