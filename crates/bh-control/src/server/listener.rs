//! TCP listener for worker connections
//!
//! Accepts incoming connections and spawns a handshake handler for each.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use bh_core::BhError;

use crate::connection::Registry;
use crate::server::handler::{serve_connection, Accepted};

/// Control server that accepts worker control transports and reply streams
pub struct ControlServer {
    /// Registry workers are registered into
    registry: Registry,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl ControlServer {
    /// Create a new control server
    pub fn new(registry: Registry, cancel: CancellationToken) -> Self {
        Self { registry, cancel }
    }

    /// Bind `bind_addr` and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<(), BhError> {
        let listener = TcpListener::bind(bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener until cancelled
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), BhError> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Control server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Control server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("New connection from {}", peer_addr);
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let registry = self.registry.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Handshake with {} cancelled", peer_addr);
                    return;
                }
                result = serve_connection(&registry, Box::new(socket)) => result
            };

            match result {
                Ok(Accepted::Control {
                    worker_id,
                    tunnel_id,
                }) => {
                    tracing::info!(
                        "Worker {} connected from {} (tunnel {:#x})",
                        worker_id,
                        peer_addr,
                        tunnel_id
                    );
                }
                Ok(Accepted::Reply {
                    worker_id,
                    request_id,
                    delivered,
                }) => {
                    tracing::debug!(
                        "Reply stream {} from {} ({})",
                        request_id,
                        worker_id,
                        if delivered { "delivered" } else { "discarded" }
                    );
                }
                Err(e) => {
                    tracing::warn!("Rejected connection from {}: {}", peer_addr, e);
                }
            }
        });
    }
}
