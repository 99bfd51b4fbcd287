//! Local port forwarding into workers
//!
//! Each expose rule binds a local TCP listener. Every accepted connection is
//! piped to a fresh stream dialed on the rule's worker.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use bh_core::config::ExposeRule;
use bh_core::{BhError, WorkerId};

use crate::connection::Registry;

/// Accepts local connections and forwards them to one worker
pub struct Forwarder {
    registry: Registry,
    worker_id: WorkerId,
    listener: TcpListener,
}

impl Forwarder {
    /// Bind the listener named by `rule`
    pub async fn bind(registry: Registry, rule: &ExposeRule) -> Result<Self, BhError> {
        let listener = TcpListener::bind(&rule.listen).await?;
        Ok(Self {
            registry,
            worker_id: WorkerId::new(rule.worker_id.clone()),
            listener,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, BhError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and forward connections until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Forwarding {} to worker {}", addr, self.worker_id);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                result = self.listener.accept() => match result {
                    Ok((socket, peer_addr)) => {
                        let registry = self.registry.clone();
                        let worker_id = self.worker_id.clone();
                        tokio::spawn(forward(registry, worker_id, socket, peer_addr));
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept local connection: {}", e);
                    }
                },
            }
        }

        tracing::debug!("Forwarder for {} stopped", self.worker_id);
    }
}

async fn forward(registry: Registry, worker_id: WorkerId, mut local: TcpStream, peer: SocketAddr) {
    let mut remote = match registry.dial(&worker_id).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Cannot forward {} to {}: {}", peer, worker_id, e);
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut local, &mut remote).await {
        Ok((sent, received)) => {
            tracing::debug!(
                "Forwarded {} <-> {} ({}): {} bytes out, {} bytes in",
                peer,
                worker_id,
                remote.request_id(),
                sent,
                received
            );
        }
        Err(e) => {
            tracing::debug!("Forwarding {} <-> {} ended: {}", peer, worker_id, e);
        }
    }
}
