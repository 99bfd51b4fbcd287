//! Reconnect grace period
//!
//! When a worker's tunnel closes on its own, the registry can keep its id
//! around for a while so dials wait for the worker to come back instead of
//! failing straight away.
//!
//! A background task sweeps expired entries and fails their waiters with
//! `ReconnectTimeout`. Waiters also carry their own deadline, so the sweep
//! only bounds how long a stale entry is remembered.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::registry::RegistryInner;
use super::tunnel::Tunnel;

/// Interval between grace-period sweeps
pub const GRACE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Why a dial waiting on a disconnected worker was woken
pub(crate) enum Wake {
    /// The worker registered again
    Reconnected(Arc<Tunnel>),
    /// The grace period ran out
    Expired,
    /// The worker was removed explicitly
    Removed,
}

/// A worker that disconnected and may still come back
pub(crate) struct GraceEntry {
    pub disconnected_at: Instant,
    pub waiters: Vec<oneshot::Sender<Wake>>,
}

impl GraceEntry {
    pub fn new() -> Self {
        Self {
            disconnected_at: Instant::now(),
            waiters: Vec::new(),
        }
    }

    pub fn is_expired(&self, grace_period: Duration) -> bool {
        self.disconnected_at.elapsed() >= grace_period
    }

    /// Drop waiters whose dial has already given up
    pub fn prune_waiters(&mut self) {
        self.waiters.retain(|waiter| !waiter.is_closed());
    }

    /// Wake every waiter with the same outcome
    pub fn wake_all(self, wake: impl Fn() -> Wake) {
        for waiter in self.waiters {
            let _ = waiter.send(wake());
        }
    }
}

/// Run the grace-period sweep until `cancel` fires or the registry is gone.
pub(crate) async fn run_grace_sweep(registry: Weak<RegistryInner>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(GRACE_SWEEP_INTERVAL);

    tracing::debug!(
        "Starting grace-period sweep (check interval: {:?})",
        GRACE_SWEEP_INTERVAL
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                let expired = inner.sweep_expired();
                if expired > 0 {
                    tracing::info!("Grace period expired for {} workers", expired);
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("Grace-period sweep shutting down");
                break;
            }
        }
    }
}
