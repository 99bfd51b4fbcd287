//! Connection registry
//!
//! Thread-safe directory from worker id to that worker's live tunnel. This is
//! the surface the rest of the control plane uses to reach workers: register
//! a freshly accepted control transport, dial a worker, remove one, or list
//! who is connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use bh_core::config::RegistryConfig;
use bh_core::{BoxedStream, DialError, StreamHandshake, WorkerId};
use bh_protocol::TunnelId;

use super::grace::{run_grace_sweep, GraceEntry, Wake};
use super::pending::discard;
use super::stream::ReverseStream;
use super::tunnel::Tunnel;

/// Point-in-time counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Workers with a registered tunnel
    pub active_connections: usize,
    /// Disconnected workers still inside their grace period
    pub grace_period_entries: usize,
    /// Dials waiting on a live tunnel for their reply stream
    pub pending_dials: usize,
    /// Dials waiting for a disconnected worker to come back
    pub waiting_for_reconnect: usize,
}

/// Handle to a connection registry.
///
/// Cheap to clone; every clone refers to the same registry. The registry
/// shuts down when [`shutdown`](Self::shutdown) is called or the last handle
/// is dropped.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    config: RegistryConfig,
    /// Current tunnel per worker
    tunnels: DashMap<WorkerId, Arc<Tunnel>>,
    /// Workers in their reconnect grace period.
    ///
    /// Lock order: `grace` before any `tunnels` shard.
    grace: Mutex<HashMap<WorkerId, GraceEntry>>,
    /// Cancelled on shutdown
    shutdown: CancellationToken,
    sweep_started: AtomicBool,
}

impl Registry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                tunnels: DashMap::new(),
                grace: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                sweep_started: AtomicBool::new(false),
            }),
        }
    }

    /// Registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Wrap `transport` in a new tunnel for `worker_id` and install it.
    ///
    /// Any previous tunnel for the same worker is closed and its pending
    /// dials fail with `ConnectionClosed`. Dials waiting for the worker to
    /// reconnect are handed the new tunnel.
    pub fn register(&self, worker_id: WorkerId, transport: BoxedStream) -> TunnelId {
        let tunnel = Tunnel::spawn(worker_id.clone(), transport, &self.inner.config);
        let tunnel_id = tunnel.id();

        let (previous, reconnect) = {
            let mut grace = self.inner.lock_grace();
            if self.inner.shutdown.is_cancelled() {
                drop(grace);
                tracing::warn!("Registry is shut down, refusing worker {}", worker_id);
                tunnel.close();
                return tunnel_id;
            }
            let previous = self
                .inner
                .tunnels
                .insert(worker_id.clone(), Arc::clone(&tunnel));
            (previous, grace.remove(&worker_id))
        };

        if let Some(previous) = previous {
            tracing::info!(
                "Replacing tunnel {:#x} for {} with {:#x}",
                previous.id(),
                worker_id,
                tunnel_id
            );
            previous.close();
        } else {
            tracing::info!("Registered worker {} (tunnel {:#x})", worker_id, tunnel_id);
        }

        if let Some(entry) = reconnect {
            tracing::info!(
                "Worker {} reconnected after {:?}",
                worker_id,
                entry.disconnected_at.elapsed()
            );
            entry.wake_all(|| Wake::Reconnected(Arc::clone(&tunnel)));
        }

        self.watch_tunnel(tunnel);
        tunnel_id
    }

    /// Open a stream to `worker_id`, bounded by the configured `dial_timeout`
    pub async fn dial(&self, worker_id: &WorkerId) -> Result<ReverseStream, DialError> {
        self.dial_timeout(worker_id, self.inner.config.dial_timeout)
            .await
    }

    /// Open a stream to `worker_id`, giving up after `timeout`
    pub async fn dial_timeout(
        &self,
        worker_id: &WorkerId,
        timeout: Duration,
    ) -> Result<ReverseStream, DialError> {
        match tokio::time::timeout(timeout, self.dial_inner(worker_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("Dial to {} timed out after {:?}", worker_id, timeout);
                Err(DialError::Timeout(timeout))
            }
        }
    }

    /// Open a stream to `worker_id`, giving up when `cancel` fires or the
    /// configured `dial_timeout` elapses
    pub async fn dial_with_cancel(
        &self,
        worker_id: &WorkerId,
        cancel: &CancellationToken,
    ) -> Result<ReverseStream, DialError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Dial to {} cancelled", worker_id);
                Err(DialError::Cancelled)
            }
            result = self.dial(worker_id) => result,
        }
    }

    async fn dial_inner(&self, worker_id: &WorkerId) -> Result<ReverseStream, DialError> {
        let tunnel = match self.tunnel(worker_id) {
            Some(tunnel) => tunnel,
            None => self.wait_for_reconnect(worker_id).await?,
        };
        tunnel.dial().await
    }

    async fn wait_for_reconnect(&self, worker_id: &WorkerId) -> Result<Arc<Tunnel>, DialError> {
        let grace_period = self.inner.config.grace_period;
        let limit = self.inner.config.max_pending_dials;

        let (rx, remaining) = {
            let mut grace = self.inner.lock_grace();

            // Registered between the lookup and taking the lock
            if let Some(tunnel) = self.tunnel(worker_id) {
                return Ok(tunnel);
            }

            let Some(entry) = grace.get_mut(worker_id) else {
                return Err(DialError::NoConnection(worker_id.clone()));
            };

            let elapsed = entry.disconnected_at.elapsed();
            if elapsed >= grace_period {
                return Err(DialError::ReconnectTimeout(worker_id.clone()));
            }

            entry.prune_waiters();
            if entry.waiters.len() >= limit {
                return Err(DialError::TooManyPendingDials {
                    worker_id: worker_id.clone(),
                    limit,
                });
            }

            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            (rx, grace_period - elapsed)
        };

        tracing::debug!(
            "Waiting up to {:?} for {} to reconnect",
            remaining,
            worker_id
        );

        match tokio::time::timeout(remaining, rx).await {
            Ok(Ok(Wake::Reconnected(tunnel))) => Ok(tunnel),
            Ok(Ok(Wake::Removed)) => Err(DialError::NoConnection(worker_id.clone())),
            Ok(Ok(Wake::Expired)) | Ok(Err(_)) | Err(_) => {
                Err(DialError::ReconnectTimeout(worker_id.clone()))
            }
        }
    }

    /// Unregister and close the tunnel for `worker_id`.
    ///
    /// Also forgets a grace-period entry; dials waiting on it fail with
    /// `NoConnection`. Returns whether a tunnel was registered.
    pub fn remove(&self, worker_id: &WorkerId) -> bool {
        let (tunnel, reconnect) = {
            let mut grace = self.inner.lock_grace();
            let tunnel = self.inner.tunnels.remove(worker_id).map(|(_, t)| t);
            (tunnel, grace.remove(worker_id))
        };

        if let Some(entry) = reconnect {
            entry.wake_all(|| Wake::Removed);
        }

        match tunnel {
            Some(tunnel) => {
                tracing::info!("Removed worker {} (tunnel {:#x})", worker_id, tunnel.id());
                tunnel.close();
                true
            }
            None => false,
        }
    }

    /// Snapshot of registered worker ids, in no particular order
    pub fn list(&self) -> Vec<WorkerId> {
        self.inner
            .tunnels
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of disconnected workers still inside their grace period
    pub fn list_in_grace_period(&self) -> Vec<WorkerId> {
        let grace_period = self.inner.config.grace_period;
        self.inner
            .lock_grace()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(grace_period))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Check if a tunnel is registered for `worker_id`
    pub fn contains(&self, worker_id: &WorkerId) -> bool {
        self.inner.tunnels.contains_key(worker_id)
    }

    /// Number of registered workers
    pub fn len(&self) -> usize {
        self.inner.tunnels.len()
    }

    /// Check if no workers are registered
    pub fn is_empty(&self) -> bool {
        self.inner.tunnels.is_empty()
    }

    /// Current tunnel for `worker_id`
    pub fn tunnel(&self, worker_id: &WorkerId) -> Option<Arc<Tunnel>> {
        self.inner
            .tunnels
            .get(worker_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Point-in-time counters
    pub fn stats(&self) -> RegistryStats {
        let grace = self.inner.lock_grace();
        let pending_dials: usize = self
            .inner
            .tunnels
            .iter()
            .map(|entry| entry.value().pending_dials())
            .sum();
        let waiting_for_reconnect: usize = grace
            .values()
            .map(|entry| entry.waiters.iter().filter(|w| !w.is_closed()).count())
            .sum();

        RegistryStats {
            active_connections: self.inner.tunnels.len(),
            grace_period_entries: grace.len(),
            pending_dials,
            waiting_for_reconnect,
        }
    }

    /// Deliver a reply stream to the dial it answers.
    ///
    /// The stream is shut down if the worker has no tunnel, the handshake
    /// names a tunnel other than the current one, or no dial is waiting on
    /// the request id. Returns whether the stream was delivered.
    pub fn accept_stream(&self, handshake: StreamHandshake, stream: BoxedStream) -> bool {
        match self.tunnel(&handshake.worker_id) {
            Some(tunnel) if tunnel.id() == handshake.tunnel_id => {
                tunnel.accept_stream(handshake.request_id, stream)
            }
            _ => {
                tracing::debug!(
                    "Discarding reply stream {} from {}: tunnel {:#x} is not current",
                    handshake.request_id,
                    handshake.worker_id,
                    handshake.tunnel_id
                );
                discard(Ok(stream));
                false
            }
        }
    }

    /// Close every tunnel, fail every waiting dial and stop background work.
    ///
    /// Later registrations are refused.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let closed = self.inner.close_all();
        tracing::info!("Registry shut down ({} tunnels closed)", closed);
    }

    /// Check if the registry has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Prune the tunnel from the map once it closes on its own
    fn watch_tunnel(&self, tunnel: Arc<Tunnel>) {
        let registry = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tunnel.closed().await;
            if let Some(inner) = registry.upgrade() {
                Registry { inner }.on_tunnel_closed(&tunnel);
            }
        });
    }

    fn on_tunnel_closed(&self, tunnel: &Tunnel) {
        let worker_id = tunnel.worker_id();
        let mut grace = self.inner.lock_grace();

        // Only if it is still the current tunnel; replace and remove have
        // already taken it out.
        let removed = self
            .inner
            .tunnels
            .remove_if(worker_id, |_, current| current.id() == tunnel.id())
            .is_some();
        if !removed {
            return;
        }

        if self.inner.config.grace_enabled() && !self.inner.shutdown.is_cancelled() {
            grace.insert(worker_id.clone(), GraceEntry::new());
            drop(grace);
            tracing::info!(
                "Worker {} disconnected, holding for {:?}",
                worker_id,
                self.inner.config.grace_period
            );
            self.start_sweep();
        } else {
            tracing::info!("Worker {} disconnected", worker_id);
        }
    }

    fn start_sweep(&self) {
        if self.inner.sweep_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(run_grace_sweep(
            Arc::downgrade(&self.inner),
            self.inner.shutdown.clone(),
        ));
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("workers", &self.inner.tunnels.len())
            .field("shutdown", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl RegistryInner {
    fn lock_grace(&self) -> MutexGuard<'_, HashMap<WorkerId, GraceEntry>> {
        self.grace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget grace entries whose period has run out. Returns how many.
    pub(crate) fn sweep_expired(&self) -> usize {
        let grace_period = self.config.grace_period;
        let mut expired = Vec::new();

        self.lock_grace().retain(|worker_id, entry| {
            if entry.is_expired(grace_period) {
                expired.push((worker_id.clone(), std::mem::take(&mut entry.waiters)));
                false
            } else {
                true
            }
        });

        for (worker_id, waiters) in &expired {
            tracing::debug!(
                "Grace period for {} expired ({} dials waiting)",
                worker_id,
                waiters.len()
            );
        }

        let count = expired.len();
        for (_, waiters) in expired {
            for waiter in waiters {
                let _ = waiter.send(Wake::Expired);
            }
        }
        count
    }

    fn close_all(&self) -> usize {
        let (tunnels, reconnecting) = {
            let mut grace = self.lock_grace();
            let reconnecting: Vec<GraceEntry> = grace.drain().map(|(_, e)| e).collect();
            let tunnels: Vec<Arc<Tunnel>> = self
                .tunnels
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            self.tunnels.clear();
            (tunnels, reconnecting)
        };

        for entry in reconnecting {
            entry.wake_all(|| Wake::Removed);
        }
        for tunnel in &tunnels {
            tunnel.close();
        }
        tunnels.len()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_protocol::{Frame, FrameCodec, Message, RequestId};
    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio_util::codec::Framed;

    type Peer = Framed<DuplexStream, FrameCodec>;

    /// Register `worker_id` over an in-memory transport and return the
    /// worker's end after reading `Welcome`
    async fn connect(registry: &Registry, worker_id: &str) -> (TunnelId, Peer) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let tunnel_id = registry.register(WorkerId::new(worker_id), Box::new(ours));
        let mut peer = Framed::new(theirs, FrameCodec::new());
        let welcome = peer.next().await.unwrap().unwrap();
        assert_eq!(welcome.message, Message::Welcome { tunnel_id });
        (tunnel_id, peer)
    }

    async fn next_dial_request(peer: &mut Peer) -> RequestId {
        loop {
            let frame = peer.next().await.unwrap().unwrap();
            if frame.message == Message::DialRequest {
                return frame.request_id;
            }
        }
    }

    fn grace_config(grace: Duration) -> RegistryConfig {
        RegistryConfig {
            grace_period: grace,
            ..RegistryConfig::default()
        }
    }

    async fn wait_until_gone(registry: &Registry, worker_id: &WorkerId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.contains(worker_id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("tunnel should be pruned");
    }

    #[tokio::test]
    async fn test_list_and_remove() {
        let registry = Registry::new(RegistryConfig::default());
        let w1 = WorkerId::new("w1");

        let (_, _peer) = connect(&registry, "w1").await;
        assert_eq!(registry.list(), vec![w1.clone()]);
        assert!(registry.contains(&w1));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&w1));
        assert!(registry.list().is_empty());
        assert!(!registry.remove(&w1));
    }

    #[tokio::test]
    async fn test_remove_closes_transport() {
        let registry = Registry::new(RegistryConfig::default());
        let (_, mut peer) = connect(&registry, "w1").await;

        registry.remove(&WorkerId::new("w1"));
        assert!(peer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_self_closed_tunnel_is_pruned() {
        let registry = Registry::new(RegistryConfig::default());
        let w1 = WorkerId::new("w1");
        let (_, peer) = connect(&registry, "w1").await;

        drop(peer);
        wait_until_gone(&registry, &w1).await;

        assert!(matches!(
            registry.dial(&w1).await,
            Err(DialError::NoConnection(id)) if id == w1
        ));
        assert!(registry.list_in_grace_period().is_empty());
    }

    #[tokio::test]
    async fn test_replaced_tunnel_close_keeps_new_entry() {
        let registry = Registry::new(RegistryConfig::default());
        let w1 = WorkerId::new("w1");

        let (_, mut old_peer) = connect(&registry, "w1").await;
        let (new_id, _new_peer) = connect(&registry, "w1").await;

        // Old transport is released; its watcher must not prune the new tunnel
        assert!(old_peer.next().await.is_none());
        tokio::task::yield_now().await;
        assert_eq!(registry.tunnel(&w1).map(|t| t.id()), Some(new_id));
    }

    #[tokio::test]
    async fn test_stale_tunnel_id_is_discarded() {
        let registry = Registry::new(RegistryConfig::default());
        let w1 = WorkerId::new("w1");
        let (tunnel_id, mut peer) = connect(&registry, "w1").await;

        let dialer = {
            let registry = registry.clone();
            let w1 = w1.clone();
            tokio::spawn(async move { registry.dial_timeout(&w1, Duration::from_millis(200)).await })
        };
        let request_id = next_dial_request(&mut peer).await;

        let (ours, mut theirs) = tokio::io::duplex(64);
        let stale = StreamHandshake {
            worker_id: w1.clone(),
            tunnel_id: tunnel_id.wrapping_add(1),
            request_id,
        };
        assert!(!registry.accept_stream(stale, Box::new(ours)));

        let mut buf = Vec::new();
        assert_eq!(theirs.read_to_end(&mut buf).await.unwrap(), 0);
        assert!(matches!(
            dialer.await.unwrap(),
            Err(DialError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_with_cancel_already_cancelled() {
        let registry = Registry::new(RegistryConfig::default());
        let (_, _peer) = connect(&registry, "w1").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            registry.dial_with_cancel(&WorkerId::new("w1"), &cancel).await,
            Err(DialError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_grace_period_reconnect_serves_waiting_dial() {
        let registry = Registry::new(grace_config(Duration::from_secs(10)));
        let w1 = WorkerId::new("w1");

        let (_, peer) = connect(&registry, "w1").await;
        drop(peer);
        wait_until_gone(&registry, &w1).await;
        assert_eq!(registry.list_in_grace_period(), vec![w1.clone()]);

        let dialer = {
            let registry = registry.clone();
            let w1 = w1.clone();
            tokio::spawn(async move { registry.dial(&w1).await })
        };

        // Let the dial park on the grace entry
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.stats().waiting_for_reconnect == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let (tunnel_id, mut peer) = connect(&registry, "w1").await;
        assert!(registry.list_in_grace_period().is_empty());

        let request_id = next_dial_request(&mut peer).await;
        let (ours, _theirs) = tokio::io::duplex(64);
        let handshake = StreamHandshake {
            worker_id: w1.clone(),
            tunnel_id,
            request_id,
        };
        assert!(registry.accept_stream(handshake, Box::new(ours)));

        let stream = dialer.await.unwrap().unwrap();
        assert_eq!(stream.request_id(), request_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_expiry() {
        let registry = Registry::new(grace_config(Duration::from_secs(2)));
        let w1 = WorkerId::new("w1");

        let (_, peer) = connect(&registry, "w1").await;
        drop(peer);
        wait_until_gone(&registry, &w1).await;

        let result = registry.dial(&w1).await;
        assert!(matches!(result, Err(DialError::ReconnectTimeout(id)) if id == w1));

        // Sweep forgets the entry
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.stats().grace_period_entries, 0);
        assert!(matches!(
            registry.dial(&w1).await,
            Err(DialError::NoConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_grace_period_pending_limit() {
        let config = RegistryConfig {
            grace_period: Duration::from_secs(10),
            max_pending_dials: 2,
            ..RegistryConfig::default()
        };
        let registry = Registry::new(config);
        let w1 = WorkerId::new("w1");

        let (_, peer) = connect(&registry, "w1").await;
        drop(peer);
        wait_until_gone(&registry, &w1).await;

        let mut waiting = vec![];
        for _ in 0..2 {
            let registry = registry.clone();
            let w1 = w1.clone();
            waiting.push(tokio::spawn(async move { registry.dial(&w1).await }));
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.stats().waiting_for_reconnect < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(matches!(
            registry.dial(&w1).await,
            Err(DialError::TooManyPendingDials { limit: 2, .. })
        ));

        // Remove fails the waiters with NoConnection
        registry.remove(&w1);
        for dialer in waiting {
            assert!(matches!(
                dialer.await.unwrap(),
                Err(DialError::NoConnection(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_worker_ignores_grace() {
        let registry = Registry::new(grace_config(Duration::from_secs(10)));
        let result = tokio::time::timeout(
            Duration::from_millis(100),
            registry.dial(&WorkerId::new("never-seen")),
        )
        .await
        .expect("dial must not block");
        assert!(matches!(result, Err(DialError::NoConnection(_))));
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = Registry::new(RegistryConfig::default());
        let (_, mut peer) = connect(&registry, "w1").await;
        let (_, _peer2) = connect(&registry, "w2").await;

        let dialer = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dial(&WorkerId::new("w1")).await })
        };
        next_dial_request(&mut peer).await;

        let stats = registry.stats();
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.pending_dials, 1);
        assert_eq!(stats.grace_period_entries, 0);

        dialer.abort();
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let registry = Registry::new(RegistryConfig::default());
        let (_, mut peer) = connect(&registry, "w1").await;

        let dialer = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dial(&WorkerId::new("w1")).await })
        };
        next_dial_request(&mut peer).await;

        registry.shutdown();
        assert!(registry.is_shutdown());
        assert!(registry.is_empty());
        assert!(matches!(
            dialer.await.unwrap(),
            Err(DialError::ConnectionClosed)
        ));

        // New registrations are refused
        let (ours, theirs) = tokio::io::duplex(1024);
        registry.register(WorkerId::new("w2"), Box::new(ours));
        assert!(!registry.contains(&WorkerId::new("w2")));
        let mut late = Framed::new(theirs, FrameCodec::new());
        while let Some(Ok(frame)) = late.next().await {
            assert!(matches!(frame.message, Message::Welcome { .. }));
        }
    }

    #[tokio::test]
    async fn test_worker_keepalive_frames_are_ignored() {
        let registry = Registry::new(RegistryConfig::default());
        let (_, mut peer) = connect(&registry, "w1").await;

        peer.send(Frame::control(Message::Keepalive { timestamp: 1 }))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(registry.contains(&WorkerId::new("w1")));
    }
}
