//! Pending-dial table
//!
//! Correlates a reply stream arriving asynchronously with the dial call that
//! asked for it. Each dial gets a fresh request id and a single-use slot;
//! whoever resolves the slot first wins and everything later is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use bh_core::{BoxedStream, DialError};
use bh_protocol::RequestId;

/// Outcome delivered to a waiting dial
pub type DialResult = Result<BoxedStream, DialError>;

type Slots = DashMap<RequestId, oneshot::Sender<DialResult>>;

/// Per-tunnel table of dials waiting for their reply stream
pub struct PendingDials {
    /// Maps request id -> completion slot
    slots: Arc<Slots>,
    /// Next request id to allocate
    next_request_id: AtomicU64,
    /// Set once the owning tunnel has closed; no new slots after that
    closed: AtomicBool,
}

/// Single-use wait handle returned by [`PendingDials::register`].
///
/// Dropping the handle before it resolves cancels the dial: the slot is
/// removed so a stream arriving later is discarded instead of delivered.
pub struct DialHandle {
    request_id: RequestId,
    rx: oneshot::Receiver<DialResult>,
    slots: Arc<Slots>,
}

impl PendingDials {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_request_id: AtomicU64::new(1), // 0 is reserved for control frames
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate the next request id and insert a slot for it.
    ///
    /// Fails with `ConnectionClosed` once [`close_all`](Self::close_all) has run.
    pub fn register(&self) -> Result<DialHandle, DialError> {
        if self.is_closed() {
            return Err(DialError::ConnectionClosed);
        }

        let request_id = self.allocate_request_id();
        let (tx, rx) = oneshot::channel();
        self.slots.insert(request_id, tx);

        let handle = DialHandle {
            request_id,
            rx,
            slots: Arc::clone(&self.slots),
        };

        // close_all may have drained between the check above and the insert;
        // dropping the handle removes the slot again.
        if self.is_closed() {
            return Err(DialError::ConnectionClosed);
        }

        tracing::trace!("Registered pending dial {}", request_id);
        Ok(handle)
    }

    /// Deliver `result` to the dial waiting on `request_id`.
    ///
    /// Returns true if a waiting caller received it. Resolving an unknown,
    /// cancelled or already-resolved id is a no-op; a stream that cannot be
    /// delivered is shut down.
    pub fn resolve(&self, request_id: RequestId, result: DialResult) -> bool {
        let Some((_, tx)) = self.slots.remove(&request_id) else {
            tracing::debug!("No pending dial for {}, discarding result", request_id);
            discard(result);
            return false;
        };

        match tx.send(result) {
            Ok(()) => {
                tracing::debug!("Resolved pending dial {}", request_id);
                true
            }
            Err(undelivered) => {
                tracing::debug!("Dial {} was abandoned, discarding result", request_id);
                discard(undelivered);
                false
            }
        }
    }

    /// Remove the slot for `request_id` without resolving it
    pub fn cancel(&self, request_id: RequestId) {
        if self.slots.remove(&request_id).is_some() {
            tracing::debug!("Cancelled pending dial {}", request_id);
        }
    }

    /// Fail every outstanding dial with `ConnectionClosed` and refuse new ones.
    ///
    /// Returns how many dials were failed.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<RequestId> = self.slots.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, tx)) = self.slots.remove(&id) {
                if tx.send(Err(DialError::ConnectionClosed)).is_ok() {
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Whether the table has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of dials currently waiting
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if no dials are waiting
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn allocate_request_id(&self) -> RequestId {
        // Wrapping past u64::MAX is not reachable in practice; skip the
        // reserved id if it ever happens.
        let mut id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        if id == RequestId::CONTROL.as_u64() {
            id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        }
        RequestId::new(id)
    }
}

impl Default for PendingDials {
    fn default() -> Self {
        Self::new()
    }
}

impl DialHandle {
    /// Request id this handle is waiting on
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait until the slot is resolved
    pub async fn wait(mut self) -> DialResult {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(DialError::ConnectionClosed),
        }
    }
}

impl Drop for DialHandle {
    fn drop(&mut self) {
        if self.slots.remove(&self.request_id).is_some() {
            tracing::debug!("Dial {} abandoned before completion", self.request_id);
        }
    }
}

/// Shut down a stream nobody is waiting for
pub(crate) fn discard(result: DialResult) {
    let Ok(mut stream) = result else {
        return;
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let _ = stream.shutdown().await;
            });
        }
        Err(_) => drop(stream),
    }
}
