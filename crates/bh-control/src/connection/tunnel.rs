//! A worker's control transport and the dials multiplexed over it

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};

use bh_core::config::RegistryConfig;
use bh_core::time::current_time_millis;
use bh_core::{BoxedStream, DialError, TunnelState, WorkerId};
use bh_protocol::{Frame, FrameCodec, Message, RequestId, TunnelId};

use super::health::HealthMonitor;
use super::pending::PendingDials;
use super::stream::ReverseStream;

type FrameReader = FramedRead<ReadHalf<BoxedStream>, FrameCodec>;
type FrameWriter = FramedWrite<WriteHalf<BoxedStream>, FrameCodec>;

/// One live control transport for one worker.
///
/// The tunnel owns the transport exclusively. A background task reads
/// frames from it and writes keepalives; dials write `DialRequest` frames
/// and wait in the pending table for the worker's reply stream.
pub struct Tunnel {
    /// Instance id sent to the worker in `Welcome`
    id: TunnelId,
    /// Worker on the other end
    worker_id: WorkerId,
    /// Lifecycle state; receivers observe closure
    state: watch::Sender<TunnelState>,
    /// Dials waiting for a reply stream
    pending: PendingDials,
    /// Write half of the transport; `None` once released
    writer: Mutex<Option<FrameWriter>>,
    /// Inbound activity tracking
    health: HealthMonitor,
    /// Registration time (ms since epoch)
    connected_at: u64,
}

impl Tunnel {
    /// Take ownership of `transport` and start the tunnel's read loop.
    ///
    /// The tunnel is `Connecting` until its `Welcome` frame is written.
    pub fn spawn(worker_id: WorkerId, transport: BoxedStream, config: &RegistryConfig) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(transport);
        let (state, _) = watch::channel(TunnelState::Connecting);

        let tunnel = Arc::new(Self {
            id: rand::random(),
            worker_id,
            state,
            pending: PendingDials::new(),
            writer: Mutex::new(Some(FramedWrite::new(write_half, FrameCodec::new()))),
            health: HealthMonitor::new(config.keepalive_interval, config.keepalive_timeout),
            connected_at: current_time_millis(),
        });

        let reader = FramedRead::new(read_half, FrameCodec::new());
        tokio::spawn(Arc::clone(&tunnel).run(reader));

        tunnel
    }

    /// Tunnel instance id
    pub fn id(&self) -> TunnelId {
        self.id
    }

    /// Worker this tunnel belongs to
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    /// Check if the tunnel accepts dials
    pub fn is_active(&self) -> bool {
        self.state() == TunnelState::Active
    }

    /// Check if the tunnel has closed
    pub fn is_closed(&self) -> bool {
        self.state() == TunnelState::Closed
    }

    /// Registration time (ms since epoch)
    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    /// Number of dials waiting for a reply stream
    pub fn pending_dials(&self) -> usize {
        self.pending.len()
    }

    /// Time since the worker was last heard from
    pub fn idle_for(&self) -> Duration {
        self.health.idle_for()
    }

    /// Wait until the tunnel has closed
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == TunnelState::Closed).await;
    }

    /// Ask the worker for a new stream and wait for it.
    ///
    /// Waits without bound; callers apply their own deadline by dropping the
    /// future, which cancels the request and discards a late reply stream.
    pub async fn dial(&self) -> Result<ReverseStream, DialError> {
        let mut state = self.state.subscribe();
        let current = *state
            .wait_for(|s| *s != TunnelState::Connecting)
            .await
            .map_err(|_| DialError::ConnectionClosed)?;
        if current != TunnelState::Active {
            return Err(DialError::ConnectionClosed);
        }

        let handle = self.pending.register()?;
        let request_id = handle.request_id();

        self.send_frame(Frame::new(request_id, Message::DialRequest))
            .await?;
        tracing::debug!(
            "Sent dial request {} to {} on tunnel {:#x}",
            request_id,
            self.worker_id,
            self.id
        );

        let stream = handle.wait().await?;
        Ok(ReverseStream::new(self.worker_id.clone(), request_id, stream))
    }

    /// Hand a reply stream to the dial waiting on `request_id`.
    ///
    /// Returns false and shuts the stream down if nobody is waiting.
    pub fn accept_stream(&self, request_id: RequestId, stream: BoxedStream) -> bool {
        self.pending.resolve(request_id, Ok(stream))
    }

    /// Close the tunnel: fail pending dials and stop the read loop.
    ///
    /// The transport is released by the read loop once it observes closure.
    /// Idempotent.
    pub fn close(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == TunnelState::Closed {
                false
            } else {
                *state = TunnelState::Closed;
                true
            }
        });

        if changed {
            let failed = self.pending.close_all();
            tracing::info!(
                "Tunnel {:#x} for {} closed ({} pending dials failed)",
                self.id,
                self.worker_id,
                failed
            );
        }
    }

    async fn run(self: Arc<Self>, mut reader: FrameReader) {
        let welcome = Frame::control(Message::Welcome { tunnel_id: self.id });
        if self.send_frame(welcome).await.is_ok() {
            self.state.send_if_modified(|state| {
                if *state == TunnelState::Connecting {
                    *state = TunnelState::Active;
                    true
                } else {
                    false
                }
            });
            tracing::info!("Tunnel {:#x} for {} is active", self.id, self.worker_id);
        }

        let mut ticker = self.health.ticker();

        loop {
            tokio::select! {
                _ = self.closed() => break,

                frame = reader.next() => match frame {
                    Some(Ok(frame)) => {
                        self.health.record_activity();
                        self.handle_frame(frame);
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Protocol error from {}: {}", self.worker_id, e);
                        break;
                    }
                    None => {
                        tracing::debug!("Control transport for {} reached end of stream", self.worker_id);
                        break;
                    }
                },

                _ = ticker.tick() => {
                    if self.health.is_expired() {
                        tracing::warn!(
                            "No traffic from {} for {:?}, closing tunnel {:#x}",
                            self.worker_id,
                            self.health.idle_for(),
                            self.id
                        );
                        break;
                    }
                    let keepalive = Frame::control(Message::Keepalive {
                        timestamp: current_time_millis(),
                    });
                    if self.send_frame(keepalive).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.close();
        drop(reader);
        self.release_writer().await;
    }

    fn handle_frame(&self, frame: Frame) {
        match frame.message {
            Message::DialResponse {
                accepted: false,
                reason,
            } => {
                let reason = reason.unwrap_or_else(|| "refused".to_string());
                tracing::debug!(
                    "{} refused dial {}: {}",
                    self.worker_id,
                    frame.request_id,
                    reason
                );
                self.pending
                    .resolve(frame.request_id, Err(DialError::Rejected(reason)));
            }
            Message::DialResponse { accepted: true, .. } => {
                tracing::trace!("{} accepted dial {}", self.worker_id, frame.request_id);
            }
            Message::Keepalive { timestamp } => {
                tracing::trace!("Keepalive from {} (ts={})", self.worker_id, timestamp);
            }
            Message::Error { code, message } => {
                tracing::warn!("Error from {}: {:?} {}", self.worker_id, code, message);
            }
            other => {
                tracing::warn!(
                    "Unexpected {:?} frame from {}",
                    other.message_type(),
                    self.worker_id
                );
            }
        }
    }

    /// Write one frame. Any failure closes the tunnel.
    async fn send_frame(&self, frame: Frame) -> Result<(), DialError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(DialError::ConnectionClosed);
        };

        let error = match tokio::time::timeout(self.health.timeout, writer.send(frame)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("write stalled for {:?}", self.health.timeout),
        };
        drop(guard);

        tracing::warn!("Control transport write to {} failed: {}", self.worker_id, error);
        self.close();
        Err(DialError::ConnectionClosed)
    }

    async fn release_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = tokio::time::timeout(self.health.interval, writer.close()).await;
        }
        tracing::debug!("Released control transport for {}", self.worker_id);
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.id)
            .field("worker_id", &self.worker_id)
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .finish()
    }
}
