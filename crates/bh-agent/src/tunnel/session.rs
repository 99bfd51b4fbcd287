//! Worker side of a reverse-dial tunnel
//!
//! A session opens one control transport to the control plane, identifies
//! the worker with `Hello` and waits for `Welcome`. From then on a control
//! loop answers every `DialRequest` by opening a fresh reply stream through
//! the session's [`StreamAcceptor`] and handing it to the [`ReverseListener`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use bh_core::config::AgentConfig;
use bh_core::time::current_time_millis;
use bh_core::{
    BhError, BoxedStream, DialError, HandshakeAcceptor, StreamAcceptor, StreamHandshake,
    TransportConnector, WorkerId,
};
use bh_protocol::{
    read_frame, write_frame, ErrorCode, Frame, FrameCodec, Message, ProtocolError, RequestId,
    TunnelId,
};

use super::reconnect::ExponentialBackoff;

/// Reply streams waiting to be accepted.
///
/// Dial requests are answered concurrently; this bounds how many opened
/// streams can queue up before `accept` is called.
const INCOMING_STREAM_CAPACITY: usize = 256;

/// Frames queued for the control transport writer
const CONTROL_WRITE_CAPACITY: usize = 64;

/// Connects a worker to the control plane
pub struct AgentSession {
    config: AgentConfig,
    worker_id: WorkerId,
    connector: Arc<dyn TransportConnector>,
    acceptor: Arc<dyn StreamAcceptor>,
}

impl AgentSession {
    /// Create a session that opens reply streams with the same connector as
    /// the control transport
    pub fn new(config: AgentConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let acceptor = Arc::new(HandshakeAcceptor::new(Arc::clone(&connector)));
        Self {
            worker_id: config.worker_id(),
            config,
            connector,
            acceptor,
        }
    }

    /// Replace the capability used to answer dial requests
    pub fn with_acceptor(mut self, acceptor: Arc<dyn StreamAcceptor>) -> Self {
        self.acceptor = acceptor;
        self
    }

    /// Worker id announced in `Hello`
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Open a control transport and register with the control plane.
    ///
    /// Fails with `VersionMismatch` or `Refused` if the control plane turns
    /// the worker away.
    pub async fn connect(&self) -> Result<ReverseListener, BhError> {
        let mut transport = self.connector.connect().await?;

        write_frame(&mut transport, Frame::control(Message::hello(self.worker_id.as_str())))
            .await?;

        let timeout = self.config.connect_timeout;
        let reply = tokio::time::timeout(timeout, read_frame(&mut transport))
            .await
            .map_err(|_| BhError::HandshakeTimeout(timeout))??;

        let tunnel_id = match reply.message {
            Message::Welcome { tunnel_id } => tunnel_id,
            Message::Error {
                code: ErrorCode::VersionMismatch,
                message,
            } => return Err(BhError::VersionMismatch(message)),
            Message::Error {
                code: ErrorCode::ShuttingDown,
                ..
            } => return Err(BhError::ShuttingDown),
            Message::Error { message, .. } => return Err(BhError::Refused(message)),
            other => return Err(ProtocolError::UnexpectedMessage(other.message_type()).into()),
        };

        tracing::info!(
            "Registered with {} as {} (tunnel {:#x})",
            self.connector.endpoint(),
            self.worker_id,
            tunnel_id
        );

        let (read_half, write_half) = tokio::io::split(transport);
        let (frame_tx, frame_rx) = mpsc::channel(CONTROL_WRITE_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_STREAM_CAPACITY);
        let (ended_tx, ended_rx) = oneshot::channel();

        tokio::spawn(run_writer(
            FramedWrite::new(write_half, FrameCodec::new()),
            frame_rx,
        ));

        let control = ControlLoop {
            worker_id: self.worker_id.clone(),
            tunnel_id,
            reader: FramedRead::new(read_half, FrameCodec::new()),
            writer: frame_tx,
            acceptor: Arc::clone(&self.acceptor),
            incoming: incoming_tx,
            keepalive_interval: self.config.keepalive_interval,
            keepalive_timeout: self.config.keepalive_timeout,
        };
        let task = tokio::spawn(async move {
            let reason = control.run().await;
            let _ = ended_tx.send(reason);
        });

        Ok(ReverseListener {
            worker_id: self.worker_id.clone(),
            tunnel_id,
            incoming: incoming_rx,
            ended: Some(ended_rx),
            task,
        })
    }

    /// Keep the worker connected until `cancel` fires.
    ///
    /// Each accepted stream is passed to `handler` on its own task. Failed
    /// connects and dropped sessions are retried with exponential backoff;
    /// a version mismatch or refusal ends the loop with that error.
    pub async fn run_with_reconnect<H, Fut>(
        &self,
        cancel: CancellationToken,
        handler: H,
    ) -> Result<(), BhError>
    where
        H: Fn(BoxedStream) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut backoff = ExponentialBackoff::from_config(&self.config.backoff);

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.connect() => result,
            };

            match connected {
                Ok(mut listener) => {
                    backoff.reset();
                    let reason = loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            accepted = listener.accept() => match accepted {
                                Ok(stream) => {
                                    tokio::spawn(handler(stream));
                                }
                                Err(e) => break e,
                            },
                        }
                    };
                    tracing::warn!("Session with {} ended: {}", self.connector.endpoint(), reason);
                }
                Err(e) if is_fatal(&e) => {
                    tracing::error!("Control plane refused {}: {}", self.worker_id, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to {}: {}", self.connector.endpoint(), e);
                }
            }

            let delay = backoff.next_delay();
            tracing::info!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Errors that retrying cannot fix
fn is_fatal(error: &BhError) -> bool {
    matches!(error, BhError::VersionMismatch(_) | BhError::Refused(_))
}

/// Yields the reply streams a registered worker opens.
///
/// Dropping the listener ends the session and closes the control transport.
pub struct ReverseListener {
    worker_id: WorkerId,
    tunnel_id: TunnelId,
    incoming: mpsc::Receiver<BoxedStream>,
    ended: Option<oneshot::Receiver<BhError>>,
    task: JoinHandle<()>,
}

impl ReverseListener {
    /// Worker id this session registered
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Tunnel id assigned by the control plane
    pub fn tunnel_id(&self) -> TunnelId {
        self.tunnel_id
    }

    /// Wait for the next reverse-dialed stream.
    ///
    /// Once the session is over this returns why, and `ConnectionClosed`
    /// on every later call.
    pub async fn accept(&mut self) -> Result<BoxedStream, BhError> {
        if let Some(stream) = self.incoming.recv().await {
            return Ok(stream);
        }

        match self.ended.take() {
            Some(ended) => Err(ended
                .await
                .unwrap_or(BhError::Dial(DialError::ConnectionClosed))),
            None => Err(BhError::Dial(DialError::ConnectionClosed)),
        }
    }
}

impl Drop for ReverseListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type FrameReader = FramedRead<ReadHalf<BoxedStream>, FrameCodec>;
type FrameWriter = FramedWrite<WriteHalf<BoxedStream>, FrameCodec>;

/// Reads the control transport and answers dial requests
struct ControlLoop {
    worker_id: WorkerId,
    tunnel_id: TunnelId,
    reader: FrameReader,
    writer: mpsc::Sender<Frame>,
    acceptor: Arc<dyn StreamAcceptor>,
    incoming: mpsc::Sender<BoxedStream>,
    keepalive_interval: Duration,
    keepalive_timeout: Duration,
}

impl ControlLoop {
    /// Run until the control transport fails; returns the reason
    async fn run(mut self) -> BhError {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.keepalive_interval,
            self.keepalive_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                frame = self.reader.next() => match frame {
                    Some(Ok(frame)) => {
                        last_activity = Instant::now();
                        self.handle_frame(frame);
                    }
                    Some(Err(e)) => return e.into(),
                    None => return ProtocolError::ConnectionClosed.into(),
                },

                _ = ticker.tick() => {
                    if last_activity.elapsed() > self.keepalive_timeout {
                        return BhError::KeepaliveTimeout(self.keepalive_timeout);
                    }
                    let keepalive = Frame::control(Message::Keepalive {
                        timestamp: current_time_millis(),
                    });
                    if self.writer.send(keepalive).await.is_err() {
                        return ProtocolError::ConnectionClosed.into();
                    }
                }

                _ = self.writer.closed() => {
                    return ProtocolError::ConnectionClosed.into();
                }
            }
        }
    }

    fn handle_frame(&self, frame: Frame) {
        match frame.message {
            Message::DialRequest => self.answer(frame.request_id),
            Message::Keepalive { timestamp } => {
                tracing::trace!("Keepalive from control plane (ts={})", timestamp);
            }
            Message::Error { code, message } => {
                tracing::warn!("Error from control plane: {:?} {}", code, message);
            }
            other => {
                tracing::warn!("Unexpected {:?} frame from control plane", other.message_type());
            }
        }
    }

    /// Open the reply stream for `request_id` on its own task
    fn answer(&self, request_id: RequestId) {
        tracing::debug!("Dial request {} on tunnel {:#x}", request_id, self.tunnel_id);

        let handshake = StreamHandshake {
            worker_id: self.worker_id.clone(),
            tunnel_id: self.tunnel_id,
            request_id,
        };
        let acceptor = Arc::clone(&self.acceptor);
        let incoming = self.incoming.clone();
        let writer = self.writer.clone();

        tokio::spawn(async move {
            match acceptor.open_stream(handshake).await {
                Ok(stream) => {
                    if incoming.send(stream).await.is_err() {
                        tracing::debug!("Listener gone, dropping reply stream {}", request_id);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to open reply stream {}: {}", request_id, e);
                    let refusal = Frame::new(request_id, Message::dial_refused(e.to_string()));
                    let _ = writer.send(refusal).await;
                }
            }
        });
    }
}

/// Single writer for the control transport
async fn run_writer(mut sink: FrameWriter, mut frames: mpsc::Receiver<Frame>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(frame).await {
            tracing::warn!("Control transport write failed: {}", e);
            return;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_util::codec::Framed;

    /// Connector whose far ends are handed to the test as the control plane
    struct DuplexConnector {
        accepted: mpsc::UnboundedSender<DuplexStream>,
    }

    #[async_trait]
    impl TransportConnector for DuplexConnector {
        async fn connect(&self) -> Result<BoxedStream, BhError> {
            let (ours, theirs) = tokio::io::duplex(64 * 1024);
            self.accepted
                .send(theirs)
                .map_err(|_| std::io::Error::from(std::io::ErrorKind::ConnectionRefused))?;
            Ok(Box::new(ours))
        }

        fn endpoint(&self) -> String {
            "duplex".to_string()
        }
    }

    struct FailingAcceptor;

    #[async_trait]
    impl StreamAcceptor for FailingAcceptor {
        async fn open_stream(&self, _handshake: StreamHandshake) -> Result<BoxedStream, BhError> {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into())
        }
    }

    fn session(config: AgentConfig) -> (AgentSession, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(DuplexConnector { accepted: tx });
        (AgentSession::new(config, connector), rx)
    }

    fn config() -> AgentConfig {
        AgentConfig {
            worker_id: Some("w1".to_string()),
            connect_timeout: Duration::from_secs(5),
            ..AgentConfig::default()
        }
    }

    /// Play the control plane's side of registration
    async fn welcome(
        control_plane: &mut mpsc::UnboundedReceiver<DuplexStream>,
        tunnel_id: TunnelId,
    ) -> Framed<DuplexStream, FrameCodec> {
        let mut stream = control_plane.recv().await.unwrap();
        let hello = read_frame(&mut stream).await.unwrap();
        assert!(matches!(hello.message, Message::Hello { ref worker_id, .. } if worker_id == "w1"));
        write_frame(&mut stream, Frame::control(Message::Welcome { tunnel_id }))
            .await
            .unwrap();
        Framed::new(stream, FrameCodec::new())
    }

    #[tokio::test]
    async fn test_connect_and_answer_dial() {
        let (session, mut control_plane) = session(config());

        let (listener, mut control) = tokio::join!(session.connect(), welcome(&mut control_plane, 99));
        let mut listener = listener.unwrap();
        assert_eq!(listener.tunnel_id(), 99);
        assert_eq!(listener.worker_id(), &WorkerId::new("w1"));

        control
            .send(Frame::new(RequestId::new(4), Message::DialRequest))
            .await
            .unwrap();

        // Reply stream arrives at the control plane tagged with the request
        let mut reply = control_plane.recv().await.unwrap();
        let handshake = StreamHandshake::from_frame(read_frame(&mut reply).await.unwrap()).unwrap();
        assert_eq!(handshake.request_id, RequestId::new(4));
        assert_eq!(handshake.tunnel_id, 99);
        assert_eq!(handshake.worker_id, WorkerId::new("w1"));

        let mut stream = listener.accept().await.unwrap();
        reply.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[tokio::test]
    async fn test_version_mismatch_refusal() {
        let (session, mut control_plane) = session(config());

        let refuse = async {
            let mut stream = control_plane.recv().await.unwrap();
            read_frame(&mut stream).await.unwrap();
            let error = Message::Error {
                code: ErrorCode::VersionMismatch,
                message: "protocol version 1.0 is not supported".to_string(),
            };
            write_frame(&mut stream, Frame::control(error)).await.unwrap();
            stream
        };

        let (result, _stream) = tokio::join!(session.connect(), refuse);
        assert!(matches!(result, Err(BhError::VersionMismatch(_))));
    }

    #[tokio::test]
    async fn test_acceptor_failure_sends_refusal() {
        let (session, mut control_plane) = session(config());
        let session = session.with_acceptor(Arc::new(FailingAcceptor));

        let (listener, mut control) = tokio::join!(session.connect(), welcome(&mut control_plane, 1));
        let _listener = listener.unwrap();

        control
            .send(Frame::new(RequestId::new(8), Message::DialRequest))
            .await
            .unwrap();

        let frame = control.next().await.unwrap().unwrap();
        assert_eq!(frame.request_id, RequestId::new(8));
        assert!(matches!(
            frame.message,
            Message::DialResponse { accepted: false, reason: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_control_eof_ends_session() {
        let (session, mut control_plane) = session(config());

        let (listener, control) = tokio::join!(session.connect(), welcome(&mut control_plane, 1));
        let mut listener = listener.unwrap();

        drop(control);
        assert!(matches!(
            listener.accept().await,
            Err(BhError::Protocol(ProtocolError::ConnectionClosed))
        ));
        assert!(matches!(
            listener.accept().await,
            Err(BhError::Dial(DialError::ConnectionClosed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_control_plane_times_out() {
        let config = AgentConfig {
            keepalive_interval: Duration::from_secs(1),
            keepalive_timeout: Duration::from_secs(3),
            ..config()
        };
        let (session, mut control_plane) = session(config);

        let (listener, mut control) = tokio::join!(session.connect(), welcome(&mut control_plane, 1));
        let mut listener = listener.unwrap();

        // Swallow keepalives without answering
        tokio::spawn(async move { while control.next().await.is_some() {} });

        assert!(matches!(
            listener.accept().await,
            Err(BhError::KeepaliveTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_after_session_drop() {
        let config = AgentConfig {
            backoff: bh_core::config::BackoffConfig {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
                multiplier: 2.0,
                jitter: 0.0,
            },
            ..config()
        };
        let (session, mut control_plane) = session(config);
        let cancel = CancellationToken::new();

        let runner = {
            let cancel = cancel.clone();
            tokio::spawn(async move { session.run_with_reconnect(cancel, |_stream| async {}).await })
        };

        let first = welcome(&mut control_plane, 1).await;
        drop(first);

        // Agent comes back on its own
        let _second = welcome(&mut control_plane, 2).await;

        cancel.cancel();
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutting_down_control_plane_is_retried() {
        let config = AgentConfig {
            backoff: bh_core::config::BackoffConfig {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
                multiplier: 2.0,
                jitter: 0.0,
            },
            ..config()
        };
        let (session, mut control_plane) = session(config);
        let cancel = CancellationToken::new();

        let runner = {
            let cancel = cancel.clone();
            tokio::spawn(async move { session.run_with_reconnect(cancel, |_stream| async {}).await })
        };

        let mut stream = control_plane.recv().await.unwrap();
        read_frame(&mut stream).await.unwrap();
        let error = Message::Error {
            code: ErrorCode::ShuttingDown,
            message: "control plane is shutting down".to_string(),
        };
        write_frame(&mut stream, Frame::control(error)).await.unwrap();

        let _registered = welcome(&mut control_plane, 5).await;

        cancel.cancel();
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_refusal_stops_reconnecting() {
        let (session, mut control_plane) = session(config());

        let runner = tokio::spawn(async move {
            session
                .run_with_reconnect(CancellationToken::new(), |_stream| async {})
                .await
        });

        let mut stream = control_plane.recv().await.unwrap();
        read_frame(&mut stream).await.unwrap();
        let error = Message::Error {
            code: ErrorCode::InvalidHandshake,
            message: "worker id must not be empty".to_string(),
        };
        write_frame(&mut stream, Frame::control(error)).await.unwrap();

        assert!(matches!(
            runner.await.unwrap(),
            Err(BhError::Refused(_))
        ));
    }
}
