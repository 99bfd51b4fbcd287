//! Transport traits
//!
//! The core never names a concrete socket type. Control transports and reply
//! streams are opaque bidirectional byte streams, and the worker-side act of
//! "open a stream back and tag it" is the `StreamAcceptor` capability.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use bh_protocol::{write_frame, Frame, Message, RequestId, TunnelId};

use crate::error::BhError;
use crate::types::WorkerId;

/// A bidirectional byte stream usable as a control transport or reply stream
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport
pub type BoxedStream = Box<dyn Transport>;

/// Opens outbound byte streams to a fixed endpoint
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open one new stream
    async fn connect(&self) -> Result<BoxedStream, BhError>;

    /// Human-readable endpoint description for logs
    fn endpoint(&self) -> String;
}

#[async_trait]
impl<T: TransportConnector + ?Sized> TransportConnector for std::sync::Arc<T> {
    async fn connect(&self) -> Result<BoxedStream, BhError> {
        (**self).connect().await
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}

/// Identification a reply stream carries as its first frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandshake {
    /// Worker answering the dial
    pub worker_id: WorkerId,
    /// Tunnel the dial request arrived on
    pub tunnel_id: TunnelId,
    /// Dial request being answered
    pub request_id: RequestId,
}

impl StreamHandshake {
    /// Encode as a `StreamHello` frame
    pub fn to_frame(&self) -> Frame {
        Frame::new(
            self.request_id,
            Message::StreamHello {
                worker_id: self.worker_id.to_string(),
                tunnel_id: self.tunnel_id,
            },
        )
    }

    /// Decode from a frame; `None` unless it is a `StreamHello`
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame.message {
            Message::StreamHello {
                worker_id,
                tunnel_id,
            } => Some(Self {
                worker_id: WorkerId::new(worker_id),
                tunnel_id,
                request_id: frame.request_id,
            }),
            _ => None,
        }
    }
}

/// Worker-side capability to answer a dial request.
///
/// Given the handshake for a dial request, open a fresh stream to the control
/// plane, identify it, and return it ready for ordinary I/O.
#[async_trait]
pub trait StreamAcceptor: Send + Sync {
    /// Open and tag a reply stream
    async fn open_stream(&self, handshake: StreamHandshake) -> Result<BoxedStream, BhError>;
}

/// `StreamAcceptor` that connects with a `TransportConnector` and writes the
/// handshake frame before handing the stream over
pub struct HandshakeAcceptor<C> {
    connector: C,
}

impl<C: TransportConnector> HandshakeAcceptor<C> {
    /// Create a new acceptor
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// Get the underlying connector
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[async_trait]
impl<C: TransportConnector> StreamAcceptor for HandshakeAcceptor<C> {
    async fn open_stream(&self, handshake: StreamHandshake) -> Result<BoxedStream, BhError> {
        let mut stream = self.connector.connect().await?;
        write_frame(&mut stream, handshake.to_frame()).await?;
        tracing::debug!(
            "Opened reply stream for {} on tunnel {:#x} via {}",
            handshake.request_id,
            handshake.tunnel_id,
            self.connector.endpoint()
        );
        Ok(stream)
    }
}
