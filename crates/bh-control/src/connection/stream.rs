//! Reverse-dialed stream handed to dial callers

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use bh_core::{BoxedStream, WorkerId};
use bh_protocol::RequestId;

/// A stream opened by a worker in answer to a dial.
///
/// Reads and writes go straight to the underlying transport; the handshake
/// frame has already been consumed. Dropping or shutting down the stream
/// closes only this stream, never the worker's tunnel.
pub struct ReverseStream {
    worker_id: WorkerId,
    request_id: RequestId,
    inner: BoxedStream,
}

impl ReverseStream {
    pub(crate) fn new(worker_id: WorkerId, request_id: RequestId, inner: BoxedStream) -> Self {
        Self {
            worker_id,
            request_id,
            inner,
        }
    }

    /// Worker that opened this stream
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Dial request this stream answered
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Unwrap into the raw transport
    pub fn into_inner(self) -> BoxedStream {
        self.inner
    }
}

impl fmt::Debug for ReverseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseStream")
            .field("worker_id", &self.worker_id)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for ReverseStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ReverseStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
