//! Per-connection handshake handling
//!
//! Every inbound connection to the control server starts with exactly one
//! handshake frame. A `Hello` turns the connection into a worker's control
//! transport; a `StreamHello` marks it as the reply stream for a dial.

use tokio::io::AsyncWriteExt;

use bh_core::{BhError, BoxedStream, StreamHandshake, WorkerId};
use bh_protocol::{
    is_compatible_version, read_frame, write_frame, ErrorCode, Frame, Message, ProtocolError,
    RequestId, TunnelId, PROTOCOL_VERSION,
};

use crate::connection::Registry;

/// What an accepted connection turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// A worker's control transport, now registered
    Control {
        worker_id: WorkerId,
        tunnel_id: TunnelId,
    },
    /// A reply stream for a dial
    Reply {
        worker_id: WorkerId,
        request_id: RequestId,
        /// Whether a waiting dial received it
        delivered: bool,
    },
}

/// Read the handshake on `stream` and hand the connection to `registry`.
///
/// The handshake must arrive within the registry's `handshake_timeout`.
/// Refused handshakes get a best-effort `Error` frame before the stream is
/// closed.
pub async fn serve_connection(
    registry: &Registry,
    mut stream: BoxedStream,
) -> Result<Accepted, BhError> {
    let timeout = registry.config().handshake_timeout;
    let frame = match tokio::time::timeout(timeout, read_frame(&mut stream)).await {
        Ok(frame) => frame?,
        Err(_) => return Err(BhError::HandshakeTimeout(timeout)),
    };

    let request_id = frame.request_id;
    match frame.message {
        Message::Hello { worker_id, version } => {
            if !is_compatible_version(version.as_deref()) {
                let version = version.unwrap_or_default();
                refuse(
                    registry,
                    &mut stream,
                    ErrorCode::VersionMismatch,
                    format!(
                        "protocol version {} is not supported (expected {})",
                        version, PROTOCOL_VERSION
                    ),
                )
                .await;
                return Err(BhError::VersionMismatch(version));
            }

            if worker_id.is_empty() {
                refuse(
                    registry,
                    &mut stream,
                    ErrorCode::InvalidHandshake,
                    "worker id must not be empty".to_string(),
                )
                .await;
                return Err(BhError::Refused("empty worker id".to_string()));
            }

            if registry.is_shutdown() {
                refuse(
                    registry,
                    &mut stream,
                    ErrorCode::ShuttingDown,
                    "control plane is shutting down".to_string(),
                )
                .await;
                return Err(BhError::ShuttingDown);
            }

            let worker_id = WorkerId::new(worker_id);
            let tunnel_id = registry.register(worker_id.clone(), stream);
            Ok(Accepted::Control {
                worker_id,
                tunnel_id,
            })
        }

        Message::StreamHello {
            worker_id,
            tunnel_id,
        } => {
            let handshake = StreamHandshake {
                worker_id: WorkerId::new(worker_id),
                tunnel_id,
                request_id,
            };
            let worker_id = handshake.worker_id.clone();
            let delivered = registry.accept_stream(handshake, stream);
            Ok(Accepted::Reply {
                worker_id,
                request_id,
                delivered,
            })
        }

        other => {
            let message_type = other.message_type();
            refuse(
                registry,
                &mut stream,
                ErrorCode::InvalidHandshake,
                format!("expected Hello or StreamHello, got {:?}", message_type),
            )
            .await;
            Err(ProtocolError::UnexpectedMessage(message_type).into())
        }
    }
}

/// Write an `Error` frame and close the stream, ignoring failures
async fn refuse(registry: &Registry, stream: &mut BoxedStream, code: ErrorCode, message: String) {
    tracing::debug!("Refusing handshake: {}", message);
    let frame = Frame::control(Message::Error { code, message });
    let timeout = registry.config().handshake_timeout;
    let _ = tokio::time::timeout(timeout, async {
        write_frame(stream, frame).await?;
        stream.shutdown().await?;
        Ok::<_, ProtocolError>(())
    })
    .await;
}
