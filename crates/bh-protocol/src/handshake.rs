//! Single-frame exchange on a raw stream
//!
//! Handshakes (`Hello` on a control transport, `StreamHello` on a reply
//! stream) are read with exact-length reads so nothing past the frame is
//! consumed. A reply stream carries application bytes right after its
//! handshake, and a buffered reader would swallow them.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{Frame, FrameCodec};
use crate::error::ProtocolError;
use crate::frame::{check_payload_len, FrameHeader, HEADER_SIZE};

/// Read exactly one frame from `reader`.
///
/// Returns `ProtocolError::ConnectionClosed` if the stream ends before the
/// frame is complete.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::zeroed(HEADER_SIZE);
    read_exact(reader, &mut buf[..]).await?;

    // Peek the header to learn the payload length, then hand the whole frame
    // to the codec so validation lives in one place.
    let header = FrameHeader::decode(&mut buf.clone())?.ok_or(ProtocolError::ConnectionClosed)?;
    let payload_len = check_payload_len(header.payload_length as usize)?;

    buf.resize(HEADER_SIZE + payload_len, 0);
    read_exact(reader, &mut buf[HEADER_SIZE..]).await?;

    FrameCodec::new()
        .decode(&mut buf)?
        .ok_or(ProtocolError::ConnectionClosed)
}

/// Encode `frame` and write it to `writer`, flushing afterwards.
pub async fn write_frame<W>(writer: &mut W, frame: Frame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    FrameCodec::new().encode(frame, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::request::RequestId;

    #[tokio::test]
    async fn test_handshake_leaves_trailing_bytes() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let hello = Frame::new(
            RequestId::new(9),
            Message::StreamHello {
                worker_id: "w1".to_string(),
                tunnel_id: 77,
            },
        );
        write_frame(&mut client, hello.clone()).await.unwrap();
        client.write_all(b"payload after handshake").await.unwrap();
        drop(client);

        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(received, hello);

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"payload after handshake");
    }

    #[tokio::test]
    async fn test_eof_mid_header() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0]).await.unwrap();
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_eof_mid_payload() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let mut buf = BytesMut::new();
        FrameCodec::new()
            .encode(Frame::control(Message::hello("w1")), &mut buf)
            .unwrap();
        client.write_all(&buf[..buf.len() - 1]).await.unwrap();
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_garbage_header() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(b"GET / HTTP/1.1\r\n")
            .await
            .unwrap();

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(ProtocolError::UnknownMessageType(_))));
    }
}
