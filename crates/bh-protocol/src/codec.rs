//! `tokio_util` codec for control-transport frames

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{check_payload_len, FrameHeader};
use crate::message::Message;
use crate::request::RequestId;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `RequestId::CONTROL` unless the frame belongs to a dial
    pub request_id: RequestId,
    pub message: Message,
}

impl Frame {
    pub fn new(request_id: RequestId, message: Message) -> Self {
        Self {
            request_id,
            message,
        }
    }

    /// Frame not bound to any dial request
    pub fn control(message: Message) -> Self {
        Self::new(RequestId::CONTROL, message)
    }

    /// Decode the payload announced by `header`, rejecting a payload whose
    /// message type differs from the one in the header.
    fn from_payload(header: FrameHeader, payload: Bytes) -> Result<Self, ProtocolError> {
        let message: Message = bincode::deserialize(&payload)?;
        let actual = message.message_type();
        if actual != header.message_type {
            return Err(ProtocolError::TypeMismatch {
                announced: header.message_type,
                actual,
            });
        }
        Ok(Self::new(header.request_id, message))
    }
}

/// Length-prefixed bincode frames.
///
/// A header whose payload has not fully arrived is parked until the next
/// call, so the header is never parsed twice.
#[derive(Debug, Default)]
pub struct FrameCodec {
    parked: Option<FrameHeader>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let header = match self.parked.take() {
            Some(header) => header,
            None => match FrameHeader::decode(src)? {
                Some(header) => header,
                None => return Ok(None),
            },
        };

        let len = check_payload_len(header.payload_length as usize)?;
        if src.len() < len {
            src.reserve(len - src.len());
            self.parked = Some(header);
            return Ok(None);
        }

        Frame::from_payload(header, src.split_to(len).freeze()).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = bincode::serialize(&frame.message)?;
        let len = check_payload_len(payload.len())?;

        FrameHeader::new(frame.request_id, frame.message.message_type(), len as u32).encode(dst);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
