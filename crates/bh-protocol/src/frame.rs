//! Frame header encoding/decoding
//!
//! The frame format uses a 12-byte header:
//! - request_id: 8 bytes (u64, big-endian)
//! - message_type: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::request::RequestId;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 12;

/// Maximum payload size.
///
/// Control messages are small; the 24-bit length field could carry more but
/// nothing legitimate needs it.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Reject payload lengths above `MAX_PAYLOAD_SIZE`; passes the length through otherwise
pub(crate) fn check_payload_len(len: usize) -> Result<usize, ProtocolError> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(len)
}

/// Frame header containing routing and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Dial request this frame belongs to
    pub request_id: RequestId,
    /// Type of message in the payload
    pub message_type: MessageType,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(request_id: RequestId, message_type: MessageType, payload_length: u32) -> Self {
        Self {
            request_id,
            message_type,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u64(self.request_id.as_u64());
        dst.put_u8(self.message_type.as_u8());
        // payload_length: 24-bit
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (unknown message type). Nothing
    /// is consumed in either of those cases.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let msg_type_byte = src[8];
        let message_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::UnknownMessageType(msg_type_byte))?;

        let request_id = RequestId::new(src.get_u64());
        let _ = src.get_u8();
        let len_high = src.get_u8() as u32;
        let len_low = src.get_u16() as u32;
        let payload_length = (len_high << 16) | len_low;

        Ok(Some(Self {
            request_id,
            message_type,
            payload_length,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(RequestId::new(u64::MAX - 1), MessageType::DialRequest, 300);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_24_bit_length() {
        let header = FrameHeader::new(RequestId::CONTROL, MessageType::Keepalive, 0x00AB_CDEF);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);
        assert_eq!(&buf[9..], &[0xAB, 0xCD, 0xEF]);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload_length, 0x00AB_CDEF);
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0u8; HEADER_SIZE - 1][..]);
        let result = FrameHeader::decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE - 1);
    }

    #[test]
    fn test_unknown_message_type() {
        let mut buf = BytesMut::from(&[0, 0, 0, 0, 0, 0, 0, 1, 0xFE, 0, 0, 10][..]);
        let result = FrameHeader::decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownMessageType(0xFE))
        ));
        assert_eq!(buf.len(), HEADER_SIZE);
    }
}
