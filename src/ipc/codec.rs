//! Frame codec for the wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────────────────────────┐
//! │ len (4B) │   UTF-8 JSON object          │
//! │ u32 BE   │   {"id", "type", ...fields}  │
//! └──────────┴──────────────────────────────┘
//! ```
//! Length = size of the JSON body, NOT including the 4-byte prefix.
//!
//! A TCP read may hold part of a frame or several frames. The decoder buffers
//! until a whole frame is present and is polled again for any further frames
//! already buffered before more bytes are read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ipc::message::Message;
use crate::types::{Error, ProtocolError, Result};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default cap on the frame body (5 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

/// Outcome of decoding one complete frame.
///
/// The frame boundary was intact, so an `Err` here only invalidates this
/// frame. Errors that lose the boundary surface as the decoder's `Error`.
pub type DecodedFrame = std::result::Result<Message, ProtocolError>;

/// Length-prefixed JSON codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub const fn new() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    #[must_use]
    pub const fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub const fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Encode one message into a standalone frame.
    pub fn encode_frame(&mut self, message: Message) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(message, &mut buf)?;
        Ok(buf.freeze())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = DecodedFrame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = &buf[..LENGTH_PREFIX_SIZE];
        let body_len = prefix.get_u32() as usize;
        if body_len > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_bytes,
            }
            .into());
        }

        let frame_len = LENGTH_PREFIX_SIZE + body_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let body = buf.split_to(body_len);
        Ok(Some(Message::from_slice(&body)))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(&message.to_json())?;
        if body.len() > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_bytes,
            }
            .into());
        }

        buf.reserve(LENGTH_PREFIX_SIZE + body.len());
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CorrelationId;
    use serde_json::{json, Map, Value};

    fn message(tag: &str, fields: Value) -> Message {
        let Value::Object(fields) = fields else {
            unreachable!()
        };
        Message::new(CorrelationId::new(), tag, fields)
    }

    fn raw_frame(body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut codec = FrameCodec::new();
        let original = message("StopRegistrationRequest", json!({}));
        let mut buf = BytesMut::from(&codec.encode_frame(original.clone()).unwrap()[..]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = FrameCodec::new();
        let frame = codec
            .encode_frame(message("LoadPlanningDataResponse", json!({"success": true})))
            .unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[2..frame.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[frame.len() - 1..]);
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_ok());
    }

    #[test]
    fn test_two_frames_in_one_buffer_decode_in_order() {
        let mut codec = FrameCodec::new();
        let first = message("StopRegistrationRequest", json!({}));
        let second = message("StopRegistrationResponse", json!({"success": true}));

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_invalid_json_only_drops_that_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = raw_frame(b"{not json");
        let valid = message("StopRegistrationRequest", json!({}));
        codec.encode(valid.clone(), &mut buf).unwrap();

        let bad = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(bad, Err(ProtocolError::MalformedFrame(_))));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), valid);
    }

    #[test]
    fn test_oversized_length_prefix_is_fatal() {
        let mut codec = FrameCodec::new().with_max_frame_bytes(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::FrameTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let mut codec = FrameCodec::new().with_max_frame_bytes(8);
        let mut fields = Map::new();
        fields.insert("padding".into(), Value::String("x".repeat(32)));
        let err = codec
            .encode_frame(Message::new(CorrelationId::new(), "Custom", fields))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_eof_with_partial_frame_is_an_error() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(50);
        buf.extend_from_slice(&[b'{'; 10]);
        assert!(codec.decode_eof(&mut buf).is_err());
    }
}
