//! Newline-delimited JSON framing for signaling messages.
//!
//! One message per line. A frame larger than the configured maximum is a
//! protocol violation and fails the connection rather than being skipped.

use crate::messages::{ClientMessage, ServerMessage};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum encoded frame length in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),

    /// Frame exceeded the maximum length
    #[error("Frame too long: {len} bytes (max {max})")]
    FrameTooLong {
        /// Observed length so far.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Shared line-framing state.
#[derive(Debug, Clone)]
struct LineFramer {
    max_frame_len: usize,
}

impl LineFramer {
    fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    fn encode<T: Serialize>(&self, item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let encoded = serde_json::to_vec(item)?;
        if encoded.len() >= self.max_frame_len {
            return Err(CodecError::FrameTooLong {
                len: encoded.len(),
                max: self.max_frame_len,
            });
        }
        dst.reserve(encoded.len() + 1);
        dst.put_slice(&encoded);
        dst.put_u8(b'\n');
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, src: &mut BytesMut) -> Result<Option<T>, CodecError> {
        match src.iter().position(|b| *b == b'\n') {
            Some(pos) if pos > self.max_frame_len => Err(CodecError::FrameTooLong {
                len: pos,
                max: self.max_frame_len,
            }),
            Some(pos) => {
                let line = src.split_to(pos);
                src.advance(1);
                // serde_json tolerates the trailing '\r' of CRLF input as
                // whitespace, so no explicit trim is needed.
                Ok(Some(serde_json::from_slice(&line)?))
            }
            None if src.len() > self.max_frame_len => Err(CodecError::FrameTooLong {
                len: src.len(),
                max: self.max_frame_len,
            }),
            None => Ok(None),
        }
    }
}

/// Codec for the participant end: encodes [`ClientMessage`], decodes
/// [`ServerMessage`].
#[derive(Debug, Clone)]
pub struct ClientCodec {
    framer: LineFramer,
}

impl ClientCodec {
    /// Create a codec with the given maximum frame length.
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            framer: LineFramer::new(max_frame_len),
        }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Encoder<ClientMessage> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.framer.encode(&item, dst)
    }
}

impl Decoder for ClientCodec {
    type Item = ServerMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ServerMessage>, CodecError> {
        self.framer.decode(src)
    }
}

/// Codec for the relay end: encodes [`ServerMessage`], decodes
/// [`ClientMessage`].
#[derive(Debug, Clone)]
pub struct ServerCodec {
    framer: LineFramer,
}

impl ServerCodec {
    /// Create a codec with the given maximum frame length.
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            framer: LineFramer::new(max_frame_len),
        }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Encoder<ServerMessage> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.framer.encode(&item, dst)
    }
}

impl Decoder for ServerCodec {
    type Item = ClientMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ClientMessage>, CodecError> {
        self.framer.decode(src)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::{RoomId, SessionId};

    #[test]
    fn test_client_codec_roundtrip_through_server_codec() {
        let msg = ClientMessage::Join {
            room_id: RoomId::from("r1"),
            display_name: "alice".to_string(),
        };

        let mut client = ClientCodec::default();
        let mut server = ServerCodec::default();
        let mut buf = BytesMut::new();

        client.encode(msg.clone(), &mut buf).unwrap();
        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame_returns_none() {
        let mut server = ServerCodec::default();
        let mut buf = BytesMut::from(&b"{\"type\":\"leave"[..]);
        assert!(server.decode(&mut buf).unwrap().is_none());

        buf.put_slice(b"\"}\n");
        assert_eq!(server.decode(&mut buf).unwrap(), Some(ClientMessage::Leave));
    }

    #[test]
    fn test_decode_multiple_frames_in_order() {
        let first = ServerMessage::Welcome {
            session_id: SessionId::new(),
        };
        let second = ServerMessage::MemberLeft {
            session_id: SessionId::new(),
        };

        let mut server = ServerCodec::default();
        let mut client = ClientCodec::default();
        let mut buf = BytesMut::new();
        server.encode(first.clone(), &mut buf).unwrap();
        server.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(client.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(client.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(client.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut server = ServerCodec::new(16);
        let mut buf = BytesMut::from(&[b'x'; 32][..]);
        let err = server.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLong { max: 16, .. }));
    }

    #[test]
    fn test_decode_rejects_oversized_line_even_when_complete() {
        let mut server = ServerCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_slice(b"{\"type\":\"leave\",\"padding\":\"xxxx\"}\n");
        let err = server.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLong { max: 16, .. }));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let mut server = ServerCodec::default();
        let mut buf = BytesMut::from(&b"not json\n"[..]);
        let err = server.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame(_)));
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let mut server = ServerCodec::default();
        let mut buf = BytesMut::from(&b"{\"type\":\"leave\"}\r\n"[..]);
        assert_eq!(server.decode(&mut buf).unwrap(), Some(ClientMessage::Leave));
    }
}
