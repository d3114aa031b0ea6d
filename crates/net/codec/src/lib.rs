//! Wire framing and protobuf conversion for strand connections.
//!
//! Every message on a connection is carried in a frame consisting of a
//! 4-byte big-endian length followed by exactly that many body bytes.
//! [`FrameCodec`] turns a byte stream into whole frames and back; the
//! [`ProtoMessage`] trait converts typed domain messages to and from the
//! protobuf bytes that travel inside a frame.

mod error;

pub use error::CodecError;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quick_protobuf::{BytesReader, MessageRead, MessageWrite, Writer};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Default upper bound for a single frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length-prefixed frame codec.
///
/// The decoder only ever yields complete frames; partial input is buffered
/// until the rest of the frame arrives.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl asynchronous_codec::Encoder for FrameCodec {
    type Item<'a> = Bytes;
    type Error = CodecError;

    fn encode(&mut self, item: Self::Item<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.len();
        if size > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        let prefix = u32::try_from(size).map_err(|_| CodecError::FrameTooLarge {
            size,
            max: self.max_frame_size,
        })?;

        dst.reserve(LENGTH_PREFIX + size);
        dst.put_u32(prefix);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl asynchronous_codec::Decoder for FrameCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = src.get(..LENGTH_PREFIX) else {
            src.reserve(LENGTH_PREFIX - src.len());
            return Ok(None);
        };
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(header);
        let size = u32::from_be_bytes(prefix) as usize;

        if size > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let total = LENGTH_PREFIX + size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        Ok(Some(src.split_to(size).freeze()))
    }
}

/// A domain message with a protobuf wire representation.
///
/// Implementors validate on the way in (`from_proto`) so that the rest of
/// the code base only ever handles well-formed values.
pub trait ProtoMessage: Sized {
    type Proto: MessageWrite + for<'a> MessageRead<'a>;

    fn into_proto(self) -> Self::Proto;

    fn from_proto(proto: Self::Proto) -> Result<Self, CodecError>;

    /// Serializes the message into protobuf bytes (no length prefix).
    fn encode_to_bytes(self) -> Result<Bytes, CodecError> {
        encode_proto(&self.into_proto())
    }

    /// Parses and validates a message from protobuf bytes.
    fn decode_from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_proto(decode_proto(bytes)?)
    }
}

/// Writes a raw protobuf message into a fresh buffer.
pub fn encode_proto<P: MessageWrite>(proto: &P) -> Result<Bytes, CodecError> {
    let mut buf = Vec::with_capacity(proto.get_size());
    let mut writer = Writer::new(&mut buf);
    proto.write_message(&mut writer)?;
    Ok(Bytes::from(buf))
}

/// Reads a raw protobuf message spanning all of `bytes`.
pub fn decode_proto<P: for<'a> MessageRead<'a>>(bytes: &[u8]) -> Result<P, CodecError> {
    let mut reader = BytesReader::from_bytes(bytes);
    Ok(P::from_reader(&mut reader, bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asynchronous_codec::{Decoder, Encoder};
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn encoded(body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::default()
            .encode(Bytes::copy_from_slice(body), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_encode_writes_big_endian_prefix() {
        let buf = encoded(b"hello");
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..], b"hello");
    }

    #[test]
    fn test_decode_waits_for_full_header() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_waits_for_full_body() {
        let mut codec = FrameCodec::default();
        let full = encoded(b"partial frame");
        let mut buf = BytesMut::from(&full[..8]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[8..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"partial frame");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_multiple_frames_in_one_buffer() {
        let mut codec = FrameCodec::default();
        let mut buf = encoded(b"one");
        buf.extend_from_slice(&encoded(b""));
        buf.extend_from_slice(&encoded(b"three"));

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_empty());
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"three");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        assert_matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { size: 17, max: 16 })
        );
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::new();
        assert_matches!(
            codec.encode(Bytes::from_static(b"too long"), &mut buf),
            Err(CodecError::FrameTooLarge { size: 8, max: 4 })
        );
        assert!(buf.is_empty());
    }

    proptest! {
        #[test]
        fn test_split_stream_yields_original_frames(
            bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
            split in 0usize..512,
        ) {
            let mut codec = FrameCodec::default();
            let mut wire = BytesMut::new();
            for body in &bodies {
                codec.encode(Bytes::copy_from_slice(body), &mut wire).unwrap();
            }

            let split = split.min(wire.len());
            let mut buf = BytesMut::from(&wire[..split]);
            let mut decoded = Vec::new();
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame.to_vec());
            }
            buf.extend_from_slice(&wire[split..]);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame.to_vec());
            }

            prop_assert_eq!(decoded, bodies);
        }
    }
}
