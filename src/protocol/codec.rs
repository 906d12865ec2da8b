//! Length-Prefixed Frame Codec
//!
//! Pure functions that turn `(type_id, payload)` pairs into wire bytes and
//! back. Nothing in here touches a socket: reading exact byte counts off a
//! stream is the connection's job (see `connection::framed`), which keeps
//! this module trivially testable.
//!
//! ## How Decoding Works
//!
//! Like a streaming parser, [`decode`] looks at a buffer and returns either:
//! - `Ok(Some((frame, consumed)))` - A whole frame was present
//! - `Ok(None)` - Need more data
//! - `Err(CodecError)` - The bytes can never become a valid frame
//!
//! The size bound is not part of the wire format itself; it is a policy
//! applied by [`FrameCodec`] on top of the raw header.

use crate::protocol::types::{Frame, Header, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors produced while framing or deframing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Header input was not exactly `HEADER_LEN` bytes
    #[error("malformed header: expected {HEADER_LEN} bytes, got {0}")]
    MalformedHeader(usize),

    /// Declared or actual payload exceeds the allowed maximum
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a frame as `length ∥ type_id ∥ payload`.
///
/// Fails only when the payload cannot be described by a 32-bit length.
///
/// # Example
/// ```
/// use flashnet::protocol::codec::encode;
/// let bytes = encode(1, b"ping").unwrap();
/// assert_eq!(&bytes[..], &[4, 0, 0, 0, 1, 0, 0, 0, b'p', b'i', b'n', b'g']);
/// ```
pub fn encode(type_id: u32, payload: &[u8]) -> CodecResult<Bytes> {
    let length = u32::try_from(payload.len()).map_err(|_| CodecError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32_le(length);
    buf.put_u32_le(type_id);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decodes an 8-byte header into `(length, type_id)`.
///
/// Any length/type pair is structurally valid; bounding `length` is up to
/// the caller.
pub fn decode_header(buf: &[u8]) -> CodecResult<Header> {
    let raw: [u8; HEADER_LEN] = buf
        .try_into()
        .map_err(|_| CodecError::MalformedHeader(buf.len()))?;

    let length = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let type_id = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    Ok(Header::new(length, type_id))
}

/// Attempts to decode one whole frame from the front of `buf`.
///
/// No size limit is applied; use [`FrameCodec::decode`] for bounded input.
pub fn decode(buf: &[u8]) -> CodecResult<Option<(Frame, usize)>> {
    decode_bounded(buf, u32::MAX)
}

fn decode_bounded(buf: &[u8], max: u32) -> CodecResult<Option<(Frame, usize)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let header = decode_header(&buf[..HEADER_LEN])?;
    if header.length > max {
        return Err(CodecError::FrameTooLarge {
            size: header.payload_len(),
            max: max as usize,
        });
    }

    let total = HEADER_LEN + header.payload_len();
    if buf.len() < total {
        return Ok(None);
    }

    let payload = Bytes::copy_from_slice(&buf[HEADER_LEN..total]);
    Ok(Some((Frame::new(header.type_id, payload), total)))
}

/// A codec that enforces a maximum payload size in both directions.
///
/// # Example
///
/// ```
/// use flashnet::protocol::FrameCodec;
///
/// let codec = FrameCodec::new(16);
/// let bytes = codec.encode(3, b"hello").unwrap();
/// let (frame, consumed) = codec.decode(&bytes).unwrap().unwrap();
/// assert_eq!(frame.type_id, 3);
/// assert_eq!(consumed, bytes.len());
///
/// assert!(codec.encode(3, &[0u8; 17]).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: u32,
}

impl FrameCodec {
    /// Creates a codec that rejects payloads larger than `max_frame_size`.
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    /// The configured payload limit.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Encodes a frame, refusing payloads above the limit.
    pub fn encode(&self, type_id: u32, payload: &[u8]) -> CodecResult<Bytes> {
        if payload.len() > self.max_frame_size as usize {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size as usize,
            });
        }
        encode(type_id, payload)
    }

    /// Decodes a header and checks its declared length against the limit.
    ///
    /// This runs before any payload byte is read from the stream.
    pub fn decode_header(&self, buf: &[u8]) -> CodecResult<Header> {
        let header = decode_header(buf)?;
        self.check(&header)?;
        Ok(header)
    }

    /// Checks a decoded header against the limit.
    pub fn check(&self, header: &Header) -> CodecResult<()> {
        if header.length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: header.payload_len(),
                max: self.max_frame_size as usize,
            });
        }
        Ok(())
    }

    /// Attempts to decode one whole frame, rejecting oversized headers as
    /// soon as they are visible.
    pub fn decode(&self, buf: &[u8]) -> CodecResult<Option<(Frame, usize)>> {
        decode_bounded(buf, self.max_frame_size)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
