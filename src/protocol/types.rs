//! Wire Protocol Data Types
//!
//! This module defines the values that travel over a FlashNet connection.
//! Every message is a length-prefixed frame with a fixed 8-byte header.
//!
//! ## Frame Format
//!
//! ```text
//! +----------------+----------------+------------------+
//! | length (4B)    | type_id (4B)   | payload (length) |
//! +----------------+----------------+------------------+
//! ```
//!
//! Both header integers are unsigned 32-bit little-endian. `length` counts
//! only the payload bytes, never the header itself.

use bytes::Bytes;
use std::fmt;

/// Size of the frame header in bytes. Never changes.
pub const HEADER_LEN: usize = 8;

/// Default maximum payload size accepted on a connection (4 KB)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 4096;

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Number of payload bytes that follow the header
    pub length: u32,
    /// Message type, selects the handler chain
    pub type_id: u32,
}

impl Header {
    /// Creates a new header.
    pub fn new(length: u32, type_id: u32) -> Self {
        Self { length, type_id }
    }

    /// Payload length as a `usize`, for buffer sizing.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.length as usize
    }
}

/// A complete frame: message type plus payload.
///
/// The length prefix is implied by `payload.len()` and is only materialized
/// on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type identifier
    pub type_id: u32,
    /// Opaque application payload
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame.
    ///
    /// # Example
    /// ```
    /// use flashnet::protocol::Frame;
    /// let frame = Frame::new(1, "ping");
    /// assert_eq!(frame.len(), 4);
    /// ```
    pub fn new(type_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            payload: payload.into(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.payload) {
            Ok(s) => write!(f, "Frame(type={}, \"{}\")", self.type_id, s),
            Err(_) => write!(f, "Frame(type={}, <{} bytes>)", self.type_id, self.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lengths() {
        let frame = Frame::new(7, Bytes::from_static(b"hello"));
        assert_eq!(frame.len(), 5);
        assert_eq!(frame.wire_len(), 13);
        assert!(!frame.is_empty());
        assert!(Frame::new(7, Bytes::new()).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Frame::new(1, "ping").to_string(),
            "Frame(type=1, \"ping\")"
        );
        assert_eq!(
            Frame::new(2, vec![0xff, 0xfe]).to_string(),
            "Frame(type=2, <2 bytes>)"
        );
    }
}
