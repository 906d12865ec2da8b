//! Wire Protocol Implementation
//!
//! This module implements FlashNet's framing: every message is an 8-byte
//! header (`length`, `type_id`, both little-endian `u32`) followed by
//! `length` payload bytes.
//!
//! ## Modules
//!
//! - `types`: Defines `Header`, `Frame` and protocol constants
//! - `codec`: Pure encode/decode functions and the size-bounded `FrameCodec`
//!
//! ## Example
//!
//! ```
//! use flashnet::protocol::{decode, encode, Frame};
//!
//! // Framing an outgoing message
//! let bytes = encode(1, b"ping").unwrap();
//!
//! // Deframing incoming data
//! let (frame, consumed) = decode(&bytes).unwrap().unwrap();
//! assert_eq!(frame, Frame::new(1, "ping"));
//! assert_eq!(consumed, bytes.len());
//! ```

pub mod codec;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{decode, decode_header, encode, CodecError, CodecResult, FrameCodec};
pub use types::{Frame, Header, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN};
