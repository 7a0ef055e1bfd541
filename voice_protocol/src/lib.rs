//! # Voice Protocol
//!
//! Binary frame protocol spoken between the voice chat client and server.
//!
//! Every frame is a 4-byte nibble-packed header, a big-endian `u32` payload
//! length and the payload:
//!
//! ```text
//! byte 0: version(4) | header size(4)
//! byte 1: message type(4) | flags(4)
//! byte 2: serialization(4) | compression(4)
//! byte 3: reserved
//! byte 4-7: payload length (BE)
//! ```
//!
//! This crate provides:
//! - Frame encoding/decoding
//! - JSON event envelopes carried by control frames
//! - Reassembly of frames from a chunked byte stream
//!
//! ## Example Usage
//!
//! ```rust
//! use voice_protocol::{decode_frame, encode_message, MessageKind, MessageType, Payload};
//! use serde_json::json;
//!
//! let bytes = encode_message(
//!     Payload::Json(json!({"event": "BotUpdateConfig"})),
//!     MessageKind::FullRequest,
//! )
//! .unwrap();
//!
//! let message = decode_frame(&bytes).unwrap();
//! assert_eq!(message.message_type, MessageType::ClientFullRequest);
//! ```

pub mod events;
pub mod protocol;
pub mod stream;

// Re-export commonly used types
pub use events::{EventType, JsonEvent};
pub use protocol::{
    build_header, decode, decode_frame, encode, encode_message, Compression, DecodeError,
    EncodeError, Flags, Frame, LogicalMessage, MessageKind, MessageType, Payload, Serialization,
    FRAME_PREFIX_LEN,
};
pub use stream::FrameBuffer;
