//! Reassembly of frames from a byte stream that may split or merge them.
//!
//! Only stream transports such as raw TCP need this. A WebSocket delivers
//! each frame as one whole message, so the session decodes messages with
//! [`crate::decode_frame`] directly.

use crate::protocol::{decode, declared_payload_len, DecodeError, Frame, FRAME_PREFIX_LEN};

/// Sanity limit on a single frame's declared payload (16MB)
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Accumulates inbound chunks and yields complete frames in order.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes still waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, `None` if more bytes are needed.
    ///
    /// A frame that fails to decode is consumed and reported so the stream
    /// keeps going with the following frame. An oversized length prefix
    /// cannot be resynchronised and discards everything buffered.
    pub fn next_frame(&mut self) -> Option<Result<Frame, DecodeError>> {
        let payload_len = declared_payload_len(&self.buffer)?;

        if payload_len > MAX_PAYLOAD_LEN {
            log::warn!(
                "Discarding {} buffered bytes: declared payload {} exceeds limit",
                self.buffer.len(),
                payload_len
            );
            self.buffer.clear();
            return Some(Err(DecodeError::MalformedPayload(format!(
                "declared payload length {} exceeds {}",
                payload_len, MAX_PAYLOAD_LEN
            ))));
        }

        let frame_len = FRAME_PREFIX_LEN + payload_len;
        if self.buffer.len() < frame_len {
            return None;
        }

        let result = decode(&self.buffer[..frame_len]);
        self.buffer.drain(..frame_len);
        Some(result)
    }
}
