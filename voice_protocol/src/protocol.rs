use serde_json::Value;
use thiserror::Error;

/// Protocol version carried in the high nibble of the first header byte.
pub const PROTOCOL_VERSION: u8 = 0b0001;
/// Header size in 4-byte words.
pub const DEFAULT_HEADER_SIZE: u8 = 0b0001;

pub const HEADER_LEN: usize = 4;
pub const PAYLOAD_LENGTH_LEN: usize = 4;
/// Fixed prefix every frame starts with: header plus payload length.
pub const FRAME_PREFIX_LEN: usize = HEADER_LEN + PAYLOAD_LENGTH_LEN;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame too short: need {needed} bytes, have {available}")]
    FrameTooShort { needed: usize, available: usize },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown serialization: {0}")]
    UnknownSerialization(u8),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message type nibble.
///
/// Server acknowledgements and audio-only responses share the wire value 11;
/// only the direction of travel tells them apart, so both names map to the
/// same variant. Unknown values survive decoding untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Client → Server
    ClientFullRequest,
    ClientAudioOnlyRequest,

    // Server → Client
    ServerFullResponse,
    ServerAudioOnlyResponse,
    ServerErrorResponse,

    Unknown(u8),
}

impl MessageType {
    pub const SERVER_ACK: MessageType = MessageType::ServerAudioOnlyResponse;

    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0b0001 => MessageType::ClientFullRequest,
            0b0010 => MessageType::ClientAudioOnlyRequest,
            0b1001 => MessageType::ServerFullResponse,
            0b1011 => MessageType::ServerAudioOnlyResponse,
            0b1111 => MessageType::ServerErrorResponse,
            other => MessageType::Unknown(other),
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            MessageType::ClientFullRequest => 0b0001,
            MessageType::ClientAudioOnlyRequest => 0b0010,
            MessageType::ServerFullResponse => 0b1001,
            MessageType::ServerAudioOnlyResponse => 0b1011,
            MessageType::ServerErrorResponse => 0b1111,
            MessageType::Unknown(value) => value & 0x0F,
        }
    }

    /// Audio frames carry opaque bytes whatever their serialization nibble says.
    pub fn is_audio(self) -> bool {
        matches!(
            self,
            MessageType::ClientAudioOnlyRequest | MessageType::ServerAudioOnlyResponse
        )
    }
}

/// Message type specific flags nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flags {
    NoSequence,
    PositiveSequence,
    NegativeNoSequence,
    NegativeWithSequence,
    Other(u8),
}

impl Flags {
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0b0000 => Flags::NoSequence,
            0b0001 => Flags::PositiveSequence,
            0b0010 => Flags::NegativeNoSequence,
            0b0011 => Flags::NegativeWithSequence,
            other => Flags::Other(other),
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            Flags::NoSequence => 0b0000,
            Flags::PositiveSequence => 0b0001,
            Flags::NegativeNoSequence => 0b0010,
            Flags::NegativeWithSequence => 0b0011,
            Flags::Other(value) => value & 0x0F,
        }
    }
}

/// Payload serialization nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Serialization {
    None,
    Json,
    Thrift,
    Custom,
}

impl Serialization {
    pub fn as_nibble(self) -> u8 {
        match self {
            Serialization::None => 0b0000,
            Serialization::Json => 0b0001,
            Serialization::Thrift => 0b0011,
            Serialization::Custom => 0b1111,
        }
    }
}

impl TryFrom<u8> for Serialization {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & 0x0F {
            0b0000 => Ok(Serialization::None),
            0b0001 => Ok(Serialization::Json),
            0b0011 => Ok(Serialization::Thrift),
            0b1111 => Ok(Serialization::Custom),
            other => Err(DecodeError::UnknownSerialization(other)),
        }
    }
}

/// Payload compression nibble. Nothing in this profile compresses, so the
/// value is recorded and the payload passed through as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
    Custom,
    Other(u8),
}

impl Compression {
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0b0000 => Compression::None,
            0b0001 => Compression::Gzip,
            0b1111 => Compression::Custom,
            other => Compression::Other(other),
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            Compression::None => 0b0000,
            Compression::Gzip => 0b0001,
            Compression::Custom => 0b1111,
            Compression::Other(value) => value & 0x0F,
        }
    }
}

/// Decoded payload: parsed JSON for JSON-serialized control frames, raw
/// bytes for everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Raw(Vec<u8>),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    pub fn into_raw(self) -> Option<Vec<u8>> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            Payload::Json(_) => None,
        }
    }
}

/// The application-level unit carried by a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    pub message_type: MessageType,
    pub payload: Payload,
}

impl LogicalMessage {
    pub fn new(message_type: MessageType, payload: Payload) -> Self {
        Self {
            message_type,
            payload,
        }
    }
}

/// A fully decoded frame: the logical message plus the header selections it
/// travelled with.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub flags: Flags,
    pub serialization: Serialization,
    pub compression: Compression,
    pub message: LogicalMessage,
}

impl Frame {
    pub fn message_type(&self) -> MessageType {
        self.message.message_type
    }
}

/// Header policy for the two outbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// JSON control message
    FullRequest,
    /// Raw capture audio
    AudioOnlyRequest,
}

impl MessageKind {
    pub fn message_type(self) -> MessageType {
        match self {
            MessageKind::FullRequest => MessageType::ClientFullRequest,
            MessageKind::AudioOnlyRequest => MessageType::ClientAudioOnlyRequest,
        }
    }

    pub fn header_policy(self) -> (Flags, Serialization, Compression) {
        match self {
            MessageKind::FullRequest => (Flags::NoSequence, Serialization::Json, Compression::None),
            MessageKind::AudioOnlyRequest => {
                (Flags::NoSequence, Serialization::None, Compression::None)
            }
        }
    }
}

/// Build the four header bytes.
pub fn build_header(
    message_type: MessageType,
    flags: Flags,
    serialization: Serialization,
    compression: Compression,
) -> [u8; HEADER_LEN] {
    [
        (PROTOCOL_VERSION << 4) | DEFAULT_HEADER_SIZE,
        (message_type.as_nibble() << 4) | flags.as_nibble(),
        (serialization.as_nibble() << 4) | compression.as_nibble(),
        0x00,
    ]
}

/// Encode a message: [header: 4][payload length: u32 BE][payload...]
pub fn encode(
    message: &LogicalMessage,
    flags: Flags,
    serialization: Serialization,
    compression: Compression,
) -> Result<Vec<u8>, EncodeError> {
    let json_bytes;
    let payload: &[u8] = match &message.payload {
        Payload::Json(value) => {
            json_bytes = serde_json::to_vec(value)?;
            &json_bytes
        }
        Payload::Raw(bytes) => bytes,
    };

    let payload_len =
        u32::try_from(payload.len()).map_err(|_| EncodeError::PayloadTooLarge(payload.len()))?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
    out.extend_from_slice(&build_header(
        message.message_type,
        flags,
        serialization,
        compression,
    ));
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Encode a payload with the header policy of its message kind.
pub fn encode_message(payload: Payload, kind: MessageKind) -> Result<Vec<u8>, EncodeError> {
    let (flags, serialization, compression) = kind.header_policy();
    let message = LogicalMessage::new(kind.message_type(), payload);
    encode(&message, flags, serialization, compression)
}

/// Read the declared payload length from a frame prefix, if enough bytes
/// are present.
pub fn declared_payload_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < FRAME_PREFIX_LEN {
        return None;
    }
    let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Some(len as usize)
}

/// Decode one frame from the start of `bytes`. Bytes past the declared
/// payload are ignored.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let payload_len = declared_payload_len(bytes).ok_or(DecodeError::FrameTooShort {
        needed: FRAME_PREFIX_LEN,
        available: bytes.len(),
    })?;

    let version = bytes[0] >> 4;
    if version != PROTOCOL_VERSION {
        log::debug!("Frame carries protocol version {}", version);
    }

    let message_type = MessageType::from_nibble(bytes[1] >> 4);
    let flags = Flags::from_nibble(bytes[1]);
    let serialization = Serialization::try_from(bytes[2] >> 4)?;
    let compression = Compression::from_nibble(bytes[2]);

    let available = bytes.len() - FRAME_PREFIX_LEN;
    if payload_len > available {
        return Err(DecodeError::FrameTooShort {
            needed: FRAME_PREFIX_LEN + payload_len,
            available: bytes.len(),
        });
    }
    let body = &bytes[FRAME_PREFIX_LEN..FRAME_PREFIX_LEN + payload_len];

    let payload = if !message_type.is_audio() && serialization == Serialization::Json {
        let text = std::str::from_utf8(body)
            .map_err(|e| DecodeError::MalformedPayload(format!("invalid UTF-8: {}", e)))?;
        let value = serde_json::from_str(text)
            .map_err(|e| DecodeError::MalformedPayload(format!("invalid JSON: {}", e)))?;
        Payload::Json(value)
    } else {
        Payload::Raw(body.to_vec())
    };

    Ok(Frame {
        flags,
        serialization,
        compression,
        message: LogicalMessage::new(message_type, payload),
    })
}

/// Decode and keep only the logical message.
pub fn decode_frame(bytes: &[u8]) -> Result<LogicalMessage, DecodeError> {
    decode(bytes).map(|frame| frame.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_header() {
        let header = build_header(
            MessageType::ClientFullRequest,
            Flags::NoSequence,
            Serialization::Json,
            Compression::None,
        );
        assert_eq!(header, [0x11, 0x10, 0x10, 0x00]);
    }

    #[test]
    fn test_audio_only_request_layout() {
        let bytes = encode_message(Payload::Raw(vec![0u8; 6400]), MessageKind::AudioOnlyRequest)
            .unwrap();

        assert_eq!(bytes.len(), 6408);
        assert_eq!(&bytes[..4], &[0x11, 0x20, 0x00, 0x00]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x19, 0x00]);
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_bot_ready() {
        let body = br#"{"event":"BotReady"}"#;
        let mut bytes = vec![0x11, 0x90, 0x10, 0x00];
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(body);

        let message = decode_frame(&bytes).unwrap();
        assert_eq!(message.message_type, MessageType::ServerFullResponse);
        assert_eq!(message.message_type.as_nibble(), 9);
        assert_eq!(
            message.payload.as_json().and_then(|v| v["event"].as_str()),
            Some("BotReady")
        );
    }

    #[test]
    fn test_short_buffers_rejected() {
        for len in 0..FRAME_PREFIX_LEN {
            let bytes = vec![0x11; len];
            assert!(matches!(
                decode(&bytes),
                Err(DecodeError::FrameTooShort { available, .. }) if available == len
            ));
        }
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = encode_message(Payload::Raw(vec![1, 2, 3, 4]), MessageKind::AudioOnlyRequest)
            .unwrap();
        bytes.truncate(bytes.len() - 1);

        match decode(&bytes) {
            Err(DecodeError::FrameTooShort { needed, available }) => {
                assert_eq!(needed, 12);
                assert_eq!(available, 11);
            }
            other => panic!("expected FrameTooShort, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let mut bytes = build_header(
            MessageType::ServerFullResponse,
            Flags::NoSequence,
            Serialization::Json,
            Compression::None,
        )
        .to_vec();
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(b"{no");

        assert!(matches!(decode(&bytes), Err(DecodeError::MalformedPayload(_))));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut bytes = vec![0x11, 0x90, 0x10, 0x00];
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&[0xFF, 0xFE]);

        assert!(matches!(decode(&bytes), Err(DecodeError::MalformedPayload(_))));
    }

    #[test]
    fn test_unknown_serialization() {
        let mut bytes = vec![0x11, 0x90, 0x20, 0x00];
        bytes.extend_from_slice(&0u32.to_be_bytes());

        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::UnknownSerialization(2))
        ));
    }

    #[test]
    fn test_unknown_message_type_preserved() {
        let mut bytes = vec![0x11, 0x50, 0x00, 0x00];
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(42);

        let message = decode_frame(&bytes).unwrap();
        assert_eq!(message.message_type, MessageType::Unknown(5));
        assert_eq!(message.payload, Payload::Raw(vec![42]));
    }

    #[test]
    fn test_audio_payload_stays_raw_with_json_serialization() {
        let message = LogicalMessage::new(
            MessageType::ServerAudioOnlyResponse,
            Payload::Raw(b"not json".to_vec()),
        );
        let bytes = encode(&message, Flags::NoSequence, Serialization::Json, Compression::None)
            .unwrap();

        assert_eq!(decode_frame(&bytes).unwrap(), message);
    }

    #[test]
    fn test_compression_passes_through() {
        let message = LogicalMessage::new(
            MessageType::ServerAudioOnlyResponse,
            Payload::Raw(vec![9, 8, 7]),
        );
        let bytes =
            encode(&message, Flags::NoSequence, Serialization::None, Compression::Gzip).unwrap();

        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.compression, Compression::Gzip);
        assert_eq!(frame.message, message);
    }

    #[test]
    fn test_server_ack_aliases_audio_response() {
        assert_eq!(MessageType::SERVER_ACK, MessageType::ServerAudioOnlyResponse);
        assert_eq!(MessageType::SERVER_ACK.as_nibble(), 11);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let message = LogicalMessage::new(
            MessageType::ServerFullResponse,
            Payload::Json(json!({"event": "ResponseDone"})),
        );
        let mut bytes =
            encode(&message, Flags::NoSequence, Serialization::Json, Compression::None).unwrap();
        bytes.extend_from_slice(&[0xAA, 0xBB]);

        assert_eq!(decode_frame(&bytes).unwrap(), message);
    }
}
