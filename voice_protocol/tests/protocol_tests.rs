//! Wire-level behaviour of the frame codec as seen by a peer.

use serde_json::json;
use voice_protocol::{
    decode, encode, encode_message, Compression, DecodeError, EventType, Flags, FrameBuffer,
    JsonEvent, LogicalMessage, MessageKind, MessageType, Payload, Serialization,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_round_trip_preserves_header_selections() {
    init_logging();

    let cases = vec![
        (
            LogicalMessage::new(
                MessageType::ClientFullRequest,
                Payload::Json(json!({"event": "BotUpdateConfig", "payload": {"speaker": "a"}})),
            ),
            Flags::NoSequence,
            Serialization::Json,
            Compression::None,
        ),
        (
            LogicalMessage::new(MessageType::ClientAudioOnlyRequest, Payload::Raw(vec![1; 6400])),
            Flags::NegativeNoSequence,
            Serialization::None,
            Compression::None,
        ),
        (
            LogicalMessage::new(MessageType::ServerErrorResponse, Payload::Raw(b"oops".to_vec())),
            Flags::NegativeWithSequence,
            Serialization::Custom,
            Compression::Custom,
        ),
        (
            LogicalMessage::new(MessageType::ServerFullResponse, Payload::Raw(Vec::new())),
            Flags::PositiveSequence,
            Serialization::Thrift,
            Compression::Gzip,
        ),
    ];

    for (message, flags, serialization, compression) in cases {
        let bytes = encode(&message, flags, serialization, compression).unwrap();
        let frame = decode(&bytes).unwrap();

        assert_eq!(frame.message, message);
        assert_eq!(frame.flags, flags);
        assert_eq!(frame.serialization, serialization);
        assert_eq!(frame.compression, compression);
    }
}

#[test]
fn test_frame_size_matches_declared_length() {
    init_logging();

    let event = JsonEvent::new(EventType::UserAudio, None);
    let bytes = encode_message(Payload::Json(event.to_value()), MessageKind::FullRequest).unwrap();

    let declared = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    assert_eq!(bytes.len(), 8 + declared);
    assert_eq!(&bytes[8..], serde_json::to_vec(&event.to_value()).unwrap().as_slice());
}

#[test]
fn test_declared_length_beyond_buffer() {
    init_logging();

    let mut bytes = vec![0x11, 0xB0, 0x00, 0x00];
    bytes.extend_from_slice(&1000u32.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 999]);

    assert!(matches!(
        decode(&bytes),
        Err(DecodeError::FrameTooShort {
            needed: 1008,
            available: 1007
        })
    ));
}

#[test]
fn test_server_response_stream() {
    init_logging();

    // A server turn: transcript, reply text, two audio segments, done.
    let frames: Vec<Vec<u8>> = vec![
        server_json(json!({"event": "SentenceRecognizedDone", "payload": {"sentence": "hi"}})),
        server_json(json!({"event": "LLMResponse", "payload": {"sentence": "hello"}})),
        server_audio(&[1, 2, 3]),
        server_audio(&[4, 5]),
        server_json(json!({"event": "ResponseDone"})),
    ];

    let mut buffer = FrameBuffer::new();
    for frame in &frames {
        // deliver in awkward chunk sizes
        for chunk in frame.chunks(3) {
            buffer.push(chunk);
        }
    }

    let mut kinds = Vec::new();
    while let Some(frame) = buffer.next_frame() {
        kinds.push(frame.unwrap().message_type());
    }

    assert_eq!(
        kinds,
        vec![
            MessageType::ServerFullResponse,
            MessageType::ServerFullResponse,
            MessageType::ServerAudioOnlyResponse,
            MessageType::ServerAudioOnlyResponse,
            MessageType::ServerFullResponse,
        ]
    );
}

fn server_json(value: serde_json::Value) -> Vec<u8> {
    let message = LogicalMessage::new(MessageType::ServerFullResponse, Payload::Json(value));
    encode(&message, Flags::NoSequence, Serialization::Json, Compression::None).unwrap()
}

fn server_audio(data: &[u8]) -> Vec<u8> {
    let message = LogicalMessage::new(
        MessageType::ServerAudioOnlyResponse,
        Payload::Raw(data.to_vec()),
    );
    encode(&message, Flags::NoSequence, Serialization::None, Compression::None).unwrap()
}
