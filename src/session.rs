//! WebSocket session with the voice bot server.
//!
//! One session owns one connection. Outbound messages are encoded with the
//! frame codec and written as binary messages; inbound binary messages are
//! decoded and routed: JSON responses to the registered handler, audio to the
//! playback queue. A transport error or server close runs a single teardown
//! that closes the socket and disposes the playback queue. There is no
//! automatic reconnect.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;
use voice_protocol::{
    decode_frame, encode_message, EncodeError, EventType, JsonEvent, LogicalMessage, MessageKind,
    MessageType, Payload,
};

use crate::playback::PlaybackQueue;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("WebSocket connection failed: {0}")]
    Connection(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to send message: {0}")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("Session is not open")]
    NotOpen,

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] EncodeError),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

type JsonHandler = Box<dyn FnMut(&Value) + Send>;
type ServerErrorHandler = Box<dyn FnMut(&Payload) + Send>;

/// Handlers installed before the reader starts, so the first frames the
/// server sends are never missed.
#[derive(Default)]
pub struct SessionHandlers {
    json: Option<JsonHandler>,
    server_error: Option<ServerErrorHandler>,
}

impl SessionHandlers {
    pub fn on_json_message<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.json = Some(Box::new(handler));
        self
    }

    pub fn on_server_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Payload) + Send + 'static,
    {
        self.server_error = Some(Box::new(handler));
        self
    }
}

/// Decodes inbound frames and hands them to their consumers.
struct Router {
    playback: PlaybackQueue,
    ready: watch::Sender<bool>,
    json_handler: Mutex<Option<JsonHandler>>,
    error_handler: Mutex<Option<ServerErrorHandler>>,
}

impl Router {
    fn new(playback: PlaybackQueue, handlers: SessionHandlers) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            playback,
            ready,
            json_handler: Mutex::new(handlers.json),
            error_handler: Mutex::new(handlers.server_error),
        }
    }

    /// Route one binary message. Returns the message type it was routed as,
    /// or `None` when the frame could not be decoded and was dropped.
    fn route(&self, bytes: &[u8]) -> Option<MessageType> {
        let message = match decode_frame(bytes) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Session: dropping undecodable frame ({} bytes): {}", bytes.len(), e);
                return None;
            }
        };

        let LogicalMessage {
            message_type,
            payload,
        } = message;

        match (message_type, payload) {
            (MessageType::ServerFullResponse, Payload::Json(value)) => self.handle_json(&value),
            (MessageType::ServerFullResponse, Payload::Raw(data)) => {
                log::debug!(
                    "Session: full response without JSON payload ({} bytes)",
                    data.len()
                );
            }
            (MessageType::ServerAudioOnlyResponse, payload) => {
                if let Some(segment) = payload.into_raw() {
                    log::debug!("Session: received audio segment ({} bytes)", segment.len());
                    if let Err(e) = self.playback.enqueue(segment) {
                        log::debug!("Session: audio segment dropped: {}", e);
                    }
                }
            }
            (MessageType::ServerErrorResponse, payload) => {
                log::warn!("Session: server reported an error: {:?}", payload);
                let mut handler = self
                    .error_handler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(handler) = handler.as_mut() {
                    handler(&payload);
                }
            }
            (other, _) => {
                log::debug!("Session: ignoring frame of type {:?}", other);
            }
        }

        Some(message_type)
    }

    fn handle_json(&self, value: &Value) {
        if let Some(event) = JsonEvent::from_value(value) {
            log::debug!("Session: event {}", event.event);
            let became_ready = event.is(EventType::BotReady)
                && self.ready.send_if_modified(|ready| !std::mem::replace(ready, true));
            if became_ready {
                log::info!("✅ Bot is ready");
            }
        }

        let mut handler = self
            .json_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = handler.as_mut() {
            handler(value);
        }
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}

struct Inner {
    router: Router,
    writer: AsyncMutex<WsWriter>,
    open: AtomicBool,
    cancel: CancellationToken,
}

impl Inner {
    /// Close the socket and dispose the playback queue. Only the first call
    /// does anything.
    async fn teardown(&self, reason: &str) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        log::info!("🔌 Closing session: {}", reason);

        if let Err(e) = self.writer.lock().await.close().await {
            log::debug!("Session: error closing socket: {}", e);
        }

        self.router.playback.dispose().await;
        // `closed()` waiters see a fully torn down session
        self.cancel.cancel();
        log::debug!("Session: teardown complete");
    }
}

pub struct Session {
    inner: Arc<Inner>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Open a connection to `url`. Resolves once the WebSocket handshake is
    /// done. Received audio is enqueued on `playback`, which the session
    /// disposes when the connection ends.
    pub async fn connect(url: &str, playback: PlaybackQueue) -> Result<Self, SessionError> {
        Self::connect_with(url, playback, SessionHandlers::default()).await
    }

    /// Like [`Session::connect`], with `handlers` in place before the first
    /// frame is read.
    pub async fn connect_with(
        url: &str,
        playback: PlaybackQueue,
        handlers: SessionHandlers,
    ) -> Result<Self, SessionError> {
        let url = Url::parse(url)?;
        log::info!("🌐 Connecting to {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(SessionError::Connection)?;
        let (writer, reader) = ws_stream.split();
        log::info!("🌐 Connected to {}", url);

        let inner = Arc::new(Inner {
            router: Router::new(playback, handlers),
            writer: AsyncMutex::new(writer),
            open: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });

        let handle = tokio::spawn(read_loop(Arc::clone(&inner), reader));

        Ok(Self {
            inner,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Encode `payload` with the header policy of `kind` and write it as one
    /// binary message.
    pub async fn send(&self, payload: Payload, kind: MessageKind) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotOpen);
        }

        let bytes = encode_message(payload, kind)?;
        log::debug!("Session: sending {:?} frame ({} bytes)", kind, bytes.len());

        self.inner
            .writer
            .lock()
            .await
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(SessionError::Send)
    }

    pub async fn send_json(&self, value: Value) -> Result<(), SessionError> {
        self.send(Payload::Json(value), MessageKind::FullRequest).await
    }

    /// Send one chunk of 16 kHz 16-bit mono PCM.
    pub async fn send_audio(&self, pcm: Vec<u8>) -> Result<(), SessionError> {
        self.send(Payload::Raw(pcm), MessageKind::AudioOnlyRequest)
            .await
    }

    pub async fn send_event(
        &self,
        event: EventType,
        payload: Option<Value>,
    ) -> Result<(), SessionError> {
        self.send_json(JsonEvent::new(event, payload).to_value())
            .await
    }

    /// Ask the server to switch the bot's voice.
    pub async fn update_config(&self, speaker: &str) -> Result<(), SessionError> {
        log::info!("🗣️ Requesting speaker {}", speaker);
        self.send_json(JsonEvent::update_config(speaker).to_value())
            .await
    }

    /// Handler for every decoded JSON server response, replacing any
    /// previous one. Runs on the session's reader task and must not register
    /// handlers itself. Frames read before this call are not replayed; see
    /// [`Session::connect_with`].
    pub fn on_json_message<F>(&self, handler: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        *self
            .inner
            .router
            .json_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(handler));
    }

    /// Handler for server error frames. These are reported and the session
    /// stays open.
    pub fn on_server_error<F>(&self, handler: F)
    where
        F: FnMut(&Payload) + Send + 'static,
    {
        *self
            .inner
            .router
            .error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(handler));
    }

    /// True once the server has sent `BotReady`. Never reset.
    pub fn is_ready(&self) -> bool {
        self.inner.router.is_ready()
    }

    /// Wait for `BotReady`. Fails with [`SessionError::NotOpen`] if the
    /// session ends first.
    pub async fn wait_ready(&self) -> Result<(), SessionError> {
        let mut ready = self.inner.router.ready.subscribe();
        tokio::select! {
            biased;

            result = async { ready.wait_for(|ready| *ready).await.map(|_| ()) } => {
                result.map_err(|_| SessionError::NotOpen)
            }
            _ = self.inner.cancel.cancelled() => Err(SessionError::NotOpen),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Resolves when the session has ended, whatever the cause. By then the
    /// socket is closed and playback is disposed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    pub fn playback(&self) -> &PlaybackQueue {
        &self.inner.router.playback
    }

    /// Close the connection and dispose playback. Safe to call repeatedly.
    pub async fn close(&self) {
        self.inner.teardown("closed by client").await;

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Session: reader task failed: {}", e);
            }
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut reader: WsReader) {
    let mut message_count = 0usize;

    let reason = loop {
        let message = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            message = reader.next() => message,
        };

        match message {
            Some(Ok(Message::Binary(data))) => {
                message_count += 1;
                inner.router.route(data.as_slice());
            }
            Some(Ok(Message::Text(text))) => {
                log::debug!("Session: ignoring text message ({} bytes)", text.len());
            }
            Some(Ok(Message::Close(frame))) => {
                log::info!("Session: server closed connection: {:?}", frame);
                break "server closed connection".to_string();
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::error!("Session: WebSocket error: {}", e);
                break format!("transport error: {}", e);
            }
            None => break "connection ended".to_string(),
        }
    };

    log::debug!("Session: reader stopping after {} binary messages", message_count);
    inner.teardown(&reason).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{PacedOutput, PlaybackConfig};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use voice_protocol::{encode, Compression, Flags, Serialization};

    fn server_json(value: Value) -> Vec<u8> {
        let message = LogicalMessage::new(MessageType::ServerFullResponse, Payload::Json(value));
        encode(&message, Flags::NoSequence, Serialization::Json, Compression::None).unwrap()
    }

    fn server_audio(data: Vec<u8>) -> Vec<u8> {
        let message =
            LogicalMessage::new(MessageType::ServerAudioOnlyResponse, Payload::Raw(data));
        encode(&message, Flags::NoSequence, Serialization::None, Compression::None).unwrap()
    }

    fn router() -> Router {
        let playback = PlaybackQueue::with_output(
            Arc::new(PacedOutput::new(Duration::from_millis(5))),
            PlaybackConfig::default(),
        );
        Router::new(playback, SessionHandlers::default())
    }

    #[tokio::test]
    async fn test_bot_ready_sets_gate() {
        let router = router();
        assert!(!router.is_ready());

        let routed = router.route(&server_json(json!({"event": "SentenceRecognized"})));
        assert_eq!(routed, Some(MessageType::ServerFullResponse));
        assert!(!router.is_ready());

        router.route(&server_json(json!({"event": "BotReady"})));
        assert!(router.is_ready());

        // other events never reset it
        router.route(&server_json(json!({"event": "ResponseDone"})));
        assert!(router.is_ready());
    }

    #[tokio::test]
    async fn test_json_handler_receives_payload() {
        let router = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *router.json_handler.lock().unwrap() = Some(Box::new(move |value: &Value| {
            let _ = tx.send(value.clone());
        }));

        let value = json!({"event": "LLMResponse", "payload": {"sentence": "hi"}});
        router.route(&server_json(value.clone()));

        assert_eq!(rx.recv().await, Some(value));
    }

    #[tokio::test]
    async fn test_handlers_installed_at_construction() {
        let (json_tx, mut events) = mpsc::unbounded_channel();
        let (error_tx, mut errors) = mpsc::unbounded_channel();
        let handlers = SessionHandlers::default()
            .on_json_message(move |value| {
                let _ = json_tx.send(value.clone());
            })
            .on_server_error(move |payload| {
                let _ = error_tx.send(payload.clone());
            });
        let router = Router::new(
            PlaybackQueue::with_output(
                Arc::new(PacedOutput::new(Duration::from_millis(5))),
                PlaybackConfig::default(),
            ),
            handlers,
        );

        router.route(&server_json(json!({"event": "BotReady"})));
        assert_eq!(events.recv().await, Some(json!({"event": "BotReady"})));

        let message = LogicalMessage::new(MessageType::ServerErrorResponse, Payload::Raw(vec![1]));
        let bytes =
            encode(&message, Flags::NoSequence, Serialization::None, Compression::None).unwrap();
        router.route(&bytes);
        assert_eq!(errors.recv().await, Some(Payload::Raw(vec![1])));
    }

    #[tokio::test]
    async fn test_audio_routed_to_playback() {
        let router = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router
            .playback
            .on_start(move |segment| {
                let _ = tx.send(segment.to_vec());
            })
            .unwrap();

        let routed = router.route(&server_audio(vec![0u8; 64]));
        assert_eq!(routed, Some(MessageType::ServerAudioOnlyResponse));
        assert_eq!(rx.recv().await, Some(vec![0u8; 64]));
    }

    #[tokio::test]
    async fn test_undecodable_frame_dropped() {
        let router = router();
        assert_eq!(router.route(&[0x11, 0x90]), None);

        let mut bad_json = server_json(json!({}));
        let last = bad_json.len() - 1;
        bad_json[last] = b'{';
        assert_eq!(router.route(&bad_json), None);
        assert!(!router.is_ready());
    }

    #[tokio::test]
    async fn test_server_error_reported() {
        let router = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *router.error_handler.lock().unwrap() = Some(Box::new(move |payload: &Payload| {
            let _ = tx.send(payload.clone());
        }));

        let message = LogicalMessage::new(
            MessageType::ServerErrorResponse,
            Payload::Json(json!({"error": "quota"})),
        );
        let bytes =
            encode(&message, Flags::NoSequence, Serialization::Json, Compression::None).unwrap();

        assert_eq!(router.route(&bytes), Some(MessageType::ServerErrorResponse));
        assert_eq!(
            rx.recv().await,
            Some(Payload::Json(json!({"error": "quota"})))
        );
    }
}
