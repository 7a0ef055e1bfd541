//! Gapless streaming playback of received audio segments.
//!
//! Segments are queued undecoded in arrival order. A single player task
//! decodes the head segment only after the previous one has finished
//! playing, so exactly one segment is ever in flight and order is preserved
//! no matter how long individual decodes take.

pub mod decoder;
pub mod output;

#[cfg(feature = "cpal-output")]
pub mod cpal_output;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::visualization::WaveformTap;
pub use decoder::{DecodedAudio, SegmentDecoder, WavDecoder};
pub use output::{AudioOutput, PacedOutput};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Failed to decode segment: {0}")]
    Decode(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio output error: {0}")]
    Output(String),

    #[error("Playback queue has been disposed")]
    Disposed,
}

type StartHandler = Box<dyn FnMut(&[u8]) + Send>;
type StopHandler = Box<dyn FnMut() + Send>;
type SkipHandler = Box<dyn FnMut(&PlaybackError) + Send>;
type PlayFuture = Pin<Box<dyn Future<Output = Result<(), PlaybackError>> + Send>>;

enum Command {
    Enqueue(Vec<u8>),
    OnStart(StartHandler),
    OnStop(StopHandler),
    OnSegmentError(SkipHandler),
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackConfig {
    /// Pending segments kept before the oldest is dropped. `None` buffers
    /// without limit.
    pub high_water_mark: Option<usize>,
}

struct QueueStatus {
    playing: watch::Sender<bool>,
    pending: AtomicUsize,
    played: AtomicUsize,
    skipped: AtomicUsize,
}

impl QueueStatus {
    fn new() -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            playing,
            pending: AtomicUsize::new(0),
            played: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    fn set_playing(&self, playing: bool) {
        self.playing.send_if_modified(|current| {
            let changed = *current != playing;
            *current = playing;
            changed
        });
    }
}

/// Handle to the playback queue. Clones share the same queue.
#[derive(Clone)]
pub struct PlaybackQueue {
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<QueueStatus>,
    tap: WaveformTap,
    cancel: CancellationToken,
    player: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PlaybackQueue {
    /// Spawn the player task. Must be called from within a Tokio runtime.
    pub fn new(
        decoder: Arc<dyn SegmentDecoder>,
        output: Arc<dyn AudioOutput>,
        config: PlaybackConfig,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let status = Arc::new(QueueStatus::new());
        let tap = WaveformTap::default();
        let cancel = CancellationToken::new();

        let player = Player {
            commands: receiver,
            pending: VecDeque::new(),
            playing: false,
            on_start: None,
            on_stop: None,
            on_segment_error: None,
            decoder,
            output,
            tap: tap.clone(),
            status: Arc::clone(&status),
            config,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(player.run());

        Self {
            commands,
            status,
            tap,
            cancel,
            player: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queue with the WAV/PCM decoder.
    pub fn with_output(output: Arc<dyn AudioOutput>, config: PlaybackConfig) -> Self {
        Self::new(Arc::new(WavDecoder::default()), output, config)
    }

    /// Append a segment. Starts playback if the queue was idle.
    pub fn enqueue(&self, segment: Vec<u8>) -> Result<(), PlaybackError> {
        self.send(Command::Enqueue(segment))
    }

    /// Called with the first segment whenever playback goes from idle to playing.
    pub fn on_start<F>(&self, handler: F) -> Result<(), PlaybackError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.send(Command::OnStart(Box::new(handler)))
    }

    /// Called when the queue drains and playback goes idle.
    pub fn on_stop<F>(&self, handler: F) -> Result<(), PlaybackError>
    where
        F: FnMut() + Send + 'static,
    {
        self.send(Command::OnStop(Box::new(handler)))
    }

    /// Called for each segment skipped because it failed to decode or play.
    pub fn on_segment_error<F>(&self, handler: F) -> Result<(), PlaybackError>
    where
        F: FnMut(&PlaybackError) + Send + 'static,
    {
        self.send(Command::OnSegmentError(Box::new(handler)))
    }

    fn send(&self, command: Command) -> Result<(), PlaybackError> {
        if self.cancel.is_cancelled() {
            return Err(PlaybackError::Disposed);
        }
        self.commands
            .send(command)
            .map_err(|_| PlaybackError::Disposed)
    }

    /// Snapshot of the waveform currently being played.
    pub fn sample_waveform(&self) -> Vec<u8> {
        self.tap.snapshot()
    }

    pub fn tap(&self) -> &WaveformTap {
        &self.tap
    }

    pub fn is_playing(&self) -> bool {
        *self.status.playing.borrow()
    }

    /// Resolves once nothing is playing, immediately if already idle.
    /// A disposed queue counts as idle.
    pub async fn wait_idle(&self) {
        let mut playing = self.status.playing.subscribe();
        // the sender lives in `self.status`, so this cannot fail
        let _ = playing.wait_for(|playing| !*playing).await;
    }

    /// Segments waiting behind the one currently playing.
    pub fn pending(&self) -> usize {
        self.status.pending.load(Ordering::Acquire)
    }

    pub fn segments_played(&self) -> usize {
        self.status.played.load(Ordering::Acquire)
    }

    pub fn segments_skipped(&self) -> usize {
        self.status.skipped.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop playback now, drop pending segments and release the tap.
    /// No handler fires. Safe to call repeatedly.
    pub async fn dispose(&self) {
        self.cancel.cancel();

        let handle = self
            .player
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Playback: player task failed: {}", e);
            }
        }
    }
}

struct Player {
    commands: mpsc::UnboundedReceiver<Command>,
    pending: VecDeque<Vec<u8>>,
    playing: bool,
    on_start: Option<StartHandler>,
    on_stop: Option<StopHandler>,
    on_segment_error: Option<SkipHandler>,
    decoder: Arc<dyn SegmentDecoder>,
    output: Arc<dyn AudioOutput>,
    tap: WaveformTap,
    status: Arc<QueueStatus>,
    config: PlaybackConfig,
    cancel: CancellationToken,
}

async fn wait_for(in_flight: &mut Option<PlayFuture>) -> Result<(), PlaybackError> {
    match in_flight {
        Some(playback) => playback.await,
        None => std::future::pending().await,
    }
}

impl Player {
    async fn run(mut self) {
        let mut in_flight: Option<PlayFuture> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                result = wait_for(&mut in_flight) => {
                    in_flight = None;
                    match result {
                        Ok(()) => {
                            self.status.played.fetch_add(1, Ordering::AcqRel);
                        }
                        Err(e) => {
                            log::warn!("Playback: skipping segment: {}", e);
                            self.status.skipped.fetch_add(1, Ordering::AcqRel);
                            if let Some(handler) = self.on_segment_error.as_mut() {
                                handler(&e);
                            }
                        }
                    }
                    // Segments enqueued while this one was finishing keep the
                    // queue playing, so take them in before looking at the head
                    while let Ok(command) = self.commands.try_recv() {
                        self.handle(command);
                    }
                    in_flight = self.play_head();
                }

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(next) = self.handle(command) {
                            in_flight = Some(next);
                        }
                    }
                    None => break,
                },
            }
        }

        // Abandon the in-flight decode/playback before silencing the device
        drop(in_flight);
        self.shutdown();
    }

    fn handle(&mut self, command: Command) -> Option<PlayFuture> {
        match command {
            Command::Enqueue(segment) => return self.enqueue(segment),
            Command::OnStart(handler) => self.on_start = Some(handler),
            Command::OnStop(handler) => self.on_stop = Some(handler),
            Command::OnSegmentError(handler) => self.on_segment_error = Some(handler),
        }
        None
    }

    /// Returns the playback to start when the queue was idle.
    fn enqueue(&mut self, segment: Vec<u8>) -> Option<PlayFuture> {
        if let Some(limit) = self.config.high_water_mark {
            if self.pending.len() >= limit.max(1) {
                self.pending.pop_front();
                log::warn!(
                    "Playback: {} segments pending, dropped the oldest",
                    limit
                );
            }
        }

        if self.playing {
            self.pending.push_back(segment);
            self.update_pending();
            return None;
        }

        self.playing = true;
        self.status.set_playing(true);
        log::info!("🔊 Playback started");
        if let Some(handler) = self.on_start.as_mut() {
            handler(&segment);
        }
        self.pending.push_back(segment);
        self.play_head()
    }

    fn play_head(&mut self) -> Option<PlayFuture> {
        let next = self.pending.pop_front();
        self.update_pending();

        let Some(segment) = next else {
            self.playing = false;
            self.status.set_playing(false);
            log::info!("🔇 Playback finished, queue drained");
            if let Some(handler) = self.on_stop.as_mut() {
                handler();
            }
            return None;
        };

        log::debug!("Playback: playing segment of {} bytes", segment.len());
        let decoder = Arc::clone(&self.decoder);
        let output = Arc::clone(&self.output);
        let tap = self.tap.clone();

        Some(Box::pin(async move {
            let audio = decoder.decode(segment).await?;
            tap.connect();
            output.play(audio, &tap).await
        }))
    }

    fn update_pending(&self) {
        self.status
            .pending
            .store(self.pending.len(), Ordering::Release);
    }

    fn shutdown(&mut self) {
        let discarded = self.pending.len();
        self.pending.clear();
        self.playing = false;
        self.output.stop();
        self.tap.release();
        self.status.set_playing(false);
        self.status.pending.store(0, Ordering::Release);
        log::debug!(
            "Playback: disposed, discarded {} pending segments",
            discarded
        );
    }
}
