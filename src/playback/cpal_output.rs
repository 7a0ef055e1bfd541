use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::mpsc::{channel, sync_channel, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::sync::oneshot;

use super::decoder::DecodedAudio;
use super::output::AudioOutput;
use super::PlaybackError;
use crate::visualization::WaveformTap;

struct OutputState {
    samples: VecDeque<f32>,
    input_rate: u32,
    /// Fractional read position into `samples`
    position: f32,
    done: Option<oneshot::Sender<()>>,
    tap: Option<WaveformTap>,
}

impl OutputState {
    fn clear(&mut self) {
        self.samples.clear();
        self.position = 0.0;
        self.done = None;
    }
}

fn lock(state: &Mutex<OutputState>) -> MutexGuard<'_, OutputState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

enum AudioCommand {
    Shutdown,
}

/// Plays decoded segments on the default output device.
pub struct CpalOutput {
    state: Arc<Mutex<OutputState>>,
    command_sender: Sender<AudioCommand>,
    audio_thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new() -> Result<Self, PlaybackError> {
        log::debug!("CpalOutput: Creating output");
        let state = Arc::new(Mutex::new(OutputState {
            samples: VecDeque::new(),
            input_rate: crate::audio_format::SAMPLE_RATE,
            position: 0.0,
            done: None,
            tap: None,
        }));
        let (command_sender, command_receiver) = channel();
        let (ready_sender, ready_receiver) = sync_channel::<Result<(), String>>(1);
        let callback_state = Arc::clone(&state);

        // cpal streams are not Send, so the stream lives on its own thread
        let audio_thread = thread::spawn(move || {
            let host = cpal::default_host();
            log::debug!("CpalOutput: Using audio host: {:?}", host.id());

            let Some(device) = host.default_output_device() else {
                let _ = ready_sender.send(Err("No output device found".to_string()));
                return;
            };
            log::debug!("CpalOutput: Using output device: {:?}", device.name());

            let supported_config = match device.default_output_config() {
                Ok(config) => config,
                Err(e) => {
                    let _ = ready_sender.send(Err(e.to_string()));
                    return;
                }
            };
            log::debug!("CpalOutput: Using output config: {:?}", supported_config);

            let output_rate = supported_config.sample_rate().0;
            let output_channels = supported_config.channels().max(1) as usize;

            let stream = match device.build_output_stream(
                &supported_config.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_buffer(&callback_state, data, output_channels, output_rate);
                },
                move |err| {
                    log::error!("CpalOutput: Stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_sender.send(Err(e.to_string()));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_sender.send(Err(e.to_string()));
                return;
            }

            log::debug!("CpalOutput: Audio stream started");
            let _ = ready_sender.send(Ok(()));

            while let Ok(command) = command_receiver.recv() {
                match command {
                    AudioCommand::Shutdown => break,
                }
            }

            log::debug!("CpalOutput: Audio thread exiting");
        });

        match ready_receiver.recv() {
            Ok(Ok(())) => Ok(Self {
                state,
                command_sender,
                audio_thread: Some(audio_thread),
            }),
            Ok(Err(message)) => {
                let _ = audio_thread.join();
                Err(PlaybackError::Output(message))
            }
            Err(_) => {
                let _ = audio_thread.join();
                Err(PlaybackError::Output("audio thread exited".to_string()))
            }
        }
    }
}

/// Device callback: resample the current segment into `data` by linear
/// interpolation and signal completion once it runs out.
fn fill_buffer(state: &Mutex<OutputState>, data: &mut [f32], channels: usize, output_rate: u32) {
    let mut state = lock(state);
    let step = state.input_rate as f32 / output_rate as f32;
    let mut played = Vec::with_capacity(data.len() / channels);

    for frame in data.chunks_mut(channels) {
        let value = if state.samples.is_empty() {
            0.0
        } else {
            let index = state.position.floor() as usize;
            let fract = state.position.fract();
            let first = state.samples.get(index).copied().unwrap_or(0.0);
            let second = state.samples.get(index + 1).copied().unwrap_or(first);

            state.position += step;
            let consumed = (state.position.floor() as usize).min(state.samples.len());
            if consumed > 0 {
                state.samples.drain(..consumed);
                state.position -= consumed as f32;
            }

            let value = first * (1.0 - fract) + second * fract;
            played.push(value);
            value
        };

        for sample in frame.iter_mut() {
            *sample = value;
        }
    }

    if state.samples.is_empty() {
        state.position = 0.0;
        if let Some(done) = state.done.take() {
            let _ = done.send(());
        }
    }

    if let Some(tap) = &state.tap {
        tap.write(&played);
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn play(&self, audio: DecodedAudio, tap: &WaveformTap) -> Result<(), PlaybackError> {
        if audio.sample_rate == 0 {
            return Err(PlaybackError::UnsupportedFormat(
                "sample rate of 0".to_string(),
            ));
        }
        if audio.is_empty() {
            return Ok(());
        }

        let (done_sender, done_receiver) = oneshot::channel();
        {
            let mut state = lock(&self.state);
            state.clear();
            state.samples.extend(audio.samples);
            state.input_rate = audio.sample_rate;
            state.done = Some(done_sender);
            state.tap = Some(tap.clone());
        }

        done_receiver
            .await
            .map_err(|_| PlaybackError::Output("playback interrupted".to_string()))
    }

    fn stop(&self) {
        lock(&self.state).clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Err(e) = self.command_sender.send(AudioCommand::Shutdown) {
            log::error!("Failed to send shutdown command: {}", e);
        }

        if let Some(thread) = self.audio_thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Failed to join audio thread: {:?}", e);
            }
        }
    }
}
