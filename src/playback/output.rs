use async_trait::async_trait;
use std::time::Duration;

use super::decoder::DecodedAudio;
use super::PlaybackError;
use crate::visualization::WaveformTap;

/// Destination for decoded audio.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play one buffer and resolve when it ends naturally. Every sample is
    /// written to `tap` as it is played. Dropping the future abandons the
    /// buffer.
    async fn play(&self, audio: DecodedAudio, tap: &WaveformTap) -> Result<(), PlaybackError>;

    /// Silence the device immediately.
    fn stop(&self);
}

/// Output without a device: consumes audio at real-time pace and feeds the
/// tap, so playback timing and visualization behave as with a sound card.
#[derive(Debug, Clone)]
pub struct PacedOutput {
    step: Duration,
}

impl Default for PacedOutput {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(20),
        }
    }
}

impl PacedOutput {
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.max(Duration::from_millis(1)),
        }
    }
}

#[async_trait]
impl AudioOutput for PacedOutput {
    async fn play(&self, audio: DecodedAudio, tap: &WaveformTap) -> Result<(), PlaybackError> {
        if audio.sample_rate == 0 {
            return Err(PlaybackError::UnsupportedFormat(
                "sample rate of 0".to_string(),
            ));
        }

        let block = ((audio.sample_rate as u128 * self.step.as_millis()) / 1000).max(1) as usize;
        for chunk in audio.samples.chunks(block) {
            tap.write(chunk);
            let chunk_ms = chunk.len() as u64 * 1000 / audio.sample_rate as u64;
            tokio::time::sleep(Duration::from_millis(chunk_ms)).await;
        }
        Ok(())
    }

    fn stop(&self) {}
}
