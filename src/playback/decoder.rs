use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use std::io::Cursor;

use super::PlaybackError;
use crate::audio_format::{duration_ms, pcm16_to_f32, SAMPLE_RATE};

/// A segment decoded into playable mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_ms(&self) -> f32 {
        duration_ms(self.samples.len(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Turns one raw audio segment into a playable buffer.
#[async_trait]
pub trait SegmentDecoder: Send + Sync {
    async fn decode(&self, segment: Vec<u8>) -> Result<DecodedAudio, PlaybackError>;
}

/// Decodes WAV containers and falls back to headerless s16le PCM.
#[derive(Debug, Clone)]
pub struct WavDecoder {
    /// Sample rate assumed for headerless PCM
    pub raw_sample_rate: u32,
}

impl Default for WavDecoder {
    fn default() -> Self {
        Self {
            raw_sample_rate: SAMPLE_RATE,
        }
    }
}

impl WavDecoder {
    pub fn decode_sync(&self, segment: &[u8]) -> Result<DecodedAudio, PlaybackError> {
        if segment.starts_with(b"RIFF") {
            decode_wav(segment)
        } else {
            if segment.len() % 2 != 0 {
                log::debug!("Decoder: dropping trailing byte of odd-length PCM segment");
            }
            Ok(DecodedAudio::new(pcm16_to_f32(segment), self.raw_sample_rate))
        }
    }
}

#[async_trait]
impl SegmentDecoder for WavDecoder {
    async fn decode(&self, segment: Vec<u8>) -> Result<DecodedAudio, PlaybackError> {
        let decoder = self.clone();
        tokio::task::spawn_blocking(move || decoder.decode_sync(&segment))
            .await
            .map_err(|e| PlaybackError::Decode(format!("decode task failed: {}", e)))?
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    let reader =
        WavReader::new(Cursor::new(bytes)).map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| PlaybackError::Decode(e.to_string()))?,
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| PlaybackError::Decode(e.to_string()))?
        }
        (format, bits) => {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "{:?} with {} bits per sample",
                format, bits
            )))
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(DecodedAudio::new(samples, spec.sample_rate))
}
