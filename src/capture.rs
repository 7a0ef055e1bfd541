//! Capture source reading 16 kHz 16-bit mono PCM from a WAV file and
//! slicing it into outbound 200 ms chunks.

use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;

use crate::audio_format::{
    chunk_pcm, i16_to_pcm16, BIT_DEPTH, CHANNELS, FRAME_SIZE, SAMPLE_RATE, TIME_SLICE_MS,
};
use crate::error::{ClientError, Result};
use crate::playback::PlaybackQueue;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct WavCapture {
    pcm: Vec<u8>,
}

impl WavCapture {
    /// Read a WAV file. Anything other than 16 kHz, 16-bit integer mono is
    /// rejected; there is no resampling on the capture path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path)?;
        let spec = reader.spec();

        if spec.sample_rate != SAMPLE_RATE
            || spec.bits_per_sample != BIT_DEPTH
            || spec.channels != CHANNELS
            || spec.sample_format != SampleFormat::Int
        {
            return Err(ClientError::Capture(format!(
                "{} is {} Hz, {}-bit {:?}, {} channel(s); expected {} Hz, {}-bit Int, mono",
                path.display(),
                spec.sample_rate,
                spec.bits_per_sample,
                spec.sample_format,
                spec.channels,
                SAMPLE_RATE,
                BIT_DEPTH
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        log::info!(
            "🎤 Loaded {} ({} samples, {:.1}s)",
            path.display(),
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );

        Ok(Self {
            pcm: i16_to_pcm16(&samples),
        })
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// Outbound chunks of [`FRAME_SIZE`] bytes; the last may be shorter.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        chunk_pcm(&self.pcm)
    }

    pub fn chunk_count(&self) -> usize {
        self.pcm.len().div_ceil(FRAME_SIZE)
    }
}

/// Send `capture` to the server one chunk per time slice. Input is held
/// while the bot is not ready or while a reply is playing, and resumes once
/// playback stops.
pub async fn stream_turns(
    session: &Session,
    playback: &PlaybackQueue,
    capture: &WavCapture,
) -> Result<()> {
    log::info!("🎤 Streaming {} chunks of input audio", capture.chunk_count());
    let mut ticker = tokio::time::interval(Duration::from_millis(TIME_SLICE_MS as u64));

    for chunk in capture.chunks() {
        if !session.is_ready() || playback.is_playing() {
            log::debug!("🎤 Input paused until the bot is listening");
            session.wait_ready().await?;
            playback.wait_idle().await;
            log::debug!("🎤 Input resumed");
            ticker.reset_immediately();
        }

        ticker.tick().await;
        session.send_audio(chunk.to_vec()).await?;
    }

    log::info!("🎤 Input finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_wav(dir: &TempDir, name: &str, spec: WavSpec, samples: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..samples {
            writer.write_sample((i % 100) as i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn spec(sample_rate: u32, channels: u16) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    #[test]
    fn test_capture_chunks() {
        let dir = TempDir::new().unwrap();
        // 0.5s: two full 200ms chunks and a 100ms remainder
        let path = write_wav(&dir, "speech.wav", spec(16000, 1), 8000);

        let capture = WavCapture::open(&path).unwrap();
        assert_eq!(capture.pcm().len(), 16000);
        assert_eq!(capture.chunk_count(), 3);

        let sizes: Vec<usize> = capture.chunks().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![FRAME_SIZE, FRAME_SIZE, 3200]);
    }

    #[test]
    fn test_capture_rejects_wrong_rate() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "cd.wav", spec(44100, 1), 100);

        assert!(matches!(
            WavCapture::open(&path),
            Err(ClientError::Capture(_))
        ));
    }

    #[test]
    fn test_capture_rejects_stereo() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "stereo.wav", spec(16000, 2), 100);

        assert!(matches!(
            WavCapture::open(&path),
            Err(ClientError::Capture(_))
        ));
    }

    #[test]
    fn test_capture_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(WavCapture::open(dir.path().join("missing.wav")).is_err());
    }
}
