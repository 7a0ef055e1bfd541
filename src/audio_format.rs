//! Audio format constants shared by capture and playback.

pub const SAMPLE_RATE: u32 = 16000;
pub const BIT_DEPTH: u16 = 16;
pub const CHANNELS: u16 = 1;
/// Duration of one outbound capture chunk
pub const TIME_SLICE_MS: u32 = 200;
/// Bytes in one outbound audio-only request: 16000 * 2 * 0.2
pub const FRAME_SIZE: usize =
    (SAMPLE_RATE as usize * (BIT_DEPTH as usize / 8) * TIME_SLICE_MS as usize) / 1000;

/// Split 16-bit PCM into time-slice sized chunks. The last chunk may be short.
pub fn chunk_pcm(pcm: &[u8]) -> impl Iterator<Item = &[u8]> {
    pcm.chunks(FRAME_SIZE)
}

/// Convert s16le bytes to f32 samples in [-1.0, 1.0]. A trailing odd byte is ignored.
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Convert i16 samples to s16le bytes.
pub fn i16_to_pcm16(samples: &[i16]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    pcm
}

/// Duration in milliseconds of `samples` frames at `sample_rate`.
pub fn duration_ms(samples: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    (samples as f32 / sample_rate as f32) * 1000.0
}
