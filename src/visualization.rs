//! Waveform tap on the playback path and the fixed-rate redraw loop that samples it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Samples returned by one snapshot (half of a 2048-point analysis window)
pub const WAVEFORM_SIZE: usize = 1024;

/// Byte value for a zero sample in a snapshot
pub const SILENCE_LEVEL: u8 = 128;

struct TapState {
    samples: VecDeque<f32>,
    capacity: usize,
    connected: bool,
}

/// Read-only sampling point on the audio output path.
///
/// Outputs write every sample they actually play; readers take snapshots of
/// the most recent `capacity` samples. The history is not tied to segment
/// boundaries, so consecutive segments read as one continuous waveform.
#[derive(Clone)]
pub struct WaveformTap {
    state: Arc<Mutex<TapState>>,
}

impl Default for WaveformTap {
    fn default() -> Self {
        Self::new(WAVEFORM_SIZE)
    }
}

impl WaveformTap {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Arc::new(Mutex::new(TapState {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                connected: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self) {
        self.lock().connected = true;
    }

    /// Disconnect and forget history. Snapshots read silence until reconnected.
    pub fn release(&self) {
        let mut state = self.lock();
        state.connected = false;
        state.samples.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Record samples that were just sent to the output device.
    pub fn write(&self, samples: &[f32]) {
        let mut state = self.lock();
        if !state.connected {
            return;
        }

        let capacity = state.capacity;
        let keep = &samples[samples.len().saturating_sub(capacity)..];
        let overflow = (state.samples.len() + keep.len()).saturating_sub(capacity);
        state.samples.drain(..overflow);
        state.samples.extend(keep.iter().copied());
    }

    /// Current time-domain waveform as unsigned bytes, oldest first,
    /// left-padded with silence.
    pub fn snapshot(&self) -> Vec<u8> {
        let state = self.lock();
        let mut out = vec![SILENCE_LEVEL; state.capacity];
        let offset = state.capacity - state.samples.len();
        for (slot, sample) in out[offset..].iter_mut().zip(state.samples.iter()) {
            *slot = sample_to_byte(*sample);
        }
        out
    }
}

fn sample_to_byte(sample: f32) -> u8 {
    (SILENCE_LEVEL as f32 + sample * 128.0).clamp(0.0, 255.0) as u8
}

/// Map an unsigned 8-bit snapshot back to signed 16-bit samples for
/// waveform renderers that expect PCM input.
pub fn waveform_to_pcm16(data: &[u8]) -> Vec<i16> {
    data.iter()
        .map(|&byte| {
            let normalized = (byte as f32 - SILENCE_LEVEL as f32) / 128.0;
            (normalized * 32768.0).clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

/// Fixed-rate redraw loop feeding snapshots to a callback.
///
/// The loop runs until [`Visualizer::stop`] is called or the visualizer is
/// dropped; both cancel the scheduled task rather than leaving it to expire.
pub struct Visualizer {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Visualizer {
    /// Must be called from within a Tokio runtime.
    pub fn start<F>(tap: WaveformTap, redraw_hz: u32, mut callback: F) -> Self
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = Duration::from_secs_f64(1.0 / redraw_hz.max(1) as f64);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => callback(tap.snapshot()),
                }
            }
            log::debug!("Visualizer: redraw loop stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_snapshot_silence_when_disconnected() {
        let tap = WaveformTap::new(8);
        tap.write(&[1.0; 8]);
        assert_eq!(tap.snapshot(), vec![SILENCE_LEVEL; 8]);
    }

    #[test]
    fn test_snapshot_keeps_latest_samples() {
        let tap = WaveformTap::new(4);
        tap.connect();
        tap.write(&[0.0, 0.5]);
        tap.write(&[-0.5, 1.0, -1.0]);

        // oldest sample (0.0) dropped, continuous across writes
        assert_eq!(tap.snapshot(), vec![192, 64, 255, 0]);
    }

    #[test]
    fn test_snapshot_pads_with_silence() {
        let tap = WaveformTap::new(4);
        tap.connect();
        tap.write(&[0.5]);
        assert_eq!(tap.snapshot(), vec![128, 128, 128, 192]);
    }

    #[test]
    fn test_release_clears_history() {
        let tap = WaveformTap::new(4);
        tap.connect();
        tap.write(&[0.5; 4]);
        tap.release();

        assert!(!tap.is_connected());
        assert_eq!(tap.snapshot(), vec![SILENCE_LEVEL; 4]);
    }

    #[test]
    fn test_waveform_to_pcm16() {
        assert_eq!(waveform_to_pcm16(&[128, 0, 255]), vec![0, -32768, 32512]);
    }

    #[tokio::test]
    async fn test_visualizer_stops_on_request() {
        let tap = WaveformTap::new(16);
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);

        let mut visualizer = Visualizer::start(tap, 200, move |snapshot| {
            assert_eq!(snapshot.len(), 16);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(visualizer.is_running());
        visualizer.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = frames.load(Ordering::SeqCst);
        assert!(seen > 0);
        assert!(!visualizer.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(frames.load(Ordering::SeqCst), seen);
    }
}
