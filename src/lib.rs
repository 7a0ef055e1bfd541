pub mod audio_format;
pub mod capture;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod visualization;

pub use error::{ClientError, Result};
pub use playback::{PlaybackConfig, PlaybackError, PlaybackQueue};
pub use session::{Session, SessionError, SessionHandlers};
pub use visualization::{Visualizer, WaveformTap};
