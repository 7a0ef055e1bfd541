use thiserror::Error;

use crate::config::ConfigError;
use crate::playback::PlaybackError;
use crate::session::SessionError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Audio file error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
