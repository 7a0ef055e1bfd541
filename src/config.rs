use std::env;
use std::num::ParseIntError;
use thiserror::Error;
use url::Url;

pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8888/api/voice";
pub const DEFAULT_REDRAW_HZ: u32 = 60;

pub const ENV_WS_URL: &str = "VOICEBOT_WS_URL";
pub const ENV_SPEAKER: &str = "VOICEBOT_SPEAKER";
pub const ENV_HIGH_WATER_MARK: &str = "VOICEBOT_HIGH_WATER_MARK";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid WebSocket URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
}

/// Client settings resolved from the environment (and `.env`), before CLI
/// overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub ws_url: Url,
    /// Voice sent with `BotUpdateConfig` once connected
    pub speaker: Option<String>,
    /// Cap on pending playback segments; unbounded when `None`
    pub high_water_mark: Option<usize>,
    pub redraw_hz: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: Url::parse(DEFAULT_WS_URL).expect("default URL is valid"),
            speaker: None,
            high_water_mark: None,
            redraw_hz: DEFAULT_REDRAW_HZ,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = env::var(ENV_WS_URL) {
            config.ws_url = parse_ws_url(&url)?;
        }

        config.speaker = env::var(ENV_SPEAKER)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if let Ok(raw) = env::var(ENV_HIGH_WATER_MARK) {
            config.high_water_mark = Some(parse_high_water_mark(&raw).map_err(|e| {
                ConfigError::InvalidValue {
                    var: ENV_HIGH_WATER_MARK.to_string(),
                    reason: e.to_string(),
                }
            })?);
        }

        Ok(config)
    }
}

/// Validate a connection URL; only `ws` and `wss` are accepted.
pub fn parse_ws_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}', expected ws or wss", other),
        }),
    }
}

fn parse_high_water_mark(raw: &str) -> Result<usize, ParseIntError> {
    raw.trim().parse::<usize>()
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    match ClientConfig::load() {
        Ok(config) => {
            log::info!("Loaded client configuration (server: {})", config.ws_url);
            Ok(config)
        }
        Err(e @ ConfigError::InvalidUrl { .. }) => {
            log::error!("{}", e);
            log::error!("Set {} to a ws:// or wss:// address, e.g.", ENV_WS_URL);
            log::error!("{}={}", ENV_WS_URL, DEFAULT_WS_URL);
            Err(e)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
