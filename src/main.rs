use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use voice_protocol::{EventType, JsonEvent};

use voicebot_client::{
    capture::{stream_turns, WavCapture},
    config::{load_config, parse_ws_url},
    playback::{AudioOutput, PacedOutput},
    visualization::waveform_to_pcm16,
    PlaybackConfig, PlaybackQueue, Session, SessionHandlers, Visualizer,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Realtime voice chat client", long_about = None)]
struct Args {
    /// WebSocket endpoint of the voice bot server
    #[arg(long)]
    url: Option<String>,

    /// Speaker voice requested after connecting
    #[arg(long)]
    speaker: Option<String>,

    /// Drop the oldest pending playback segment beyond this many
    #[arg(long)]
    high_water_mark: Option<usize>,

    /// 16 kHz 16-bit mono WAV file streamed as microphone input
    #[arg(long)]
    input: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Waveform redraw rate in Hz
    #[arg(long)]
    redraw_hz: Option<u32>,
}

#[cfg(feature = "cpal-output")]
fn create_output() -> Arc<dyn AudioOutput> {
    use voicebot_client::playback::cpal_output::CpalOutput;

    match CpalOutput::new() {
        Ok(output) => Arc::new(output),
        Err(e) => {
            log::warn!("No audio device ({}), playing silently", e);
            Arc::new(PacedOutput::default())
        }
    }
}

#[cfg(not(feature = "cpal-output"))]
fn create_output() -> Arc<dyn AudioOutput> {
    Arc::new(PacedOutput::default())
}

/// One-line level meter for a waveform snapshot.
fn render_level(snapshot: &[u8]) -> String {
    let peak = waveform_to_pcm16(snapshot)
        .iter()
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0);
    let width = (peak as usize * 40) / 32768;
    format!("\r🔊 [{:<40}]", "#".repeat(width))
}

fn print_event(value: &Value) {
    let Some(event) = JsonEvent::from_value(value) else {
        log::debug!("Unrecognised server message: {}", value);
        return;
    };

    match event.event_type() {
        Some(EventType::SentenceRecognized) => {
            if let Some(sentence) = event.sentence() {
                println!("🧑 {}", sentence);
            }
        }
        Some(EventType::SentenceRecognizedDone) => {
            if let Some(sentence) = event.sentence() {
                println!("🧑 ✔ {}", sentence);
            }
        }
        Some(EventType::LLMResponse) => {
            if let Some(sentence) = event.sentence() {
                println!("🤖 {}", sentence);
            }
        }
        Some(EventType::ResponseDone) => println!("🤖 ✔ response done"),
        _ => log::debug!("Server event: {}", event.event),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();
    log::info!("🚀 Starting voicebot client");

    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(url) = &args.url {
        config.ws_url = parse_ws_url(url)?;
    }
    if args.speaker.is_some() {
        config.speaker = args.speaker.clone();
    }
    if args.high_water_mark.is_some() {
        config.high_water_mark = args.high_water_mark;
    }
    if let Some(hz) = args.redraw_hz {
        config.redraw_hz = hz;
    }

    let capture = match &args.input {
        Some(path) => Some(WavCapture::open(path).context("Failed to open input audio")?),
        None => None,
    };

    let playback = PlaybackQueue::with_output(
        create_output(),
        PlaybackConfig {
            high_water_mark: config.high_water_mark,
        },
    );

    let visualizer: Arc<Mutex<Option<Visualizer>>> = Arc::new(Mutex::new(None));
    {
        let visualizer = Arc::clone(&visualizer);
        let tap = playback.tap().clone();
        let redraw_hz = config.redraw_hz;
        playback.on_start(move |_segment| {
            let started = Visualizer::start(tap.clone(), redraw_hz, |snapshot| {
                eprint!("{}", render_level(&snapshot));
            });
            *visualizer.lock().unwrap_or_else(PoisonError::into_inner) = Some(started);
        })?;
    }
    {
        let visualizer = Arc::clone(&visualizer);
        playback.on_stop(move || {
            if let Some(mut running) = visualizer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                running.stop();
                eprintln!();
            }
        })?;
    }
    playback.on_segment_error(|e| log::warn!("Skipped audio segment: {}", e))?;

    let handlers = SessionHandlers::default()
        .on_json_message(print_event)
        .on_server_error(|payload| println!("❌ Server error: {:?}", payload));
    let session = Session::connect_with(config.ws_url.as_str(), playback.clone(), handlers)
        .await
        .context("Failed to connect to voice bot server")?;

    if let Some(speaker) = &config.speaker {
        session.update_config(speaker).await?;
    }

    println!("🎧 Connected to {}", config.ws_url);
    println!("   Press Ctrl+C to exit");

    let input = async {
        match &capture {
            Some(capture) => stream_turns(&session, &playback, capture)
                .await
                .context("Input streaming stopped"),
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = input => {
            if let Err(e) = result {
                log::error!("{:#}", e);
            }
            // keep listening for the reply after input ends
            tokio::select! {
                _ = session.closed() => log::info!("Server ended the session"),
                _ = tokio::signal::ctrl_c() => log::info!("Received Ctrl+C, shutting down..."),
            }
        }
        _ = session.closed() => log::info!("Server ended the session"),
        _ = tokio::signal::ctrl_c() => log::info!("Received Ctrl+C, shutting down..."),
    }

    session.close().await;
    if let Some(mut running) = visualizer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    {
        running.stop();
    }

    println!("\n👋 Goodbye!");
    Ok(())
}
