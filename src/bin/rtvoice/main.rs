mod cli_utils;
mod replay;
mod session;

use anyhow::Result;
use rtvoice::audio::AudioPlayer;
use rtvoice::config::AppConfig;
use rtvoice::realtime::{PlaybackControl, RealtimeAudio};
use rtvoice::telemetry::init_tracing;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::cli_utils::list_input_devices;
use crate::replay::replay_pcm;
use crate::session::{LoggingSession, NullPlayback, SessionCounters};

#[derive(Serialize)]
struct RunSummary {
    seconds: u64,
    replayed_chunks: Option<u64>,
    vad_engine: &'static str,
    final_state: &'static str,
    capture: Option<rtvoice::audio::CaptureStats>,
    send_queue_overflows: u64,
    session: SessionCounters,
}

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    if config.list_input_devices {
        return list_input_devices();
    }

    init_tracing(&config);
    tracing::info!(
        sample_rate = config.sample_rate,
        frames_per_buffer = config.frames_per_buffer,
        vad = config.vad_engine.label(),
        "=== rtvoice started ==="
    );

    let echo = config
        .echo_playback
        .then(|| Arc::new(AudioPlayer::new(config.sample_rate)));
    let playback: Arc<dyn PlaybackControl> = match echo.as_ref() {
        Some(player) => player.clone(),
        None => Arc::new(NullPlayback),
    };
    let session = Arc::new(LoggingSession::new(config.server_turn_detection, echo));
    let mut audio = RealtimeAudio::new(
        session.clone(),
        Arc::clone(&playback),
        config.realtime_config(),
        None,
    )?;

    let replayed_chunks = match config.replay_pcm.as_ref() {
        Some(path) => {
            playback.start()?;
            Some(replay_pcm(&audio, path, config.frames_per_buffer)?)
        }
        None => {
            audio.start()?;
            println!(
                "Capturing for {}s (logs: {})...",
                config.seconds,
                if config.no_logs {
                    "off".to_string()
                } else if config.log_stderr {
                    "stderr".to_string()
                } else {
                    config.trace_log_path().display().to_string()
                }
            );
            thread::sleep(Duration::from_secs(config.seconds));
            None
        }
    };

    let capture = audio.capture().map(|capture| capture.stats());
    let final_state = audio.state().label();
    audio.close();

    let summary = RunSummary {
        seconds: config.seconds,
        replayed_chunks,
        vad_engine: config.vad_engine.label(),
        final_state,
        capture,
        send_queue_overflows: audio.sender().overflow_total(),
        session: session.counters(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
