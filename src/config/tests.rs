use super::{AppConfig, VadEngineKind};
use clap::Parser;
use std::time::Duration;

fn parse(args: &[&str]) -> AppConfig {
    let mut argv = vec!["rtvoice"];
    argv.extend_from_slice(args);
    AppConfig::parse_from(argv)
}

#[test]
fn defaults_validate() {
    let mut cfg = parse(&[]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.sample_rate, 24_000);
    assert_eq!(cfg.frames_per_buffer, 1024);
    assert_eq!(cfg.vad_engine, VadEngineKind::Energy);
}

#[test]
fn rejects_seconds_out_of_bounds() {
    let mut cfg = parse(&["--seconds", "0"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--seconds", "3601"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_empty_send_queue() {
    let mut cfg = parse(&["--send-queue-max", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_non_positive_overflow_interval() {
    let mut cfg = parse(&["--send-overflow-log-sec", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_sample_rate_out_of_bounds() {
    let mut cfg = parse(&["--sample-rate", "4000"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_silence_ratio_below_one() {
    let mut cfg = parse(&["--vad-silence-ratio", "0.5"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--vad-engine", "off", "--vad-silence-ratio", "0.5"]);
    assert!(cfg.validate().is_ok(), "detector settings are ignored when VAD is off");
}

#[test]
fn neural_engine_requires_existing_model() {
    let mut cfg = parse(&["--vad-engine", "neural"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--vad-engine", "neural", "--vad-model", "/no/such/silero.onnx"]);
    assert!(cfg.validate().is_err());

    let model = tempfile::NamedTempFile::new().unwrap();
    let path = model.path().to_string_lossy().to_string();
    let mut cfg = parse(&["--vad-engine", "neural", "--vad-model", &path]);
    assert!(cfg.validate().is_ok());
    let params = cfg.vad_params().unwrap();
    assert_eq!(params.neural_model(), Some(model.path()));
}

#[test]
fn rejects_control_characters_in_device_name() {
    let mut cfg = parse(&["--input-device", "mic\nname"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--input-device", "  USB Mic  "]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.input_device.as_deref(), Some("USB Mic"));
}

#[test]
fn rejects_invalid_log_filter() {
    let mut cfg = parse(&["--log-level", "rtvoice=loud"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--log-level", "rtvoice=loud", "--no-logs"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn vad_off_disables_detector() {
    let cfg = parse(&["--vad-engine", "off"]);
    assert!(cfg.vad_params().is_none());
    assert!(cfg.capture_settings().vad.is_none());
}

#[test]
fn energy_engine_ignores_model_path() {
    let cfg = parse(&["--vad-model", "/tmp/silero.onnx"]);
    let params = cfg.vad_params().unwrap();
    assert!(params.neural_model().is_none());
}

#[test]
fn converts_into_pipeline_settings() {
    let cfg = parse(&[
        "--send-queue-max",
        "8",
        "--send-overflow-log-sec",
        "2.5",
        "--keyword-rearm-sec",
        "4",
        "--cross-fade-ms",
        "10",
        "--vad-min-speech-sec",
        "0.1",
    ]);
    let realtime = cfg.realtime_config();
    assert_eq!(realtime.send_queue.max_chunks, 8);
    assert_eq!(
        realtime.send_queue.overflow_log_interval,
        Duration::from_millis(2500)
    );
    assert_eq!(realtime.conversation.rearm_timeout, Duration::from_secs(4));

    let capture = realtime.capture.unwrap();
    assert_eq!(capture.cross_fade_samples(), 240);
    let vad = capture.vad.unwrap();
    assert_eq!(vad.chunk_size, 1024);
    assert!((vad.min_speech_duration - 0.1).abs() < f32::EPSILON);
}

#[test]
fn replay_pcm_must_exist() {
    let mut cfg = parse(&["--replay-pcm", "/no/such/capture.pcm"]);
    assert!(cfg.validate().is_err());

    let pcm = tempfile::NamedTempFile::new().unwrap();
    let path = pcm.path().to_string_lossy().to_string();
    let mut cfg = parse(&["--replay-pcm", &path, "--echo-playback"]);
    assert!(cfg.validate().is_ok());
    assert!(cfg.echo_playback);
}
