use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn rtvoice_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_rtvoice").expect("rtvoice test binary not built")
}

#[test]
fn rtvoice_help_mentions_name() {
    let output = Command::new(rtvoice_bin())
        .arg("--help")
        .output()
        .expect("run rtvoice --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("rtvoice"));
    assert!(combined.contains("--send-queue-max"));
}

#[test]
fn rtvoice_list_input_devices_prints_message() {
    let output = Command::new(rtvoice_bin())
        .arg("--list-input-devices")
        .output()
        .expect("run rtvoice --list-input-devices");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(
        combined.contains("audio input devices")
            || combined.contains("No audio input devices detected")
    );
}

#[test]
fn rtvoice_list_input_devices_uses_test_override() {
    let output = Command::new(rtvoice_bin())
        .arg("--list-input-devices")
        .env("RTVOICE_TEST_DEVICES", "Desk Mic, Headset")
        .output()
        .expect("run rtvoice --list-input-devices");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("  - Desk Mic"));
    assert!(stdout.contains("  - Headset"));
}

#[test]
fn rtvoice_rejects_empty_send_queue() {
    let output = Command::new(rtvoice_bin())
        .args(["--send-queue-max", "0", "--no-logs"])
        .output()
        .expect("run rtvoice --send-queue-max 0");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--send-queue-max"));
}

#[test]
fn rtvoice_reads_send_queue_from_env() {
    let output = Command::new(rtvoice_bin())
        .args(["--no-logs", "--list-input-devices"])
        .env("AZAI_AUDIO_SEND_QUEUE_MAX", "0")
        .output()
        .expect("run rtvoice with env override");
    assert!(!output.status.success(), "env override is validated too");
}

#[test]
fn rtvoice_replays_pcm_file_through_pipeline() {
    let mut pcm = Vec::new();
    let mut push = |samples: &mut dyn Iterator<Item = i16>| {
        for sample in samples {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
    };
    push(&mut std::iter::repeat(0).take(30 * 1024));
    push(&mut (0..10 * 1024).map(|i| ((i as f32 * 0.11).sin() * 12_000.0) as i16));
    push(&mut std::iter::repeat(0).take(30 * 1024));
    // Trailing odd byte cannot form a sample.
    pcm.push(0);

    let file = tempfile::NamedTempFile::new().expect("temp pcm file");
    std::fs::write(file.path(), &pcm).expect("write pcm");

    let output = Command::new(rtvoice_bin())
        .arg("--no-logs")
        .arg("--replay-pcm")
        .arg(file.path())
        .output()
        .expect("run rtvoice --replay-pcm");
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"replayed_chunks\": 71"), "{stdout}");
    assert!(stdout.contains("\"chunks\": 70"), "{stdout}");
    assert!(stdout.contains("\"dropped_chunks\": 1"), "{stdout}");
    assert!(stdout.contains("\"speech_runs\": 1"), "{stdout}");
}
