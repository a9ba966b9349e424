//! Offline input: push a recorded PCM file through the capture engine.

use anyhow::{bail, Context, Result};
use rtvoice::audio::ChunkOutcome;
use rtvoice::realtime::RealtimeAudio;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Feed `path` chunk by chunk and return how many chunks were processed.
/// A trailing odd byte is reported by the engine as a conversion drop.
pub(crate) fn replay_pcm(audio: &RealtimeAudio, path: &Path, frames_per_buffer: usize) -> Result<u64> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let Some(capture) = audio.capture() else {
        bail!("--replay-pcm needs capture settings");
    };
    audio.sender().start()?;

    let mut chunks = 0u64;
    for chunk in data.chunks(frames_per_buffer.max(1) * 2) {
        if let ChunkOutcome::Dropped(reason) = capture.process_pcm(chunk) {
            tracing::warn!(?reason, chunk = chunks, "replayed chunk dropped");
        }
        chunks += 1;
    }

    // Let the sender flush before the caller closes the pipeline.
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while audio.sender().queued() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    tracing::info!(chunks, path = %path.display(), "pcm replay finished");
    Ok(chunks)
}
