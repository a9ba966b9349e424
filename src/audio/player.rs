//! Assistant audio playback through the default output device.
//!
//! Incoming PCM is resampled to the device rate at enqueue time and parked in a
//! shared queue the output callback drains. Interruption clears the queue and
//! bumps a generation counter so producers holding audio from the interrupted
//! response can tell it is stale.

use super::pcm::{append_bytes_as_samples, sample_to_f32};
use super::resample::StreamResampler;
use super::DEFAULT_SAMPLE_RATE;
use crate::lock_or_recover;
use crate::realtime::PlaybackControl;
use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

struct PlaybackQueue {
    samples: VecDeque<f32>,
    resampler: StreamResampler,
    scratch: Vec<f32>,
}

struct PlaybackShared {
    queue: Mutex<PlaybackQueue>,
    queued: AtomicUsize,
    generation: AtomicU64,
    emitting: AtomicBool,
}

impl PlaybackShared {
    /// Fill one device buffer. Runs on the output callback thread.
    fn fill<T>(&self, out: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        let silence = T::from_sample(0.0f32);
        let mut queue = match self.queue.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(silence);
                return;
            }
        };
        let mut emitted = false;
        for frame in out.chunks_mut(channels.max(1)) {
            let value = match queue.samples.pop_front() {
                Some(sample) => {
                    emitted = true;
                    T::from_sample(sample)
                }
                None => silence,
            };
            frame.fill(value);
        }
        self.queued.store(queue.samples.len(), Ordering::Release);
        self.emitting.store(emitted, Ordering::Release);
    }
}

struct OutputHost {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Output-side collaborator of the realtime pipeline.
pub struct AudioPlayer {
    shared: Arc<PlaybackShared>,
    source_rate: u32,
    device_rate: Arc<AtomicUsize>,
    host: Mutex<Option<OutputHost>>,
}

impl Default for AudioPlayer {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl AudioPlayer {
    /// `source_rate` is the rate of the PCM handed to [`Self::enqueue_audio`].
    pub fn new(source_rate: u32) -> Self {
        Self {
            shared: Arc::new(PlaybackShared {
                queue: Mutex::new(PlaybackQueue {
                    samples: VecDeque::new(),
                    resampler: StreamResampler::new(source_rate, source_rate),
                    scratch: Vec::new(),
                }),
                queued: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                emitting: AtomicBool::new(false),
            }),
            source_rate,
            device_rate: Arc::new(AtomicUsize::new(source_rate as usize)),
            host: Mutex::new(None),
        }
    }

    /// Queue little-endian 16-bit PCM for playback.
    pub fn enqueue_audio(&self, pcm: &[u8]) -> Result<()> {
        let mut samples = Vec::with_capacity(pcm.len() / 2);
        append_bytes_as_samples(&mut samples, pcm)?;
        let mut queue = lock_or_recover(&self.shared.queue, "playback_queue");
        let PlaybackQueue {
            samples: pending,
            resampler,
            scratch,
        } = &mut *queue;
        scratch.clear();
        scratch.extend(samples.iter().copied().map(sample_to_f32));
        let before = pending.len();
        let mut resampled = Vec::with_capacity(scratch.len());
        resampler.process_into(scratch.as_slice(), &mut resampled);
        pending.extend(resampled);
        self.shared.queued.store(pending.len(), Ordering::Release);
        tracing::trace!(added = pending.len() - before, "queued playback audio");
        Ok(())
    }

    /// Like [`Self::enqueue_audio`], but drops audio produced for a response
    /// that has since been interrupted.
    pub fn enqueue_audio_for(&self, generation: u64, pcm: &[u8]) -> Result<bool> {
        if generation != self.generation() {
            return Ok(false);
        }
        self.enqueue_audio(pcm)?;
        Ok(true)
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn queued_samples(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.host, "playback_host").is_some()
    }

    fn open(&self) -> Result<OutputHost> {
        let (ready_tx, ready_rx) = bounded::<Result<u32>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                let stream = match open_output_stream(shared) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                if let Err(err) = stream.pause() {
                    tracing::debug!(error = %err, "failed to pause output stream");
                }
            })
            .context("failed to spawn audio playback thread")?;

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(rate)) => {
                self.device_rate.store(rate as usize, Ordering::Release);
                let mut queue = lock_or_recover(&self.shared.queue, "playback_queue");
                queue.resampler = StreamResampler::new(self.source_rate, rate);
                Ok(OutputHost { stop_tx, handle })
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                drop(stop_tx);
                bail!("timed out opening output device")
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(anyhow!("audio playback thread exited before opening the device"))
            }
        }
    }
}

fn open_output_stream(shared: Arc<PlaybackShared>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no output device available")?;
    let supported = device
        .default_output_config()
        .context("no usable output config")?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = usize::from(config.channels.max(1));
    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels,
        ?format,
        "audio playback initialized"
    );

    let stream = match format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, shared, channels)?,
        SampleFormat::I16 => build_output::<i16>(&device, &config, shared, channels)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, shared, channels)?,
        other => bail!("unsupported output sample format: {other:?}"),
    };
    stream.play().context("failed to start output stream")?;
    Ok((stream, config.sample_rate.0))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<PlaybackShared>,
    channels: usize,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| shared.fill(data, channels),
            |err| tracing::error!(error = %err, "audio playback error"),
            None,
        )
        .context("failed to build output stream")
}

impl PlaybackControl for AudioPlayer {
    fn is_audio_playing(&self) -> bool {
        self.shared.queued.load(Ordering::Acquire) > 0
            || self.shared.emitting.load(Ordering::Acquire)
    }

    fn drain_and_restart(&self) {
        let mut queue = lock_or_recover(&self.shared.queue, "playback_queue");
        let dropped = queue.samples.len();
        queue.samples.clear();
        queue.resampler.reset();
        self.shared.queued.store(0, Ordering::Release);
        self.shared.emitting.store(false, Ordering::Release);
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(dropped, generation, "playback drained");
    }

    fn start(&self) -> Result<()> {
        let mut host = lock_or_recover(&self.host, "playback_host");
        if host.is_some() {
            tracing::warn!("audio player is already running");
            return Ok(());
        }
        *host = Some(self.open()?);
        tracing::info!(
            device_rate = self.device_rate.load(Ordering::Acquire),
            "audio player started"
        );
        Ok(())
    }

    fn stop(&self) {
        let Some(OutputHost { stop_tx, handle }) = lock_or_recover(&self.host, "playback_host").take()
        else {
            return;
        };
        let _ = stop_tx.send(());
        if handle.join().is_err() {
            tracing::error!("audio playback thread panicked");
        }
        self.drain_and_restart();
        tracing::info!("audio player stopped");
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        PlaybackControl::stop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::samples_to_bytes;

    #[test]
    fn queued_audio_counts_as_playing() {
        let player = AudioPlayer::new(24_000);
        assert!(!player.is_audio_playing());
        player.enqueue_audio(&samples_to_bytes(&[100; 480])).unwrap();
        assert_eq!(player.queued_samples(), 480);
        assert!(player.is_audio_playing());
    }

    #[test]
    fn drain_clears_queue_and_bumps_generation() {
        let player = AudioPlayer::new(24_000);
        let generation = player.generation();
        player.enqueue_audio(&samples_to_bytes(&[100; 480])).unwrap();
        player.drain_and_restart();
        assert!(!player.is_audio_playing());
        assert_eq!(player.generation(), generation + 1);

        let stale = player
            .enqueue_audio_for(generation, &samples_to_bytes(&[1; 10]))
            .unwrap();
        assert!(!stale);
        assert_eq!(player.queued_samples(), 0);
    }

    #[test]
    fn callback_fill_drains_queue_then_emits_silence() {
        let player = AudioPlayer::new(24_000);
        player.enqueue_audio(&samples_to_bytes(&[16_384; 3])).unwrap();
        let mut out = [1.0f32; 8];
        player.shared.fill(&mut out, 2);
        assert_eq!(&out[..6], &[0.5; 6]);
        assert_eq!(&out[6..], &[0.0, 0.0]);
        assert_eq!(player.queued_samples(), 0);
        assert!(player.is_audio_playing(), "buffer that carried audio is still audible");

        player.shared.fill(&mut out, 2);
        assert!(!player.is_audio_playing());
    }

    #[test]
    fn rejects_odd_length_pcm() {
        let player = AudioPlayer::new(24_000);
        assert!(player.enqueue_audio(&[0, 1, 2]).is_err());
    }
}
