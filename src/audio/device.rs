//! cpal input device host for the capture engine.
//!
//! A cpal `Stream` is not `Send`, so each running capture owns a dedicated
//! host thread that opens the stream, reports readiness, and parks until stop
//! is requested. The data callback only converts the driver's buffer into
//! fixed-size mono chunks and hands them to the shared [`CaptureEngine`].

use super::capture::{
    build_vad, CaptureEngine, CaptureEventHandler, CaptureSettings, CaptureStats, ChunkOutcome,
    StreamStatus,
};
use super::pcm::{append_downmixed_samples, f32_to_sample, sample_to_f32, FrameChunker};
use super::resample::StreamResampler;
use super::wave::WaveSidecar;
use crate::keyword::{
    KeywordCallback, KeywordModelLoader, KeywordRecognizer, KeywordSwitch,
    StreamingKeywordRecognizer,
};
use crate::lock_or_recover;
use crate::offload::WorkerPool;
use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, SampleFormat, SampleRate, SizedSample, StreamConfig, SupportedBufferSize,
};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on how long `start()` waits for the driver to open the device.
const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// List microphone names so the CLI can expose a human-friendly selector.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

fn select_input_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    match preferred {
        Some(name) => {
            let mut devices = host.input_devices().context("no input devices available")?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device '{name}' not found"))
        }
        None => host
            .default_input_device()
            .context("no default input device available"),
    }
}

/// Best-effort warm-up: briefly open the default input device at the first
/// rate it accepts. Some drivers stall on the first open of a session.
pub fn warm_up_input_device(preferred_rates: &[u32], duration: Duration) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        tracing::debug!("no default input device; skipping warm-up");
        return;
    };
    for rate in preferred_rates {
        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(*rate),
            buffer_size: BufferSize::Default,
        };
        let stream = device.build_input_stream(
            &config,
            |_data: &[i16], _: &cpal::InputCallbackInfo| {},
            |err| tracing::debug!(error = %err, "warm-up stream error"),
            None,
        );
        match stream.map_err(anyhow::Error::from).and_then(|s| {
            s.play()?;
            Ok(s)
        }) {
            Ok(stream) => {
                thread::sleep(duration);
                drop(stream);
                tracing::debug!(rate, "audio input warm-up succeeded");
                return;
            }
            Err(err) => tracing::debug!(rate, error = %err, "warm-up attempt failed"),
        }
    }
}

/// Converts whatever the driver delivers into mono i16 chunks of
/// `frames_per_buffer` samples at the capture rate.
pub(crate) struct InputPipeline {
    channels: usize,
    resampler: StreamResampler,
    chunker: FrameChunker,
    mono: Vec<f32>,
    resampled: Vec<f32>,
    samples: Vec<i16>,
}

impl InputPipeline {
    pub(crate) fn new(
        device_rate: u32,
        channels: usize,
        target_rate: u32,
        frames_per_buffer: usize,
    ) -> Self {
        Self {
            channels: channels.max(1),
            resampler: StreamResampler::new(device_rate, target_rate),
            chunker: FrameChunker::new(frames_per_buffer),
            mono: Vec::new(),
            resampled: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// i16 input skips the float round trip when no conversion is needed.
    pub(crate) fn push_i16<E>(&mut self, data: &[i16], emit: E)
    where
        E: FnMut(&[i16]),
    {
        if self.channels == 1 && self.resampler.is_passthrough() {
            self.chunker.push(data, emit);
        } else {
            self.push(data, sample_to_f32, emit);
        }
    }

    pub(crate) fn push<T, F, E>(&mut self, data: &[T], convert: F, emit: E)
    where
        T: Copy,
        F: FnMut(T) -> f32,
        E: FnMut(&[i16]),
    {
        self.mono.clear();
        append_downmixed_samples(&mut self.mono, data, self.channels, convert);
        self.resampled.clear();
        self.resampler.process_into(&self.mono, &mut self.resampled);
        self.samples.clear();
        self.samples
            .extend(self.resampled.iter().copied().map(f32_to_sample));
        self.chunker.push(&self.samples, emit);
    }
}

struct StreamContext {
    engine: Arc<Mutex<CaptureEngine>>,
    busy_drops: Arc<AtomicU64>,
    glitch: Arc<AtomicBool>,
}

fn build_stream<T, P>(
    device: &cpal::Device,
    config: &StreamConfig,
    ctx: StreamContext,
    mut pipeline: InputPipeline,
    mut push: P,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    P: FnMut(&mut InputPipeline, &[T], &mut dyn FnMut(&[i16])) + Send + 'static,
{
    let StreamContext {
        engine,
        busy_drops,
        glitch,
    } = ctx;
    let err_glitch = Arc::clone(&glitch);
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!(error = %err, "audio stream error");
        err_glitch.store(true, Ordering::Relaxed);
    };
    let data_fn = move |data: &[T], _: &cpal::InputCallbackInfo| {
        // Never wait on the engine: start/stop may hold it briefly.
        let mut engine = match engine.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                busy_drops.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let mut emit = |chunk: &[i16]| {
            let status = StreamStatus {
                input_overflow: glitch.swap(false, Ordering::Relaxed),
                input_underflow: false,
            };
            engine.process_samples(chunk, status);
        };
        if catch_unwind(AssertUnwindSafe(|| push(&mut pipeline, data, &mut emit))).is_err() {
            tracing::error!("capture callback panicked; chunk dropped");
        }
    };
    device
        .build_input_stream(config, data_fn, err_fn, None)
        .context("failed to build input stream")
}

/// Exact mono i16 configuration at the capture rate, if the device offers one.
fn exact_config(device: &cpal::Device, settings: &CaptureSettings) -> Option<StreamConfig> {
    let rate = SampleRate(settings.sample_rate);
    let range = device.supported_input_configs().ok()?.find(|c| {
        c.channels() == 1
            && c.sample_format() == SampleFormat::I16
            && c.min_sample_rate() <= rate
            && c.max_sample_rate() >= rate
    })?;
    let frames = u32::try_from(settings.frames_per_buffer).ok()?;
    let buffer_size = match range.buffer_size() {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    };
    let mut config = range.with_sample_rate(rate).config();
    config.buffer_size = buffer_size;
    Some(config)
}

fn open_input_stream(
    settings: &CaptureSettings,
    ctx: StreamContext,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = select_input_device(&host, settings.input_device.as_deref())?;
    let name = device
        .name()
        .unwrap_or_else(|_| "unknown input device".to_string());

    let (config, format) = match exact_config(&device, settings) {
        Some(config) => (config, SampleFormat::I16),
        None => {
            let default = device
                .default_input_config()
                .with_context(|| format!("no usable input config on '{name}'"))?;
            let format = default.sample_format();
            (default.into(), format)
        }
    };
    let channels = usize::from(config.channels.max(1));
    tracing::info!(
        device = %name,
        ?format,
        sample_rate = config.sample_rate.0,
        channels,
        "opening input stream"
    );

    let pipeline = InputPipeline::new(
        config.sample_rate.0,
        channels,
        settings.sample_rate,
        settings.frames_per_buffer,
    );
    let stream = match format {
        SampleFormat::I16 => build_stream::<i16, _>(
            &device,
            &config,
            ctx,
            pipeline,
            |p, data, emit| p.push_i16(data, emit),
        )?,
        SampleFormat::F32 => build_stream::<f32, _>(
            &device,
            &config,
            ctx,
            pipeline,
            |p, data, emit| p.push(data, |s| s, emit),
        )?,
        SampleFormat::U16 => build_stream::<u16, _>(
            &device,
            &config,
            ctx,
            pipeline,
            |p, data, emit| p.push(data, |s| (f32::from(s) - 32_768.0) / 32_768.0, emit),
        )?,
        other => bail!("unsupported sample format: {other:?}"),
    };
    stream.play().context("failed to start input stream")?;
    Ok((stream, name))
}

struct StreamHost {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamHost {
    fn spawn(settings: CaptureSettings, ctx: StreamContext) -> Result<(Self, String)> {
        let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match open_input_stream(&settings, ctx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                // Disconnect (sender dropped) counts as a stop request too.
                let _ = stop_rx.recv();
                if let Err(err) = stream.pause() {
                    tracing::debug!(error = %err, "failed to pause input stream");
                }
                drop(stream);
            })
            .context("failed to spawn audio capture thread")?;

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(name)) => Ok((Self { stop_tx, handle }, name)),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                drop(stop_tx);
                bail!("timed out opening input device after {DEVICE_OPEN_TIMEOUT:?}")
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                bail!("audio capture thread exited before opening the device")
            }
        }
    }

    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::error!("audio capture thread panicked");
        }
    }
}

/// Owns one capture instance: device stream, detector, keyword recognizer and
/// optional WAV sidecar. Lifecycle is `stopped -> running -> stopped`.
pub struct AudioCapture {
    settings: CaptureSettings,
    engine: Arc<Mutex<CaptureEngine>>,
    keyword: Option<KeywordSwitch>,
    host: Option<StreamHost>,
    busy_drops: Arc<AtomicU64>,
    running: bool,
    closed: bool,
}

impl AudioCapture {
    /// Build the capture. A detector that fails to load degrades to ungated
    /// forwarding; a keyword model that fails to load is an error.
    pub fn new(
        settings: CaptureSettings,
        handler: Arc<dyn CaptureEventHandler>,
        keyword_loader: Option<&dyn KeywordModelLoader>,
        offload: WorkerPool,
    ) -> Result<Self> {
        let vad = build_vad(&settings);

        let recognizer: Option<Arc<dyn KeywordRecognizer>> = match settings.keyword_model.as_ref()
        {
            Some(path) => {
                let loader = keyword_loader.ok_or(crate::keyword::KeywordError::NoLoader)?;
                let model = loader
                    .load(path, settings.sample_rate)
                    .context("failed to initialize keyword recognizer")?;
                let callback = keyword_callback(Arc::clone(&handler), offload);
                tracing::info!(model = %path.display(), "keyword recognizer initialized");
                Some(Arc::new(StreamingKeywordRecognizer::new(model, callback)))
            }
            None => None,
        };

        let engine = CaptureEngine::new(&settings, handler, vad, recognizer.clone());
        Ok(Self {
            settings,
            engine: Arc::new(Mutex::new(engine)),
            keyword: recognizer.map(KeywordSwitch::new),
            host: None,
            busy_drops: Arc::new(AtomicU64::new(0)),
            running: false,
            closed: false,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        if self.closed {
            bail!("audio capture has been closed");
        }
        if self.running {
            tracing::warn!("audio capture is already running");
            return Ok(());
        }

        {
            let mut engine = lock_or_recover(&self.engine, "capture_engine");
            engine.reset_stream_state();
            if let Some(path) = self.settings.wave_capture.as_ref() {
                match WaveSidecar::create(path, self.settings.sample_rate) {
                    Ok(wave) => {
                        tracing::info!(path = %path.display(), "wave file initialized for capture");
                        engine.attach_wave(wave);
                    }
                    Err(err) => tracing::error!(error = %err, "error opening wave file"),
                }
            }
        }
        if let Some(keyword) = self.keyword.as_ref() {
            keyword.arm();
        }

        let ctx = StreamContext {
            engine: Arc::clone(&self.engine),
            busy_drops: Arc::clone(&self.busy_drops),
            glitch: Arc::new(AtomicBool::new(false)),
        };
        match StreamHost::spawn(self.settings.clone(), ctx) {
            Ok((host, device)) => {
                self.host = Some(host);
                self.running = true;
                tracing::info!(device = %device, "audio stream started");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to open input stream");
                self.release_subsystems();
                Err(err)
            }
        }
    }

    /// Stop streaming. `terminate` also closes the instance for good.
    pub fn stop(&mut self, terminate: bool) {
        if terminate {
            self.closed = true;
        }
        if !self.running {
            if terminate {
                // Keyword recognition may be armed without a stream.
                self.stop_keyword_recognition();
            } else {
                tracing::warn!("audio capture is already stopped");
            }
            return;
        }
        if let Some(host) = self.host.take() {
            host.shutdown();
            tracing::info!("audio stream stopped and closed");
        }
        self.release_subsystems();
        self.running = false;

        let stats = self.stats();
        tracing::info!(
            chunks = stats.chunks,
            forwarded = stats.forwarded_chunks,
            dropped = stats.dropped_chunks,
            busy_drops = self.busy_drops(),
            speech_runs = stats.speech_runs,
            "audio capture has been stopped"
        );
    }

    pub fn close(&mut self) {
        self.stop(true);
    }

    fn release_subsystems(&mut self) {
        if let Some(keyword) = self.keyword.as_ref() {
            keyword.disarm();
        }
        let wave = lock_or_recover(&self.engine, "capture_engine").take_wave();
        if let Some(wave) = wave {
            match wave.finalize() {
                Ok(path) => tracing::info!(path = %path.display(), "wave file saved"),
                Err(err) => tracing::error!(error = %err, "error closing wave file"),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn has_vad(&self) -> bool {
        lock_or_recover(&self.engine, "capture_engine").has_vad()
    }

    pub fn stats(&self) -> CaptureStats {
        lock_or_recover(&self.engine, "capture_engine").stats()
    }

    /// Callbacks skipped because the engine was locked by a control call.
    pub fn busy_drops(&self) -> u64 {
        self.busy_drops.load(Ordering::Relaxed)
    }

    /// Feed little-endian 16-bit PCM from a source other than the input
    /// device through the same chunk path the stream callback uses.
    pub fn process_pcm(&self, data: &[u8]) -> ChunkOutcome {
        lock_or_recover(&self.engine, "capture_engine").process_bytes(data, StreamStatus::default())
    }

    pub fn keyword_switch(&self) -> Option<KeywordSwitch> {
        self.keyword.clone()
    }

    pub fn start_keyword_recognition(&self) {
        if let Some(keyword) = self.keyword.as_ref() {
            keyword.arm();
        }
    }

    pub fn stop_keyword_recognition(&self) {
        if let Some(keyword) = self.keyword.as_ref() {
            keyword.disarm();
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.running {
            self.stop(true);
        }
    }
}

/// Keyword matches arrive on the recognizer's worker thread; hand them to the
/// offload pool so that thread is never blocked on the handler.
fn keyword_callback(handler: Arc<dyn CaptureEventHandler>, offload: WorkerPool) -> KeywordCallback {
    Arc::new(move |found| {
        let handler = Arc::clone(&handler);
        offload.submit("keyword_detected", move || handler.on_keyword_detected(found));
    })
}
