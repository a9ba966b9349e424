//! Debug WAV sidecar: every forwarded chunk is mirrored to a 16-bit PCM file.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const DEFAULT_WAVE_CAPTURE_FILE: &str = "microphone_output.wav";

pub struct WaveSidecar {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    samples_written: u64,
    write_failed: bool,
}

impl WaveSidecar {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("failed to create wave file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            samples_written: 0,
            write_failed: false,
        })
    }

    /// Append samples. Failures are logged once and otherwise ignored.
    pub fn write_samples(&mut self, samples: &[i16]) {
        for sample in samples {
            if let Err(err) = self.writer.write_sample(*sample) {
                if !self.write_failed {
                    tracing::error!(path = %self.path.display(), error = %err, "error writing to wave file");
                    self.write_failed = true;
                }
                return;
            }
        }
        self.samples_written += samples.len() as u64;
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the header and close the file.
    pub fn finalize(self) -> Result<PathBuf> {
        let path = self.path;
        self.writer
            .finalize()
            .with_context(|| format!("failed to finalize wave file {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_readable_mono_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.wav");
        let mut wave = WaveSidecar::create(&path, 24_000).unwrap();
        wave.write_samples(&[1, -2, 3]);
        wave.write_samples(&[i16::MAX, i16::MIN]);
        assert_eq!(wave.samples_written(), 5);
        wave.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -2, 3, i16::MAX, i16::MIN]);
    }

    #[test]
    fn create_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("capture.wav");
        assert!(WaveSidecar::create(&path, 24_000).is_err());
    }
}
