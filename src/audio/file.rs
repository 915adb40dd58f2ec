use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert::{downmix, resample};
use crate::error::CaptureError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples normalized to -1.0..=1.0
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (format, bits) => anyhow::bail!("Unsupported WAV format: {:?} {}-bit", format, bits),
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`, ready to be cut into capture frames
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<f32>> {
        let mono = downmix(&self.samples, self.channels as usize);
        resample(&mono, self.sample_rate, target_rate)
            .with_context(|| format!("Failed to resample {} to {}Hz", self.path, target_rate))
    }
}

/// Capture backend that replays a WAV file at real-time pace
pub struct FileBackend {
    config: AudioBackendConfig,
    samples: Vec<f32>,
    path: String,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let file = AudioFile::open(path)?;
        let samples = file.to_mono(config.target_sample_rate)?;

        Ok(Self {
            config,
            samples,
            path: file.path,
            task: None,
        })
    }

    /// Backend over samples already at the target rate
    pub fn from_samples(samples: Vec<f32>, config: AudioBackendConfig) -> Self {
        Self {
            config,
            samples,
            path: "<memory>".to_string(),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.is_capturing() {
            return Err(CaptureError::AlreadyRunning);
        }
        if self.samples.is_empty() {
            return Err(CaptureError::Device(format!("{} contains no audio", self.path)));
        }

        let (tx, rx) = mpsc::channel(self.config.frame_channel_capacity);
        let frame_len = self.config.samples_per_frame();
        let frame_duration = Duration::from_millis(self.config.frame_duration_ms);
        let sample_rate = self.config.target_sample_rate;
        let samples = self.samples.clone();

        info!("Replaying {} as capture input ({}Hz)", self.path, sample_rate);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_duration);
            for (i, chunk) in samples.chunks(frame_len).enumerate() {
                ticker.tick().await;
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate,
                    timestamp_ms: i as u64 * frame_duration.as_millis() as u64,
                };
                if tx.send(frame).await.is_err() {
                    debug!("Frame receiver dropped, ending file replay");
                    return;
                }
            }
            debug!("File replay complete");
        }));

        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
