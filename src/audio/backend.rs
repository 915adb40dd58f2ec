use anyhow::Result;
use tokio::sync::mpsc;

use crate::error::CaptureError;

/// Raw capture frame as delivered by the realtime audio thread
/// (mono f32, nominal range -1.0..=1.0)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Rate the server expects; frames are always delivered at this rate
    pub target_sample_rate: u32,
    /// Bounded capacity of the frame channel between audio thread and batcher
    pub frame_channel_capacity: usize,
    /// Size of frames the backend tries to deliver, in milliseconds
    pub frame_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 24000,
            frame_channel_capacity: 256,
            frame_duration_ms: 20,
        }
    }
}

impl AudioBackendConfig {
    pub fn samples_per_frame(&self) -> usize {
        ((self.target_sample_rate as u64 * self.frame_duration_ms) / 1000).max(1) as usize
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device
/// - File: replay a WAV file in real time (testing / scripted sessions)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. On error no
    /// device resources remain held.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop capturing audio. Calling it while stopped is a no-op.
    async fn stop(&mut self);

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// 16-bit WAV file replayed in real time
    File(String),
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                use super::microphone::MicrophoneBackend;
                Ok(Box::new(MicrophoneBackend::new(config)))
            }

            AudioSource::File(path) => {
                use super::file::FileBackend;
                Ok(Box::new(FileBackend::open(path, config)?))
            }
        }
    }
}
