use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource, BatchConfig, SilenceGate};
use crate::config::Config;
use crate::transport::TransportOptions;

/// Configuration for a chat session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier used in logs
    pub session_id: String,

    /// Where captured speech comes from
    pub audio_source: AudioSource,

    pub backend: AudioBackendConfig,

    pub batch: BatchConfig,

    pub transport: TransportOptions,

    /// Sample rate of raw PCM16 binary frames from the service
    pub binary_sample_rate: u32,

    /// Use a discarding sink instead of the output device
    pub muted: bool,
}

impl SessionConfig {
    pub fn from_config(config: &Config, audio_source: AudioSource) -> Self {
        let audio = &config.audio;

        let backend = AudioBackendConfig {
            target_sample_rate: audio.sample_rate,
            ..Default::default()
        };

        let mut batch = BatchConfig::new(audio.sample_rate, Duration::from_millis(audio.batch_interval_ms));
        if audio.silence_gate {
            batch.silence_gate = Some(SilenceGate::new(audio.silence_threshold, audio.silence_keep_every));
        }

        Self {
            session_id: format!("chat-{}", uuid::Uuid::new_v4()),
            audio_source,
            backend,
            batch,
            transport: TransportOptions::from_config(config),
            binary_sample_rate: config.playback.binary_sample_rate,
            muted: config.playback.muted,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default(), AudioSource::Microphone)
    }
}
