use anyhow::{ensure, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::transport::ReconnectPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// WebSocket endpoint of the companion service
    pub url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "nutri-voice".to_string(),
            url: "ws://localhost:8000/ws".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate the server expects for inbound PCM16. Must match the
    /// upstream session configuration.
    pub sample_rate: u32,
    pub batch_interval_ms: u64,
    pub silence_gate: bool,
    /// Mean absolute amplitude (0.0..=1.0) below which a batch counts as silence
    pub silence_threshold: f32,
    /// Keep one of every N consecutive silent batches
    pub silence_keep_every: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            batch_interval_ms: 100,
            silence_gate: true,
            silence_threshold: 0.01,
            silence_keep_every: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_growth: f64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    /// Interval between WebSocket pings, 0 disables
    pub keepalive_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_growth: 1.5,
            reconnect_max_delay_ms: 10_000,
            reconnect_max_attempts: 5,
            keepalive_interval_ms: 20_000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            growth: self.reconnect_growth,
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Sample rate of raw PCM16 binary frames pushed by the server
    pub binary_sample_rate: u32,
    /// Replace the output device with a sink that discards audio
    pub muted: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            binary_sample_rate: 24000,
            muted: false,
        }
    }
}

impl Config {
    /// Load configuration from `path` (extension optional) with
    /// `NUTRI_VOICE__SECTION__KEY` environment overrides. A missing file
    /// falls back to defaults.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("NUTRI_VOICE").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the audio pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(self.audio.sample_rate > 0, "audio.sample_rate must be greater than 0");
        ensure!(
            self.audio.batch_interval_ms > 0,
            "audio.batch_interval_ms must be greater than 0"
        );
        ensure!(
            self.playback.binary_sample_rate > 0,
            "playback.binary_sample_rate must be greater than 0"
        );
        Ok(())
    }
}
