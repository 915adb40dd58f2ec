use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::backend::AudioFrame;
use super::convert::{pcm16_to_bytes, to_pcm16};
use super::vad::SilenceGate;

/// Batch configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Wall-clock length of one batch window
    pub interval: Duration,
    pub sample_rate: u32,
    /// `None` sends every batch
    pub silence_gate: Option<SilenceGate>,
}

impl BatchConfig {
    pub fn new(sample_rate: u32, interval: Duration) -> Self {
        Self {
            interval,
            sample_rate,
            silence_gate: None,
        }
    }
}

/// One outbound unit of captured audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrameBatch {
    /// Seal order, starting at 0
    pub sequence: u64,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl AudioFrameBatch {
    /// Little-endian PCM16 wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        pcm16_to_bytes(&self.samples)
    }

    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64
    }
}

/// Accumulates capture frames and seals them into batches.
///
/// Frames are kept in arrival order; sealing concatenates and converts them
/// in one pass and clears the buffer.
pub struct FrameBatcher {
    config: BatchConfig,
    pending: Vec<f32>,
    next_sequence: u64,
    dropped_silent: u64,
}

impl FrameBatcher {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            next_sequence: 0,
            dropped_silent: 0,
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        self.pending.extend_from_slice(&frame.samples);
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped_silent(&self) -> u64 {
        self.dropped_silent
    }

    /// Seal the current window. Returns `None` when nothing arrived or the
    /// silence gate dropped the batch.
    pub fn seal(&mut self) -> Option<AudioFrameBatch> {
        if self.pending.is_empty() {
            return None;
        }

        let window = std::mem::take(&mut self.pending);

        if let Some(gate) = &mut self.config.silence_gate {
            if !gate.admit(&window) {
                self.dropped_silent += 1;
                debug!("Dropped silent batch ({} samples)", window.len());
                return None;
            }
        }

        let batch = AudioFrameBatch {
            sequence: self.next_sequence,
            sample_rate: self.config.sample_rate,
            samples: to_pcm16(&window),
        };
        self.next_sequence += 1;

        Some(batch)
    }

    /// Drive batching until the frame channel closes.
    ///
    /// Every `interval` the buffered frames are sealed and handed to
    /// `on_batch_ready`; leftovers are flushed when the input ends. Returns
    /// the number of batches emitted.
    pub async fn run<F>(mut self, mut frames: mpsc::Receiver<AudioFrame>, mut on_batch_ready: F) -> u64
    where
        F: FnMut(AudioFrameBatch) + Send,
    {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        let mut emitted = 0u64;

        info!(
            "Batching capture frames every {}ms",
            self.config.interval.as_millis()
        );

        loop {
            tokio::select! {
                biased;

                frame = frames.recv() => match frame {
                    Some(frame) => self.push(&frame),
                    None => break,
                },

                _ = ticker.tick() => {
                    if let Some(batch) = self.seal() {
                        emitted += 1;
                        on_batch_ready(batch);
                    }
                }
            }
        }

        if let Some(batch) = self.seal() {
            emitted += 1;
            on_batch_ready(batch);
        }

        info!(
            "Capture batching ended: {} batches sent, {} silent batches dropped",
            emitted, self.dropped_silent
        );

        emitted
    }
}
