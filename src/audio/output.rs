// Audio output sinks
//
// Same thread model as capture: the cpal output stream lives on its own
// thread, and the async side talks to the realtime callback through a small
// shared queue. `play` resolves once the callback has consumed every sample
// of the fragment.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::convert::resample;
use super::decode::DecodedAudio;

/// Somewhere decoded fragments are played to completion
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Returns after the last sample has been handed to the device
    async fn play(&self, audio: DecodedAudio) -> Result<()>;

    fn name(&self) -> &str;
}

/// Discards audio, optionally pretending to take real time
#[derive(Debug, Default, Clone)]
pub struct NullSink {
    realtime: bool,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for each fragment's duration instead of returning immediately
    pub fn realtime() -> Self {
        Self { realtime: true }
    }
}

#[async_trait::async_trait]
impl AudioSink for NullSink {
    async fn play(&self, audio: DecodedAudio) -> Result<()> {
        if self.realtime {
            tokio::time::sleep(Duration::from_millis(audio.duration_ms())).await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[derive(Default)]
struct PlayState {
    samples: VecDeque<f32>,
    drained: Option<oneshot::Sender<()>>,
}

/// Default output device via cpal
pub struct CpalSink {
    state: Arc<Mutex<PlayState>>,
    device_rate: u32,
    stop_tx: std_mpsc::Sender<()>,
}

impl CpalSink {
    pub async fn open() -> Result<Self> {
        let state = Arc::new(Mutex::new(PlayState::default()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let shared = state.clone();

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match open_output_stream(shared) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Output stream released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .context("Failed to spawn audio output thread")?;

        let device_rate = ready_rx
            .await
            .map_err(|_| anyhow!("audio output thread exited during setup"))??;

        info!("Audio output ready at {}Hz", device_rate);

        Ok(Self {
            state,
            device_rate,
            stop_tx,
        })
    }
}

#[async_trait::async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, audio: DecodedAudio) -> Result<()> {
        let samples = resample(&audio.samples, audio.sample_rate, self.device_rate)?;
        if samples.is_empty() {
            return Ok(());
        }

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow!("output state poisoned"))?;
            state.samples.extend(samples);
            state.drained = Some(done_tx);
        }

        done_rx
            .await
            .map_err(|_| anyhow!("output stream stopped before fragment finished"))
    }

    fn name(&self) -> &str {
        "cpal output"
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

fn open_output_stream(state: Arc<Mutex<PlayState>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;

    if let Ok(name) = device.name() {
        info!("Output device: {}", name);
    }

    let default = device
        .default_output_config()
        .context("Failed to query output config")?;

    if default.sample_format() != cpal::SampleFormat::F32 {
        return Err(anyhow!(
            "unsupported output sample format: {:?}",
            default.sample_format()
        ));
    }

    let rate = default.sample_rate().0;
    let channels = default.channels().max(1) as usize;
    let stream_config: cpal::StreamConfig = default.config();

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill_output(&state, data, channels);
            },
            |err| warn!("Output stream error: {}", err),
            None,
        )
        .context("Failed to build output stream")?;

    stream.play().context("Failed to start output stream")?;

    Ok((stream, rate))
}

/// Realtime callback body: mono queue fanned out to every channel, silence
/// once the queue runs dry.
fn fill_output(state: &Mutex<PlayState>, data: &mut [f32], channels: usize) {
    let Ok(mut state) = state.lock() else {
        data.fill(0.0);
        return;
    };

    for frame in data.chunks_mut(channels) {
        let sample = state.samples.pop_front().unwrap_or(0.0);
        frame.fill(sample);
    }

    if state.samples.is_empty() {
        if let Some(done) = state.drained.take() {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_output_fans_out_and_signals_drain() {
        let (tx, mut rx) = oneshot::channel();
        let state = Mutex::new(PlayState {
            samples: VecDeque::from(vec![0.1, 0.2, 0.3]),
            drained: Some(tx),
        });

        let mut buffer = [9.0f32; 4];
        fill_output(&state, &mut buffer, 2);
        assert_eq!(buffer, [0.1, 0.1, 0.2, 0.2]);
        assert!(rx.try_recv().is_err(), "one sample still queued");

        fill_output(&state, &mut buffer, 2);
        assert_eq!(buffer, [0.3, 0.3, 0.0, 0.0]);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_null_sink_takes_fragment_duration() {
        let sink = NullSink::realtime();
        let started = tokio::time::Instant::now();

        sink.play(DecodedAudio {
            samples: vec![0.0; 2400],
            sample_rate: 24000,
        })
        .await
        .unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }
}
