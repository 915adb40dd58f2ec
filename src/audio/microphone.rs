// Microphone capture through cpal
//
// cpal streams are not Send, so each capture owns a dedicated thread that
// builds the stream, reports the outcome once, then parks until stop. The
// realtime callback only assembles fixed-size frames and posts them into a
// bounded channel; all batching happens on the async side.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert::{downmix, StreamResampler};
use crate::error::CaptureError;

/// How the input device ended up being opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingNode {
    /// Device opened directly at the target rate, mono f32
    Native,
    /// Device default format; downmixed and resampled in the callback
    Converted { device_rate: u32, channels: u16 },
}

struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    worker: Option<CaptureWorker>,
    node: Option<ProcessingNode>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            worker: None,
            node: None,
        }
    }

    pub fn processing_node(&self) -> Option<ProcessingNode> {
        self.node
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_channel_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || match open_input_stream(&config, frame_tx) {
                Ok((stream, node)) => {
                    let _ = ready_tx.send(Ok(node));
                    // Returns on stop() or when the backend is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Microphone stream released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| CaptureError::Device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(node)) => {
                info!(
                    "Microphone capture started ({}Hz mono, {:?})",
                    self.config.target_sample_rate, node
                );
                self.node = Some(node);
                self.worker = Some(CaptureWorker { stop_tx, thread });
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                warn!("Microphone capture failed to start: {}", e);
                Err(e)
            }
            Err(_) => Err(CaptureError::Device("capture thread exited during setup".to_string())),
        }
    }

    async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = worker.stop_tx.send(());
        if let Err(e) = tokio::task::spawn_blocking(move || worker.thread.join()).await {
            warn!("Failed to join capture thread: {}", e);
        }
        self.node = None;

        info!("Microphone capture stopped");
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
        }
    }
}

fn open_input_stream(
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<(cpal::Stream, ProcessingNode), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::Device("no input device available".to_string()))?;

    if let Ok(name) = device.name() {
        info!("Input device: {}", name);
    }

    let target = config.target_sample_rate;

    // Preferred node: the device can deliver mono f32 at the target rate itself
    let native = device
        .supported_input_configs()
        .map_err(|e| classify_device_error(&e.to_string()))?
        .find(|range| {
            range.channels() == 1
                && range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate().0 <= target
                && range.max_sample_rate().0 >= target
        });

    if let Some(range) = native {
        let stream_config: cpal::StreamConfig = range.with_sample_rate(cpal::SampleRate(target)).config();
        let assembler = FrameAssembler::new(frame_tx.clone(), config, target, 1)?;
        match build_stream::<f32>(&device, &stream_config, assembler) {
            Ok(stream) => return Ok((stream, ProcessingNode::Native)),
            Err(e) => warn!("Native input format rejected, falling back: {}", e),
        }
    }

    // Fallback node: whatever the device defaults to, converted in the callback
    let default = device
        .default_input_config()
        .map_err(|e| classify_device_error(&e.to_string()))?;
    let device_rate = default.sample_rate().0;
    let channels = default.channels();
    let stream_config: cpal::StreamConfig = default.config();
    let assembler = FrameAssembler::new(frame_tx, config, device_rate, channels)?;

    let stream = match default.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, assembler)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, assembler)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, assembler)?,
        format => {
            return Err(CaptureError::Device(format!(
                "unsupported input sample format: {:?}",
                format
            )))
        }
    };

    Ok((stream, ProcessingNode::Converted { device_rate, channels }))
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    mut assembler: FrameAssembler,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stream = device
        .build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                assembler.push(&samples);
            },
            |err| warn!("Input stream error: {}", err),
            None,
        )
        .map_err(|e| classify_device_error(&e.to_string()))?;

    // Any failure past this point drops `stream`, which releases the device
    stream
        .play()
        .map_err(|e| classify_device_error(&e.to_string()))?;

    Ok(stream)
}

/// Backends report denial as free-form text; sort it into the two
/// user-facing categories.
pub fn classify_device_error(message: &str) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        CaptureError::Permission(message.to_string())
    } else {
        CaptureError::Device(message.to_string())
    }
}

/// Runs inside the audio callback: converts device samples to mono at the
/// target rate and cuts them into fixed-size frames. One resampler lives for
/// the whole capture run so rate conversion carries across callbacks.
pub(crate) struct FrameAssembler {
    tx: mpsc::Sender<AudioFrame>,
    pending: Vec<f32>,
    frame_len: usize,
    target_rate: u32,
    resampler: StreamResampler,
    channels: usize,
    emitted_samples: u64,
}

impl FrameAssembler {
    pub(crate) fn new(
        tx: mpsc::Sender<AudioFrame>,
        config: &AudioBackendConfig,
        device_rate: u32,
        channels: u16,
    ) -> Result<Self, CaptureError> {
        let resampler = StreamResampler::new(device_rate, config.target_sample_rate)
            .map_err(|e| CaptureError::Device(format!("cannot convert {}Hz input: {:#}", device_rate, e)))?;
        let frame_len = config.samples_per_frame();

        Ok(Self {
            tx,
            pending: Vec::with_capacity(frame_len * 2),
            frame_len,
            target_rate: config.target_sample_rate,
            resampler,
            channels: channels.max(1) as usize,
            emitted_samples: 0,
        })
    }

    pub(crate) fn push(&mut self, interleaved: &[f32]) {
        let mono = downmix(interleaved, self.channels);
        match self.resampler.process(&mono) {
            Ok(converted) => self.pending.extend_from_slice(&converted),
            Err(e) => {
                warn!("Resampling failed, dropping {} samples: {:#}", mono.len(), e);
                return;
            }
        }

        while self.pending.len() >= self.frame_len {
            let samples: Vec<f32> = self.pending.drain(..self.frame_len).collect();
            let frame = AudioFrame {
                timestamp_ms: self.emitted_samples * 1000 / self.target_rate as u64,
                sample_rate: self.target_rate,
                samples,
            };
            self.emitted_samples += self.frame_len as u64;

            match self.tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Capture channel full, dropping frame")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}
