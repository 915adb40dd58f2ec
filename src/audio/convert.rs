//! Sample format conversions shared by capture and playback.

use anyhow::{ensure, Result};
use rubato::{FftFixedIn, Resampler};

/// Convert one float sample to PCM16: clamp to [-1.0, 1.0], then scale by
/// 32767 so the encoding is symmetric (-1.0 maps to -32767).
#[inline]
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * 32767.0) as i16
}

pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_pcm16(s)).collect()
}

/// Little-endian wire encoding
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian PCM16; dividing by 32768 keeps every value in
/// [-1.0, 1.0), `i16::MIN` included.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

/// Average interleaved channels down to mono
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Input chunk handed to the FFT resampler per pass
const RESAMPLE_CHUNK: usize = 1024;

/// Streaming sample-rate converter for mono audio.
///
/// Input of any length is buffered and fed to the resampler in fixed chunks,
/// so the output rate stays exact across calls and there is no seam between
/// device callbacks. The resampler's startup delay is trimmed from the front.
pub struct StreamResampler {
    resampler: Option<FftFixedIn<f32>>,
    ratio: f64,
    pending: Vec<f32>,
    delay: usize,
    consumed: u64,
    produced: u64,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        ensure!(
            from_rate > 0 && to_rate > 0,
            "cannot resample {}Hz -> {}Hz",
            from_rate,
            to_rate
        );

        let resampler = if from_rate == to_rate {
            None
        } else {
            Some(FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                RESAMPLE_CHUNK,
                2,
                1,
            )?)
        };
        let delay = resampler.as_ref().map_or(0, |r| r.output_delay());

        Ok(Self {
            resampler,
            ratio: to_rate as f64 / from_rate as f64,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
            delay,
            consumed: 0,
            produced: 0,
        })
    }

    /// Output samples per input sample
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Input samples waiting for a full chunk
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.consumed += samples.len() as u64;

        let Some(resampler) = self.resampler.as_mut() else {
            self.produced += samples.len() as u64;
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= resampler.input_frames_next() {
            let chunk: Vec<f32> = self.pending.drain(..resampler.input_frames_next()).collect();
            let frames = resampler.process(&[chunk], None)?;
            if let Some(mono) = frames.first() {
                skip_delay(mono, &mut self.delay, &mut self.produced, &mut out);
            }
        }

        Ok(out)
    }

    /// Flush what is still buffered, padding with silence. Afterwards the
    /// total output is exactly `input * to / from` samples (rounded).
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let target = (self.consumed as f64 * self.ratio).round() as u64;
        let mut out = Vec::new();

        if let Some(resampler) = self.resampler.as_mut() {
            while self.produced < target {
                let mut chunk = std::mem::take(&mut self.pending);
                chunk.resize(resampler.input_frames_next(), 0.0);
                let frames = resampler.process(&[chunk], None)?;
                if let Some(mono) = frames.first() {
                    skip_delay(mono, &mut self.delay, &mut self.produced, &mut out);
                }
            }
        }

        let excess = (self.produced.saturating_sub(target) as usize).min(out.len());
        out.truncate(out.len() - excess);
        self.produced -= excess as u64;

        Ok(out)
    }
}

fn skip_delay(frames: &[f32], delay: &mut usize, produced: &mut u64, out: &mut Vec<f32>) {
    let skip = (*delay).min(frames.len());
    *delay -= skip;
    *produced += (frames.len() - skip) as u64;
    out.extend_from_slice(&frames[skip..]);
}

/// Resample a complete buffer
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let mut out = resampler.process(samples)?;
    out.extend(resampler.finish()?);
    Ok(out)
}

/// Mean absolute amplitude, 0.0 for an empty slice
pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}
