use super::convert::mean_abs;

/// Bandwidth gate for near-silent batches.
///
/// Within a run of consecutive silent batches only every `keep_every`-th one
/// is forwarded (starting with the first), so the server still sees a trickle
/// of audio during long pauses. Any non-silent batch resets the run.
#[derive(Debug, Clone)]
pub struct SilenceGate {
    threshold: f32,
    keep_every: u32,
    silent_run: u32,
}

impl SilenceGate {
    pub fn new(threshold: f32, keep_every: u32) -> Self {
        Self {
            threshold,
            keep_every: keep_every.max(1),
            silent_run: 0,
        }
    }

    pub fn is_silent(&self, samples: &[f32]) -> bool {
        mean_abs(samples) < self.threshold
    }

    /// Returns `true` if the batch should be sent.
    pub fn admit(&mut self, samples: &[f32]) -> bool {
        if !self.is_silent(samples) {
            self.silent_run = 0;
            return true;
        }

        let keep = self.silent_run % self.keep_every == 0;
        self.silent_run = self.silent_run.wrapping_add(1);
        keep
    }
}
