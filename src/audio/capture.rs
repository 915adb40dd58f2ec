use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::AudioBackend;
use super::batcher::{AudioFrameBatch, BatchConfig, FrameBatcher};
use crate::error::CaptureError;

/// Turns a capture backend into a stream of outbound batches.
///
/// Owns the backend and the batching task; both are released by `stop`.
pub struct AudioCapture {
    backend: Box<dyn AudioBackend>,
    batch_config: BatchConfig,
    batch_task: Option<JoinHandle<u64>>,
}

impl AudioCapture {
    pub fn new(backend: Box<dyn AudioBackend>, batch_config: BatchConfig) -> Self {
        Self {
            backend,
            batch_config,
            batch_task: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.batch_task.is_some()
    }

    /// Start capturing; `on_batch_ready` is called from the batching task
    /// once per sealed batch, in seal order.
    ///
    /// On failure nothing stays acquired and capture remains inactive.
    pub async fn start<F>(&mut self, on_batch_ready: F) -> Result<(), CaptureError>
    where
        F: FnMut(AudioFrameBatch) + Send + 'static,
    {
        if self.is_active() {
            return Err(CaptureError::AlreadyRunning);
        }

        info!("Starting audio capture via {}", self.backend.name());

        let frames = match self.backend.start().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Audio capture setup failed: {}", e);
                self.backend.stop().await;
                return Err(e);
            }
        };

        let batcher = FrameBatcher::new(self.batch_config.clone());
        self.batch_task = Some(tokio::spawn(batcher.run(frames, on_batch_ready)));

        Ok(())
    }

    /// Stop capturing and flush the last partial batch.
    ///
    /// Idempotent: returns 0 without touching the backend when not running.
    /// Returns the number of batches emitted by the finished run.
    pub async fn stop(&mut self) -> u64 {
        let Some(task) = self.batch_task.take() else {
            if self.backend.is_capturing() {
                self.backend.stop().await;
            }
            return 0;
        };

        // Closing the backend closes the frame channel, which ends the batcher
        self.backend.stop().await;

        match task.await {
            Ok(emitted) => {
                info!("Audio capture stopped after {} batches", emitted);
                emitted
            }
            Err(e) => {
                warn!("Batching task ended abnormally: {}", e);
                0
            }
        }
    }
}
