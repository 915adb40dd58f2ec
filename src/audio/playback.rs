use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::decode::{AudioFragment, FragmentDecoder};
use super::output::AudioSink;

/// Playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub played: u64,
    /// Failed to decode or to play
    pub skipped: u64,
    /// Discarded by `clear`
    pub cleared: u64,
}

#[derive(Default)]
struct Shared {
    generation: AtomicU64,
    pending: AtomicUsize,
    played: AtomicU64,
    skipped: AtomicU64,
    cleared: AtomicU64,
    idle: Notify,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct Queued {
    generation: u64,
    fragment: AudioFragment,
}

/// Sequential player for inbound assistant audio.
///
/// A single drain task owns the decoder and the sink, so fragments are
/// decoded and played one at a time in `enqueue` order no matter how long
/// any one of them takes to decode.
pub struct AudioPlayback {
    tx: mpsc::UnboundedSender<Queued>,
    shared: Arc<Shared>,
    drain_task: Option<JoinHandle<()>>,
}

impl AudioPlayback {
    pub fn new(decoder: Arc<dyn FragmentDecoder>, sink: Arc<dyn AudioSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        info!("Audio playback ready (sink: {})", sink.name());

        let drain_task = tokio::spawn(drain(rx, decoder, sink, shared.clone()));

        Self {
            tx,
            shared,
            drain_task: Some(drain_task),
        }
    }

    /// Queue a fragment behind everything already queued
    pub fn enqueue(&self, fragment: AudioFragment) {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        if self.tx.send(Queued { generation, fragment }).is_err() {
            warn!("Playback is shut down, dropping audio fragment");
            self.shared.finish_one();
        }
    }

    /// Drop every queued fragment; the one currently playing runs to its end
    pub fn clear(&self) {
        let previous = self.shared.generation.fetch_add(1, Ordering::SeqCst);
        debug!("Playback queue cleared (generation {})", previous + 1);
    }

    pub fn is_idle(&self) -> bool {
        self.shared.pending.load(Ordering::SeqCst) == 0
    }

    /// Resolves once nothing is queued or playing
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            played: self.shared.played.load(Ordering::SeqCst),
            skipped: self.shared.skipped.load(Ordering::SeqCst),
            cleared: self.shared.cleared.load(Ordering::SeqCst),
        }
    }

    /// Stop the drain task. Idempotent.
    pub async fn shutdown(&mut self) {
        let Some(task) = self.drain_task.take() else {
            return;
        };

        self.clear();
        task.abort();
        let _ = task.await;
        self.shared.pending.store(0, Ordering::SeqCst);
        self.shared.idle.notify_waiters();

        info!("Audio playback shut down");
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        if let Some(task) = self.drain_task.take() {
            task.abort();
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<Queued>,
    decoder: Arc<dyn FragmentDecoder>,
    sink: Arc<dyn AudioSink>,
    shared: Arc<Shared>,
) {
    while let Some(item) = rx.recv().await {
        let stale = |shared: &Shared| item.generation != shared.generation.load(Ordering::SeqCst);

        if stale(&shared) {
            shared.cleared.fetch_add(1, Ordering::SeqCst);
            shared.finish_one();
            continue;
        }

        let audio = match decoder.decode(&item.fragment).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Skipping undecodable audio fragment: {}", e);
                shared.skipped.fetch_add(1, Ordering::SeqCst);
                shared.finish_one();
                continue;
            }
        };

        // Cleared while decoding
        if stale(&shared) {
            shared.cleared.fetch_add(1, Ordering::SeqCst);
            shared.finish_one();
            continue;
        }

        match sink.play(audio).await {
            Ok(()) => {
                shared.played.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("Audio fragment playback failed: {}", e);
                shared.skipped.fetch_add(1, Ordering::SeqCst);
            }
        }
        shared.finish_one();
    }

    debug!("Playback drain task finished");
}
