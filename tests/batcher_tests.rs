// Integration tests for outbound audio batching
//
// These tests verify that capture frames are concatenated into fixed
// windows, converted to PCM16 exactly once, and that silent windows are
// thinned out but never all dropped.

use anyhow::Result;
use nutri_voice::audio::{AudioFrame, AudioFrameBatch, BatchConfig, FrameBatcher, SilenceGate};
use std::time::Duration;
use tokio::sync::mpsc;

fn frame(samples: Vec<f32>, timestamp_ms: u64) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate: 24000,
        timestamp_ms,
    }
}

#[test]
fn test_seal_concatenates_frames_in_order() {
    let mut batcher = FrameBatcher::new(BatchConfig::new(24000, Duration::from_millis(100)));

    batcher.push(&frame(vec![0.0, 0.5], 0));
    batcher.push(&frame(vec![-0.5, 1.0], 20));
    batcher.push(&frame(vec![-1.0], 40));
    assert_eq!(batcher.pending_samples(), 5);

    let batch = batcher.seal().expect("batch");
    assert_eq!(batch.sequence, 0);
    assert_eq!(batch.samples, vec![0, 16383, -16383, i16::MAX, -i16::MAX]);
    assert_eq!(batcher.pending_samples(), 0, "buffer cleared after seal");
}

#[test]
fn test_out_of_range_samples_saturate() {
    let mut batcher = FrameBatcher::new(BatchConfig::new(24000, Duration::from_millis(100)));
    batcher.push(&frame(vec![3.5, -7.0, f32::NAN], 0));

    let batch = batcher.seal().expect("batch");
    assert_eq!(batch.samples, vec![i16::MAX, -i16::MAX, 0]);
}

#[test]
fn test_no_frames_no_batch() {
    let mut batcher = FrameBatcher::new(BatchConfig::new(24000, Duration::from_millis(100)));
    assert!(batcher.seal().is_none());

    batcher.push(&frame(vec![0.2; 10], 0));
    assert!(batcher.seal().is_some());
    assert!(batcher.seal().is_none(), "nothing new since last seal");
}

#[test]
fn test_batch_wire_bytes_are_little_endian() {
    let batch = AudioFrameBatch {
        sequence: 3,
        sample_rate: 24000,
        samples: vec![1, -2, 0x1234],
    };

    assert_eq!(batch.to_bytes(), vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
}

#[test]
fn test_batch_duration() {
    let batch = AudioFrameBatch {
        sequence: 0,
        sample_rate: 24000,
        samples: vec![0; 2400],
    };
    assert_eq!(batch.duration_ms(), 100);
}

#[test]
fn test_silence_gate_never_drops_everything() {
    let mut config = BatchConfig::new(24000, Duration::from_millis(100));
    config.silence_gate = Some(SilenceGate::new(0.01, 4));
    let mut batcher = FrameBatcher::new(config);

    let mut sent = 0;
    for i in 0..20 {
        batcher.push(&frame(vec![0.001; 2400], i * 100));
        if batcher.seal().is_some() {
            sent += 1;
        }
    }

    assert_eq!(sent, 5, "one in four silent batches kept");
    assert_eq!(batcher.dropped_silent(), 15);
}

#[test]
fn test_sequence_skips_dropped_batches() {
    let mut config = BatchConfig::new(24000, Duration::from_millis(100));
    config.silence_gate = Some(SilenceGate::new(0.01, 4));
    let mut batcher = FrameBatcher::new(config);

    let mut sequences = Vec::new();
    for loud in [false, false, true, false] {
        let level = if loud { 0.4 } else { 0.0 };
        batcher.push(&frame(vec![level; 100], 0));
        if let Some(batch) = batcher.seal() {
            sequences.push(batch.sequence);
        }
    }

    // silent kept, silent dropped, loud kept, silent kept (run reset)
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_run_emits_on_interval_and_flushes_on_close() -> Result<()> {
    let batcher = FrameBatcher::new(BatchConfig::new(24000, Duration::from_millis(100)));
    let (tx, rx) = mpsc::channel(64);
    let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(batcher.run(rx, move |batch| {
        let _ = batch_tx.send(batch);
    }));

    // 250ms of 20ms frames, then close
    for i in 0..12u64 {
        tx.send(frame(vec![0.25; 480], i * 20)).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    drop(tx);

    let emitted = task.await?;

    let mut batches = Vec::new();
    while let Ok(batch) = batch_rx.try_recv() {
        batches.push(batch);
    }

    assert_eq!(emitted as usize, batches.len());
    assert_eq!(batches.len(), 3, "two full windows plus the flushed tail");
    let total: usize = batches.iter().map(|b| b.samples.len()).sum();
    assert_eq!(total, 12 * 480);

    Ok(())
}
