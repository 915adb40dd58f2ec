pub mod backend;
pub mod batcher;
pub mod capture;
pub mod convert;
pub mod decode;
pub mod file;
pub mod microphone;
pub mod output;
pub mod playback;
pub mod vad;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use batcher::{AudioFrameBatch, BatchConfig, FrameBatcher};
pub use capture::AudioCapture;
pub use decode::{AudioFragment, DecodedAudio, FragmentDecoder, FragmentFormat, SymphoniaDecoder};
pub use file::{AudioFile, FileBackend};
pub use microphone::{MicrophoneBackend, ProcessingNode};
pub use output::{AudioSink, CpalSink, NullSink};
pub use playback::{AudioPlayback, PlaybackStats};
pub use vad::SilenceGate;
