pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioCapture, AudioFile, AudioFragment,
    AudioFrame, AudioFrameBatch, AudioPlayback, AudioSource, FragmentFormat,
};
pub use config::Config;
pub use error::{CaptureError, ClientError, DecodeError, ProtocolError, TransportError};
pub use session::{ChatSession, Renderer, SessionCommand, SessionConfig, SessionStats, TurnCoordinator};
pub use transport::{ConnectionState, InboundMessage, OutboundMessage, Transport, TransportEvent};
