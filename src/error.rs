//! Error taxonomy for the client.
//!
//! Each layer owns its error enum; `ClientError` collects them for callers
//! that sit above more than one layer.

use thiserror::Error;

/// Failures while acquiring or running the capture device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or the OS refused microphone access
    #[error("microphone access denied: {0}")]
    Permission(String),

    /// No usable input device, or the device rejected every format we tried
    #[error("audio device unavailable: {0}")]
    Device(String),

    /// `start` was called while capture is already running
    #[error("capture already running")]
    AlreadyRunning,
}

/// An audio fragment that could not be turned into samples.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty audio fragment")]
    Empty,

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("odd byte count {0} for PCM16 fragment")]
    OddPcmLength(usize),

    #[error("unsupported fragment: {0}")]
    Unsupported(String),

    #[error("codec error: {0}")]
    Codec(#[from] symphonia::core::errors::Error),
}

/// A single inbound text frame that did not match the wire protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("message without a type field")]
    MissingType,
}

/// Connection-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("connection attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors surfaced by the session layer.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Connection(#[from] TransportError),

    /// Explicit error message pushed by the upstream service
    #[error("server error: {0}")]
    Server(String),
}
