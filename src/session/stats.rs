use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Whether the microphone is currently streaming
    pub is_recording: bool,

    /// Completed user/assistant exchanges
    pub turns_completed: u64,

    /// Audio batches handed to the transport
    pub batches_sent: u64,

    pub fragments_played: u64,

    /// Fragments that failed to decode or play
    pub fragments_skipped: u64,

    /// Successful re-opens after the first connection
    pub reconnects: u64,
}
