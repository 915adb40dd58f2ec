use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::error::CaptureError;
use crate::transport::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::User => write!(f, "you"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// Handle to a rendered chat bubble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BubbleRef(pub u64);

/// Render layer for the chat transcript and session controls.
///
/// Only the bubble operations and `show_error` are required; the rest
/// default to doing nothing.
pub trait Renderer: Send {
    fn create_bubble(&mut self, speaker: Speaker, text: &str) -> BubbleRef;

    fn append_to_bubble(&mut self, bubble: BubbleRef, text: &str);

    fn show_error(&mut self, message: &str);

    fn show_status(&mut self, _message: &str) {}

    fn connection_state_changed(&mut self, _state: ConnectionState) {}

    /// Automatic reconnection gave up
    fn reconnect_exhausted(&mut self) {}

    fn capture_failed(&mut self, _error: &CaptureError) {}

    fn recording_changed(&mut self, _recording: bool) {}
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn create_bubble(&mut self, speaker: Speaker, text: &str) -> BubbleRef {
        (**self).create_bubble(speaker, text)
    }

    fn append_to_bubble(&mut self, bubble: BubbleRef, text: &str) {
        (**self).append_to_bubble(bubble, text)
    }

    fn show_error(&mut self, message: &str) {
        (**self).show_error(message)
    }

    fn show_status(&mut self, message: &str) {
        (**self).show_status(message)
    }

    fn connection_state_changed(&mut self, state: ConnectionState) {
        (**self).connection_state_changed(state)
    }

    fn reconnect_exhausted(&mut self) {
        (**self).reconnect_exhausted()
    }

    fn capture_failed(&mut self, error: &CaptureError) {
        (**self).capture_failed(error)
    }

    fn recording_changed(&mut self, recording: bool) {
        (**self).recording_changed(recording)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble {
    pub speaker: Speaker,
    pub text: String,
}

/// Everything a `MemoryRenderer` has been told
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub bubbles: Vec<Bubble>,
    pub errors: Vec<String>,
    pub statuses: Vec<String>,
    pub states: Vec<ConnectionState>,
    pub reconnect_exhausted: bool,
    pub capture_errors: Vec<CaptureError>,
    pub recording: Vec<bool>,
}

impl Transcript {
    pub fn texts(&self, speaker: Speaker) -> Vec<&str> {
        self.bubbles
            .iter()
            .filter(|b| b.speaker == speaker)
            .map(|b| b.text.as_str())
            .collect()
    }
}

/// Keeps the transcript in memory; clones share the same transcript
#[derive(Debug, Clone, Default)]
pub struct MemoryRenderer {
    inner: Arc<Mutex<Transcript>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Transcript {
        self.inner.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Transcript) -> T) -> Option<T> {
        self.inner.lock().ok().map(|mut t| f(&mut t))
    }
}

impl Renderer for MemoryRenderer {
    fn create_bubble(&mut self, speaker: Speaker, text: &str) -> BubbleRef {
        let id = self
            .with(|t| {
                t.bubbles.push(Bubble {
                    speaker,
                    text: text.to_string(),
                });
                t.bubbles.len() as u64 - 1
            })
            .unwrap_or(u64::MAX);
        BubbleRef(id)
    }

    fn append_to_bubble(&mut self, bubble: BubbleRef, text: &str) {
        self.with(|t| {
            if let Some(b) = t.bubbles.get_mut(bubble.0 as usize) {
                b.text.push_str(text);
            }
        });
    }

    fn show_error(&mut self, message: &str) {
        self.with(|t| t.errors.push(message.to_string()));
    }

    fn show_status(&mut self, message: &str) {
        self.with(|t| t.statuses.push(message.to_string()));
    }

    fn connection_state_changed(&mut self, state: ConnectionState) {
        self.with(|t| t.states.push(state));
    }

    fn reconnect_exhausted(&mut self) {
        self.with(|t| t.reconnect_exhausted = true);
    }

    fn capture_failed(&mut self, error: &CaptureError) {
        self.with(|t| t.capture_errors.push(error.clone()));
    }

    fn recording_changed(&mut self, recording: bool) {
        self.with(|t| t.recording.push(recording));
    }
}

/// Terminal transcript. Appends to the most recent bubble stream inline;
/// appends to an older bubble reprint it.
#[derive(Debug, Default)]
pub struct ConsoleRenderer {
    bubbles: Vec<Bubble>,
    last_printed: Option<BubbleRef>,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn line(&mut self, text: &str) {
        if self.last_printed.take().is_some() {
            println!();
        }
        println!("{}", text);
    }
}

impl Renderer for ConsoleRenderer {
    fn create_bubble(&mut self, speaker: Speaker, text: &str) -> BubbleRef {
        let bubble = BubbleRef(self.bubbles.len() as u64);
        self.bubbles.push(Bubble {
            speaker,
            text: text.to_string(),
        });

        if self.last_printed.is_some() {
            println!();
        }
        print!("[{}] {}", speaker, text);
        let _ = std::io::stdout().flush();
        self.last_printed = Some(bubble);

        bubble
    }

    fn append_to_bubble(&mut self, bubble: BubbleRef, text: &str) {
        let Some(entry) = self.bubbles.get_mut(bubble.0 as usize) else {
            return;
        };
        entry.text.push_str(text);

        if self.last_printed == Some(bubble) {
            print!("{}", text);
        } else {
            if self.last_printed.is_some() {
                println!();
            }
            print!("[{}] {}", entry.speaker, entry.text);
            self.last_printed = Some(bubble);
        }
        let _ = std::io::stdout().flush();
    }

    fn show_error(&mut self, message: &str) {
        self.line(&format!("!! {}", message));
    }

    fn show_status(&mut self, message: &str) {
        self.line(&format!("-- {}", message));
    }

    fn connection_state_changed(&mut self, state: ConnectionState) {
        let label = match state {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting...",
            ConnectionState::Connected => "connected",
        };
        self.line(&format!("-- {}", label));
    }

    fn reconnect_exhausted(&mut self) {
        self.line("!! Connection lost. Restart the client or type /connect to try again.");
    }

    fn capture_failed(&mut self, error: &CaptureError) {
        let hint = match error {
            CaptureError::Permission(_) => "Microphone access was denied. Check system permissions.",
            CaptureError::Device(_) => "No usable microphone was found.",
            CaptureError::AlreadyRunning => "Already recording.",
        };
        self.line(&format!("!! {} ({})", hint, error));
    }

    fn recording_changed(&mut self, recording: bool) {
        self.line(if recording {
            "-- recording, /stop to send"
        } else {
            "-- recording stopped"
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_renderer_clones_share_transcript() {
        let renderer = MemoryRenderer::new();
        let mut writer = renderer.clone();

        let bubble = writer.create_bubble(Speaker::Assistant, "Hel");
        writer.append_to_bubble(bubble, "lo");
        writer.show_error("boom");

        let transcript = renderer.snapshot();
        assert_eq!(transcript.texts(Speaker::Assistant), vec!["Hello"]);
        assert_eq!(transcript.errors, vec!["boom".to_string()]);
    }
}
