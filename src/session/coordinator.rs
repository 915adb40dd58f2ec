use tracing::{debug, info};

use super::renderer::{BubbleRef, Renderer, Speaker};
use crate::audio::{AudioFragment, AudioPlayback};
use crate::transport::InboundMessage;

/// Destination for assistant audio fragments
pub trait FragmentQueue: Send {
    fn enqueue(&self, fragment: AudioFragment);
}

impl FragmentQueue for AudioPlayback {
    fn enqueue(&self, fragment: AudioFragment) {
        AudioPlayback::enqueue(self, fragment)
    }
}

/// Assistant text that arrived before the user's transcript was final
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingAssistant {
    pub content: String,
    /// The assistant already signalled `text_done`
    pub done: bool,
}

/// Orders and attributes inbound conversation events.
///
/// The service may stream the assistant's answer before it has finished
/// transcribing what the user said. Assistant text is held back until the
/// user transcript is final so that bubbles always appear in
/// user-then-assistant order.
pub struct TurnCoordinator<R, Q> {
    renderer: R,
    queue: Q,
    user_transcript_finalized: bool,
    pending_assistant: Option<PendingAssistant>,
    active_user_bubble: Option<BubbleRef>,
    active_assistant_bubble: Option<BubbleRef>,
    turns_completed: u64,
}

impl<R: Renderer, Q: FragmentQueue> TurnCoordinator<R, Q> {
    pub fn new(renderer: R, queue: Q) -> Self {
        Self {
            renderer,
            queue,
            user_transcript_finalized: true,
            pending_assistant: None,
            active_user_bubble: None,
            active_assistant_bubble: None,
            turns_completed: 0,
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    pub fn is_finalized(&self) -> bool {
        self.user_transcript_finalized
    }

    pub fn pending(&self) -> Option<&PendingAssistant> {
        self.pending_assistant.as_ref()
    }

    pub fn active_user_bubble(&self) -> Option<BubbleRef> {
        self.active_user_bubble
    }

    pub fn active_assistant_bubble(&self) -> Option<BubbleRef> {
        self.active_assistant_bubble
    }

    pub fn turns_completed(&self) -> u64 {
        self.turns_completed
    }

    /// Back to the state of a fresh connection. The turn counter survives.
    pub fn reset(&mut self) {
        self.user_transcript_finalized = true;
        self.pending_assistant = None;
        self.active_user_bubble = None;
        self.active_assistant_bubble = None;
    }

    /// Dispatch one inbound message
    pub fn handle(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::InputAudioBufferCommitted => self.buffer_committed(),
            InboundMessage::InputAudioTranscriptDelta { content } => self.user_transcript_delta(&content),
            InboundMessage::InputAudioTranscriptDone => self.user_transcript_done(),
            InboundMessage::TextDelta { content } => self.assistant_text_delta(&content),
            InboundMessage::TextDone => self.assistant_text_done(),
            InboundMessage::AudioChunk { audio, format } => {
                self.audio_chunk(AudioFragment::from_base64(audio, format))
            }
            InboundMessage::Error { message } => self.server_error(&message),
            InboundMessage::Status { message } => self.renderer.show_status(&message),
            InboundMessage::SessionCreated { session_id } => {
                info!(
                    "Service session created{}",
                    session_id.map(|id| format!(": {}", id)).unwrap_or_default()
                );
            }
        }
    }

    /// A new user utterance has begun
    pub fn buffer_committed(&mut self) {
        debug!("User audio committed, holding assistant output");
        self.user_transcript_finalized = false;
        self.pending_assistant = None;
    }

    pub fn user_transcript_delta(&mut self, content: &str) {
        match self.active_user_bubble {
            Some(bubble) => self.renderer.append_to_bubble(bubble, content),
            None => {
                self.active_user_bubble = Some(self.renderer.create_bubble(Speaker::User, content));
            }
        }
    }

    pub fn user_transcript_done(&mut self) {
        self.active_user_bubble = None;

        let pending = self.pending_assistant.take();
        if let Some(buffered) = &pending {
            if !buffered.content.is_empty() {
                debug!("Flushing {} buffered assistant bytes", buffered.content.len());
                self.write_assistant(&buffered.content);
            }
        }

        self.user_transcript_finalized = true;

        if pending.is_some_and(|p| p.done) {
            self.complete_turn();
        }
    }

    pub fn assistant_text_delta(&mut self, content: &str) {
        if !self.user_transcript_finalized {
            self.pending_assistant
                .get_or_insert_with(PendingAssistant::default)
                .content
                .push_str(content);
            return;
        }

        if self.active_assistant_bubble.is_none() {
            if let Some(buffered) = self.pending_assistant.take() {
                if !buffered.content.is_empty() {
                    self.write_assistant(&buffered.content);
                }
            }
        }

        self.write_assistant(content);
    }

    pub fn assistant_text_done(&mut self) {
        if self.user_transcript_finalized {
            self.pending_assistant = None;
            self.complete_turn();
        } else {
            self.pending_assistant
                .get_or_insert_with(PendingAssistant::default)
                .done = true;
        }
    }

    pub fn audio_chunk(&mut self, fragment: AudioFragment) {
        self.queue.enqueue(fragment);
    }

    pub fn server_error(&mut self, message: &str) {
        self.active_user_bubble = None;
        self.active_assistant_bubble = None;
        self.renderer.show_error(message);
    }

    /// Typed input: a closed user bubble that opens a new turn
    pub fn user_text(&mut self, text: &str) {
        self.renderer.create_bubble(Speaker::User, text);
        self.active_user_bubble = None;
        self.active_assistant_bubble = None;
        self.pending_assistant = None;
        self.user_transcript_finalized = true;
    }

    /// Append to the open assistant bubble, opening one when needed. Empty
    /// text never opens a bubble.
    fn write_assistant(&mut self, text: &str) {
        match self.active_assistant_bubble {
            Some(bubble) => self.renderer.append_to_bubble(bubble, text),
            None if text.is_empty() => {}
            None => {
                self.active_assistant_bubble =
                    Some(self.renderer.create_bubble(Speaker::Assistant, text));
            }
        }
    }

    fn complete_turn(&mut self) {
        self.active_assistant_bubble = None;
        self.turns_completed += 1;
        debug!("Turn {} complete", self.turns_completed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FragmentFormat;
    use crate::session::MemoryRenderer;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collected(Mutex<Vec<AudioFragment>>);

    impl FragmentQueue for Collected {
        fn enqueue(&self, fragment: AudioFragment) {
            if let Ok(mut v) = self.0.lock() {
                v.push(fragment);
            }
        }
    }

    fn coordinator() -> (TurnCoordinator<MemoryRenderer, Collected>, MemoryRenderer) {
        let renderer = MemoryRenderer::new();
        (TurnCoordinator::new(renderer.clone(), Collected::default()), renderer)
    }

    #[test]
    fn test_assistant_text_buffered_until_transcript_done() {
        let (mut turns, renderer) = coordinator();

        turns.buffer_committed();
        turns.assistant_text_delta("A");
        turns.assistant_text_delta("B");
        assert!(renderer.snapshot().bubbles.is_empty());

        turns.user_transcript_delta("hi there");
        turns.user_transcript_done();

        let transcript = renderer.snapshot();
        assert_eq!(transcript.texts(Speaker::User), vec!["hi there"]);
        assert_eq!(transcript.texts(Speaker::Assistant), vec!["AB"]);
        assert_eq!(transcript.bubbles[0].speaker, Speaker::User);
        assert!(turns.active_assistant_bubble().is_some(), "turn still open");
        assert!(turns.pending().is_none());
    }

    #[test]
    fn test_early_completion_closes_turn_on_transcript_done() {
        let (mut turns, renderer) = coordinator();

        turns.buffer_committed();
        turns.assistant_text_delta("X");
        turns.assistant_text_done();
        turns.user_transcript_done();

        assert_eq!(renderer.snapshot().texts(Speaker::Assistant), vec!["X"]);
        assert!(turns.active_assistant_bubble().is_none());
        assert_eq!(turns.turns_completed(), 1);
    }

    #[test]
    fn test_done_before_any_delta_creates_empty_done_buffer() {
        let (mut turns, renderer) = coordinator();

        turns.buffer_committed();
        turns.assistant_text_done();
        assert_eq!(
            turns.pending(),
            Some(&PendingAssistant {
                content: String::new(),
                done: true
            })
        );

        turns.user_transcript_done();
        assert!(renderer.snapshot().texts(Speaker::Assistant).is_empty());
        assert_eq!(turns.turns_completed(), 1);
    }

    #[test]
    fn test_deltas_after_finalize_stream_into_one_bubble() {
        let (mut turns, renderer) = coordinator();

        turns.assistant_text_delta("Eat ");
        turns.assistant_text_delta("more greens");
        turns.assistant_text_done();
        turns.assistant_text_delta("Next");

        assert_eq!(
            renderer.snapshot().texts(Speaker::Assistant),
            vec!["Eat more greens", "Next"]
        );
    }

    #[test]
    fn test_buffered_prefix_then_live_delta() {
        let (mut turns, renderer) = coordinator();

        // Finalized with a leftover buffer and no open assistant bubble
        turns.pending_assistant = Some(PendingAssistant {
            content: "Hel".to_string(),
            done: false,
        });
        turns.user_transcript_finalized = true;
        turns.assistant_text_delta("lo");

        assert_eq!(renderer.snapshot().texts(Speaker::Assistant), vec!["Hello"]);
        assert!(turns.pending().is_none());
    }

    #[test]
    fn test_commit_discards_stale_buffer() {
        let (mut turns, renderer) = coordinator();

        turns.buffer_committed();
        turns.assistant_text_delta("stale");
        turns.buffer_committed();
        turns.assistant_text_delta("fresh");
        turns.user_transcript_done();

        assert_eq!(renderer.snapshot().texts(Speaker::Assistant), vec!["fresh"]);
    }

    #[test]
    fn test_server_error_clears_bubbles_keeps_finalized() {
        let (mut turns, renderer) = coordinator();

        turns.buffer_committed();
        turns.user_transcript_delta("what about");
        turns.server_error("API error: rate limited");

        assert!(turns.active_user_bubble().is_none());
        assert!(turns.active_assistant_bubble().is_none());
        assert!(!turns.is_finalized());
        assert_eq!(renderer.snapshot().errors, vec!["API error: rate limited".to_string()]);
    }

    #[test]
    fn test_audio_chunk_does_not_touch_text_state() {
        let (mut turns, _renderer) = coordinator();

        turns.buffer_committed();
        turns.assistant_text_delta("A");
        turns.handle(InboundMessage::AudioChunk {
            audio: "AAAA".to_string(),
            format: FragmentFormat::Mp3,
        });

        assert_eq!(turns.queue().0.lock().map(|v| v.len()).unwrap_or(0), 1);
        assert!(!turns.is_finalized());
        assert_eq!(turns.pending().map(|p| p.content.as_str()), Some("A"));
    }

    #[test]
    fn test_typed_text_opens_turn() {
        let (mut turns, renderer) = coordinator();

        turns.buffer_committed();
        turns.assistant_text_delta("stale");
        turns.user_text("how much protein?");
        turns.assistant_text_delta("About 60g");

        let transcript = renderer.snapshot();
        assert_eq!(transcript.texts(Speaker::User), vec!["how much protein?"]);
        assert_eq!(transcript.texts(Speaker::Assistant), vec!["About 60g"]);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let (mut turns, _renderer) = coordinator();

        turns.buffer_committed();
        turns.user_transcript_delta("half");
        turns.assistant_text_delta("buffered");
        turns.reset();

        assert!(turns.is_finalized());
        assert!(turns.pending().is_none());
        assert!(turns.active_user_bubble().is_none());
        assert!(turns.active_assistant_bubble().is_none());
    }
}
