use super::config::SessionConfig;
use super::coordinator::TurnCoordinator;
use super::renderer::Renderer;
use super::stats::SessionStats;
use crate::audio::{
    AudioBackendFactory, AudioCapture, AudioFragment, AudioFrameBatch, AudioPlayback, AudioSink,
    CpalSink, FragmentFormat, NullSink, SymphoniaDecoder,
};
use crate::error::ClientError;
use crate::transport::{
    ConnectionState, InboundFrame, OutboundMessage, Transport, TransportEvent, TransportSender,
    WsConnector,
};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// User controls, delivered to `ChatSession::run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    StartSpeaking,
    StopSpeaking,
    SendText(String),
    SetForeground(bool),
    Interrupt,
    Quit,
}

/// A chat session that wires capture, transport, turn ordering and playback
/// together.
///
/// All inbound events and user commands are processed by one task, in the
/// order they arrive.
pub struct ChatSession<R: Renderer> {
    /// Session configuration
    config: SessionConfig,

    /// When the session was created
    started_at: chrono::DateTime<chrono::Utc>,

    transport: Transport,

    sender: TransportSender,

    /// Transport events, consumed only here
    events: mpsc::UnboundedReceiver<TransportEvent>,

    capture: AudioCapture,

    /// Owns the renderer and the playback queue
    coordinator: TurnCoordinator<R, AudioPlayback>,

    batches_sent: Arc<AtomicU64>,

    reconnects: u64,

    closed: bool,
}

impl<R: Renderer> ChatSession<R> {
    pub fn new(
        config: SessionConfig,
        (transport, events): (Transport, mpsc::UnboundedReceiver<TransportEvent>),
        capture: AudioCapture,
        playback: AudioPlayback,
        renderer: R,
    ) -> Self {
        info!("Creating chat session: {}", config.session_id);

        let sender = transport.sender();

        Self {
            config,
            started_at: Utc::now(),
            transport,
            sender,
            events,
            capture,
            coordinator: TurnCoordinator::new(renderer, playback),
            batches_sent: Arc::new(AtomicU64::new(0)),
            reconnects: 0,
            closed: false,
        }
    }

    /// Build a session on the real devices and a WebSocket connection
    pub async fn open(config: SessionConfig, renderer: R) -> Result<Self> {
        let backend = AudioBackendFactory::create(config.audio_source.clone(), config.backend.clone())
            .context("Failed to create audio backend")?;
        let capture = AudioCapture::new(backend, config.batch.clone());

        let sink: Arc<dyn AudioSink> = if config.muted {
            Arc::new(NullSink::new())
        } else {
            match CpalSink::open().await {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    warn!("Audio output unavailable, responses will be silent: {:#}", e);
                    Arc::new(NullSink::new())
                }
            }
        };
        let playback = AudioPlayback::new(Arc::new(SymphoniaDecoder), sink);

        let transport = Transport::new(config.transport.clone(), Arc::new(WsConnector));

        Ok(Self::new(config, transport, capture, playback, renderer))
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn coordinator(&self) -> &TurnCoordinator<R, AudioPlayback> {
        &self.coordinator
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_active()
    }

    pub fn connect(&mut self) {
        self.transport.connect();
    }

    /// Stop speaking, close the connection, drop queued audio. Idempotent.
    pub async fn disconnect(&mut self) {
        self.stop_capture().await;
        self.transport.disconnect().await;
        self.discard_pending_events();
        self.coordinator.queue().clear();
        self.coordinator.reset();
    }

    pub fn set_foreground(&mut self, foreground: bool) {
        self.transport.set_foreground(foreground);
    }

    /// Push-to-talk pressed
    pub async fn start_speaking(&mut self) -> Result<(), ClientError> {
        if self.capture.is_active() {
            return Ok(());
        }

        if self.transport.state() != ConnectionState::Connected {
            self.coordinator
                .renderer_mut()
                .show_status("Connect before recording");
            return Ok(());
        }

        self.sender.send(&OutboundMessage::SpeechStart);

        let sender = self.sender.clone();
        let batches_sent = self.batches_sent.clone();
        let on_batch_ready = move |batch: AudioFrameBatch| {
            if sender.send_audio(batch.to_bytes()) {
                batches_sent.fetch_add(1, Ordering::Relaxed);
            }
        };

        match self.capture.start(on_batch_ready).await {
            Ok(()) => {
                info!("[{}] Recording started", self.config.session_id);
                self.coordinator.renderer_mut().recording_changed(true);
                Ok(())
            }
            Err(e) => {
                warn!("[{}] Could not start recording: {}", self.config.session_id, e);
                self.coordinator.renderer_mut().capture_failed(&e);
                self.coordinator.renderer_mut().recording_changed(false);
                Err(e.into())
            }
        }
    }

    /// Push-to-talk released: flush the last batch, then commit the utterance
    pub async fn stop_speaking(&mut self) {
        if !self.capture.is_active() {
            self.capture.stop().await;
            return;
        }

        self.stop_capture().await;
        self.sender.send(&OutboundMessage::SpeechEnd);
    }

    /// Send a typed message. Returns `false` if nothing was sent.
    pub fn send_text(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        if self.sender.send(&OutboundMessage::user_text(text)) {
            self.coordinator.user_text(text);
            true
        } else {
            self.coordinator
                .renderer_mut()
                .show_error("Not connected, message not sent");
            false
        }
    }

    /// Ask the service to stop talking and silence local playback
    pub fn interrupt(&mut self) {
        self.coordinator.queue().clear();
        self.sender.send(&OutboundMessage::Stop);
    }

    pub async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => self.connect(),
            SessionCommand::Disconnect => self.disconnect().await,
            SessionCommand::StartSpeaking => {
                // Already reported through the renderer
                let _ = self.start_speaking().await;
            }
            SessionCommand::StopSpeaking => self.stop_speaking().await,
            SessionCommand::SendText(text) => {
                self.send_text(&text);
            }
            SessionCommand::SetForeground(foreground) => self.set_foreground(foreground),
            SessionCommand::Interrupt => self.interrupt(),
            SessionCommand::Quit => self.shutdown().await,
        }
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                self.coordinator.renderer_mut().connection_state_changed(state);
                if state == ConnectionState::Disconnected && self.capture.is_active() {
                    warn!("[{}] Connection dropped while recording", self.config.session_id);
                    self.stop_capture().await;
                }
            }
            TransportEvent::Opened { resumed } => {
                if resumed {
                    self.reconnects += 1;
                }
                self.coordinator.reset();
            }
            TransportEvent::ReconnectExhausted => {
                self.coordinator.renderer_mut().reconnect_exhausted();
            }
            TransportEvent::Inbound(InboundFrame::Message(message)) => {
                self.coordinator.handle(message);
            }
            TransportEvent::Inbound(InboundFrame::Audio(bytes)) => {
                let format = FragmentFormat::Pcm16 {
                    sample_rate: self.config.binary_sample_rate,
                };
                self.coordinator.queue().enqueue(AudioFragment::from_bytes(bytes, format));
            }
        }
    }

    /// Process the next transport event; `false` once the channel is closed
    pub async fn process_next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Event loop: runs until `Quit` or the command channel closes
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> SessionStats {
        info!("[{}] Session running", self.config.session_id);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },

                command = commands.recv() => match command {
                    Some(SessionCommand::Quit) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        self.shutdown().await;
        self.stats()
    }

    /// Release every resource. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        info!("[{}] Shutting down session", self.config.session_id);

        self.disconnect().await;
        self.coordinator.queue_mut().shutdown().await;
    }

    pub fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let playback = self.coordinator.queue().stats();

        SessionStats {
            session_id: self.config.session_id.clone(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            is_recording: self.capture.is_active(),
            turns_completed: self.coordinator.turns_completed(),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            fragments_played: playback.played,
            fragments_skipped: playback.skipped,
            reconnects: self.reconnects,
        }
    }

    /// Frames the connection delivered before it closed belong to the old
    /// conversation; only state changes still reach the renderer.
    fn discard_pending_events(&mut self) {
        let mut dropped = 0usize;
        while let Ok(event) = self.events.try_recv() {
            match event {
                TransportEvent::StateChanged(state) => {
                    self.coordinator.renderer_mut().connection_state_changed(state)
                }
                TransportEvent::ReconnectExhausted => self.coordinator.renderer_mut().reconnect_exhausted(),
                TransportEvent::Opened { .. } | TransportEvent::Inbound(_) => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!("[{}] Discarded {} events from the closed connection", self.config.session_id, dropped);
        }
    }

    async fn stop_capture(&mut self) {
        let was_active = self.capture.is_active();
        self.capture.stop().await;
        if was_active {
            self.coordinator.renderer_mut().recording_changed(false);
        }
    }
}
