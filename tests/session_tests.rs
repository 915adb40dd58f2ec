// End-to-end tests for ChatSession
//
// Real capture batching (file backend), real transport task (in-memory
// socket), real decoder, null output device.

mod common;

use anyhow::Result;
use common::{MockConnector, Script, ServerEnd};
use nutri_voice::audio::{
    AudioBackend, AudioCapture, AudioFrame, AudioPlayback, FileBackend, NullSink, SymphoniaDecoder,
};
use nutri_voice::session::{ChatSession, MemoryRenderer, SessionCommand, SessionConfig, Speaker};
use nutri_voice::transport::{ConnectionState, Transport};
use nutri_voice::CaptureError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

fn speech(len: usize) -> Vec<f32> {
    (0..len).map(|i| if i % 2 == 0 { 0.3 } else { -0.3 }).collect()
}

struct Harness {
    session: ChatSession<MemoryRenderer>,
    renderer: MemoryRenderer,
    connector: Arc<MockConnector>,
    servers: mpsc::UnboundedReceiver<ServerEnd>,
}

fn harness_with_backend(script: Vec<Script>, backend: Box<dyn AudioBackend>) -> Harness {
    let config = SessionConfig::default();
    let (connector, servers) = MockConnector::new(script);
    let connector = Arc::new(connector);

    let transport = Transport::new(config.transport.clone(), connector.clone());
    let capture = AudioCapture::new(backend, config.batch.clone());
    let playback = AudioPlayback::new(Arc::new(SymphoniaDecoder), Arc::new(NullSink::new()));
    let renderer = MemoryRenderer::new();

    let session = ChatSession::new(config, transport, capture, playback, renderer.clone());

    Harness {
        session,
        renderer,
        connector,
        servers,
    }
}

fn harness(script: Vec<Script>) -> Harness {
    let backend = FileBackend::from_samples(speech(7200), SessionConfig::default().backend);
    harness_with_backend(script, Box::new(backend))
}

/// Process transport events until none arrive for a short while
async fn settle(session: &mut ChatSession<MemoryRenderer>) {
    while let Ok(true) =
        tokio::time::timeout(Duration::from_millis(50), session.process_next_event()).await
    {}
}

async fn connected(h: &mut Harness) -> ServerEnd {
    h.session.connect();
    settle(&mut h.session).await;
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);
    h.servers.recv().await.expect("server end")
}

#[tokio::test(start_paused = true)]
async fn test_voice_turn_end_to_end() -> Result<()> {
    let mut h = harness(vec![Script::Accept]);
    let mut server = connected(&mut h).await;

    h.session.start_speaking().await?;
    assert!(h.session.is_recording());
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.session.stop_speaking().await;
    assert!(!h.session.is_recording());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let written = server.drain();
    assert_eq!(written.first(), Some(&Message::Text(r#"{"type":"speech_start"}"#.to_string())));
    assert_eq!(written.last(), Some(&Message::Text(r#"{"type":"speech_end"}"#.to_string())));

    let audio_bytes: usize = written
        .iter()
        .filter_map(|m| match m {
            Message::Binary(b) => Some(b.len()),
            _ => None,
        })
        .sum();
    assert_eq!(audio_bytes, 7200 * 2, "every captured sample sent as PCM16");

    // Assistant answer streams in before the transcript is final
    server.send_json(r#"{"type":"input_audio_buffer_committed"}"#);
    server.send_json(r#"{"type":"text_delta","content":"Try "}"#);
    server.send_json(r#"{"type":"text_delta","content":"lentils."}"#);
    server.send_json(r#"{"type":"input_audio_transcript_delta","content":"protein ideas?"}"#);
    server.send_json(r#"{"type":"input_audio_transcript_done"}"#);
    server.send_json(r#"{"type":"text_done"}"#);
    settle(&mut h.session).await;

    let transcript = h.renderer.snapshot();
    let order: Vec<(Speaker, &str)> = transcript
        .bubbles
        .iter()
        .map(|b| (b.speaker, b.text.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![(Speaker::User, "protein ideas?"), (Speaker::Assistant, "Try lentils.")]
    );
    assert_eq!(transcript.recording, vec![true, false]);

    let stats = h.session.stats();
    assert_eq!(stats.turns_completed, 1);
    assert!(stats.batches_sent >= 3);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_typed_message() -> Result<()> {
    let mut h = harness(vec![Script::Accept]);

    assert!(!h.session.send_text("hello"), "not connected yet");
    assert_eq!(h.renderer.snapshot().errors.len(), 1);

    let mut server = connected(&mut h).await;
    assert!(!h.session.send_text("   "));
    assert!(h.session.send_text("what should I eat after a run?"));

    let sent = server.recv_text(Duration::from_secs(1)).await;
    assert_eq!(
        sent.as_deref(),
        Some(r#"{"type":"user_text_message","text":"what should I eat after a run?"}"#)
    );
    assert_eq!(
        h.renderer.snapshot().texts(Speaker::User),
        vec!["what should I eat after a run?"]
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_binary_audio_is_played_and_bad_chunks_skipped() -> Result<()> {
    let mut h = harness(vec![Script::Accept]);
    let server = connected(&mut h).await;

    server.send_binary(vec![0u8; 4800]);
    server.send_json(r#"{"type":"audio_chunk","audio":"%%%"}"#);
    server.send_binary(vec![0u8; 480]);
    settle(&mut h.session).await;
    h.session.coordinator().queue().wait_idle().await;

    let stats = h.session.stats();
    assert_eq!(stats.fragments_played, 2);
    assert_eq!(stats.fragments_skipped, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_discards_frames_already_received() -> Result<()> {
    let mut h = harness(vec![Script::Accept]);
    let server = connected(&mut h).await;

    server.send_binary(vec![0u8; 4800]);
    server.send_json(r#"{"type":"text_delta","content":"Oats are"}"#);
    // Connection task queues both frames; the session has not looked at them yet
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.session.disconnect().await;
    settle(&mut h.session).await;
    h.session.coordinator().queue().wait_idle().await;

    assert_eq!(h.session.stats().fragments_played, 0);
    let transcript = h.renderer.snapshot();
    assert!(transcript.bubbles.is_empty());
    assert_eq!(transcript.states.last(), Some(&ConnectionState::Disconnected));
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_server_error_and_status_surface() -> Result<()> {
    let mut h = harness(vec![Script::Accept]);
    let server = connected(&mut h).await;

    server.send_json(r#"{"type":"status","message":"Estimating meal..."}"#);
    server.send_json(r#"{"type":"error","message":"API error: timeout"}"#);
    settle(&mut h.session).await;

    let transcript = h.renderer.snapshot();
    assert_eq!(transcript.statuses, vec!["Estimating meal...".to_string()]);
    assert_eq!(transcript.errors, vec!["API error: timeout".to_string()]);
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhausted_reaches_renderer() -> Result<()> {
    let mut h = harness(vec![Script::Accept]);
    let server = connected(&mut h).await;

    drop(server);
    for _ in 0..40 {
        settle(&mut h.session).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let transcript = h.renderer.snapshot();
    assert!(transcript.reconnect_exhausted);
    assert_eq!(transcript.states.last(), Some(&ConnectionState::Disconnected));
    assert_eq!(h.connector.calls().len(), 6);

    Ok(())
}

struct MissingMicrophone;

#[async_trait::async_trait]
impl AudioBackend for MissingMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        Err(CaptureError::Device("no input device available".to_string()))
    }

    async fn stop(&mut self) {}

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "missing"
    }
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_is_reported_and_recoverable() -> Result<()> {
    let mut h = harness_with_backend(vec![Script::Accept], Box::new(MissingMicrophone));
    let _server = connected(&mut h).await;

    let result = h.session.start_speaking().await;
    assert!(result.is_err());
    assert!(!h.session.is_recording());

    let transcript = h.renderer.snapshot();
    assert_eq!(
        transcript.capture_errors,
        vec![CaptureError::Device("no input device available".to_string())]
    );
    assert_eq!(transcript.recording, vec![false]);

    // Stop from the error path is harmless
    h.session.stop_speaking().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_run_until_quit_then_teardown_is_idempotent() -> Result<()> {
    let mut h = harness(vec![Script::Accept]);
    h.session.connect();

    let (commands_tx, commands_rx) = mpsc::channel(8);
    let task = tokio::spawn(h.session.run(commands_rx));

    let mut server = h.servers.recv().await.expect("server end");
    commands_tx.send(SessionCommand::StartSpeaking).await?;
    commands_tx.send(SessionCommand::Disconnect).await?;
    commands_tx.send(SessionCommand::Disconnect).await?;
    commands_tx.send(SessionCommand::Quit).await?;

    let stats = task.await?;
    assert!(!stats.is_recording);

    let written = server.drain();
    assert_eq!(written.last(), Some(&Message::Close(None)));
    assert_eq!(h.connector.calls().len(), 1);

    Ok(())
}
