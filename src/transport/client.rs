use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{ConnectionAttempt, ReconnectPolicy};
use super::messages::{InboundFrame, InboundMessage, OutboundMessage};
use super::socket::{Connector, WsSink, WsStream};
use crate::config::Config;
use crate::error::TransportError;

/// Exactly one of these at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything the transport reports, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    /// A connection was established; `resumed` is true for every open after
    /// the first one
    Opened { resumed: bool },
    /// Automatic reconnection gave up; only a manual connect helps now
    ReconnectExhausted,
    Inbound(InboundFrame),
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub url: String,
    pub connect_timeout: Duration,
    /// `None` disables pings
    pub keepalive_interval: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl TransportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.service.url.clone(),
            connect_timeout: config.transport.connect_timeout(),
            keepalive_interval: config.transport.keepalive_interval(),
            reconnect: config.transport.reconnect_policy(),
        }
    }
}

/// State shared between the owner, its senders and the connection task
struct Shared {
    state: Mutex<ConnectionState>,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    foreground: AtomicBool,
    opened_before: AtomicBool,
    attempts: AtomicU32,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Changes are announced while the lock is held so that state events
    /// never overtake each other
    fn set_state(&self, next: ConnectionState) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if *state != next {
            debug!("Connection state {:?} -> {:?}", *state, next);
            *state = next;
            let _ = self.events.send(TransportEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<Message>>) {
        if let Ok(mut outbound) = self.outbound.lock() {
            *outbound = tx;
        }
    }

    fn push(&self, message: Message) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        self.outbound
            .lock()
            .ok()
            .and_then(|outbound| outbound.as_ref().map(|tx| tx.send(message).is_ok()))
            .unwrap_or(false)
    }
}

/// Cloneable send side of a `Transport`
#[derive(Clone)]
pub struct TransportSender {
    shared: Arc<Shared>,
}

impl TransportSender {
    /// Queue a control / text message. Returns `false` when not connected.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize outbound message: {}", e);
                return false;
            }
        };

        let sent = self.shared.push(Message::Text(json));
        if !sent {
            warn!("Not connected, dropping outbound {:?}", message);
        }
        sent
    }

    /// Queue one binary PCM16 batch. Returns `false` when not connected.
    pub fn send_audio(&self, pcm: Vec<u8>) -> bool {
        let len = pcm.len();
        let sent = self.shared.push(Message::Binary(pcm));
        if !sent {
            debug!("Not connected, dropping {} bytes of audio", len);
        }
        sent
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }
}

/// Owner of the single duplex connection to the service.
///
/// Every state change and inbound frame is delivered on the event channel
/// returned by `new`, in the order it happened.
pub struct Transport {
    options: TransportOptions,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    user_disconnected: bool,
}

impl Transport {
    pub fn new(
        options: TransportOptions,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Disconnected),
            events: events_tx,
            outbound: Mutex::new(None),
            foreground: AtomicBool::new(true),
            opened_before: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        });

        let transport = Self {
            options,
            connector,
            shared,
            cancel: None,
            task: None,
            user_disconnected: false,
        };

        (transport, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn sender(&self) -> TransportSender {
        TransportSender {
            shared: self.shared.clone(),
        }
    }

    pub fn send(&self, message: &OutboundMessage) -> bool {
        self.sender().send(message)
    }

    /// Retries scheduled since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Open the connection. No-op while connected or connecting; replaces a
    /// pending scheduled reconnect.
    pub fn connect(&mut self) {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                debug!("connect() ignored, already {:?}", self.state());
                return;
            }
            ConnectionState::Disconnected => {}
        }

        self.abort_task();
        self.user_disconnected = false;

        let cancel = CancellationToken::new();
        self.shared.set_state(ConnectionState::Connecting);

        info!("Connecting to {}", self.options.url);

        let task = ConnectionTask {
            options: self.options.clone(),
            connector: self.connector.clone(),
            shared: self.shared.clone(),
            cancel: cancel.clone(),
        };

        self.cancel = Some(cancel);
        self.task = Some(tokio::spawn(task.run()));
    }

    /// User-initiated close: no automatic reconnect follows. Idempotent.
    pub async fn disconnect(&mut self) {
        self.user_disconnected = true;

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Connection task ended abnormally: {}", e);
                }
            }
            info!("Disconnected from {}", self.options.url);
        }

        self.shared.set_outbound(None);
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Background defers reconnects; coming back to the foreground with no
    /// open connection starts a fresh connect cycle.
    pub fn set_foreground(&mut self, foreground: bool) {
        let was = self.shared.foreground.swap(foreground, Ordering::SeqCst);
        if !foreground || was {
            return;
        }

        if self.user_disconnected {
            debug!("Foreground regained after manual disconnect, staying offline");
            return;
        }

        if self.state() == ConnectionState::Disconnected {
            info!("Foreground regained without a connection, reconnecting");
            self.shared.attempts.store(0, Ordering::SeqCst);
            self.connect();
        }
    }

    fn abort_task(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.abort_task();
    }
}

enum Ended {
    Cancelled,
    Lost(TransportError),
}

struct ConnectionTask {
    options: TransportOptions,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    async fn run(self) {
        let mut attempt = ConnectionAttempt::immediate(self.options.connect_timeout);

        loop {
            if !attempt.delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(attempt.delay) => {}
                }

                if !self.shared.foreground.load(Ordering::SeqCst) {
                    info!("In background, deferring reconnect attempt {}", attempt.attempt);
                    break;
                }

                attempt.deadline = Instant::now() + self.options.connect_timeout;
                self.shared.set_state(ConnectionState::Connecting);
            }

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                dialed = self.dial(attempt.deadline) => dialed,
            };

            match outcome {
                Ok((sink, stream)) => match self.pump(sink, stream).await {
                    Ended::Cancelled => break,
                    Ended::Lost(e) => warn!("Connection lost: {}", e),
                },
                Err(e) => warn!("Connection attempt failed: {}", e),
            }

            if self.cancel.is_cancelled() {
                break;
            }

            self.shared.set_state(ConnectionState::Disconnected);

            if !self.shared.foreground.load(Ordering::SeqCst) {
                info!("In background, reconnect deferred until foreground");
                break;
            }

            let failed = self.shared.attempts.load(Ordering::SeqCst);
            match ConnectionAttempt::retry(&self.options.reconnect, failed, self.options.connect_timeout) {
                Some(next) => {
                    self.shared.attempts.store(next.attempt, Ordering::SeqCst);
                    info!(
                        "Attempting reconnection {}/{} in {}ms",
                        next.attempt,
                        self.options.reconnect.max_attempts,
                        next.delay.as_millis()
                    );
                    attempt = next;
                }
                None => {
                    warn!(
                        "Giving up after {} reconnection attempts, manual reconnect required",
                        failed
                    );
                    self.shared.emit(TransportEvent::ReconnectExhausted);
                    break;
                }
            }
        }

        debug!("Connection task finished");
    }

    async fn dial(&self, deadline: Instant) -> Result<(WsSink, WsStream), TransportError> {
        match tokio::time::timeout_at(deadline, self.connector.connect(&self.options.url)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.options.connect_timeout)),
        }
    }

    /// Run one open connection until it ends
    async fn pump(&self, mut sink: WsSink, mut stream: WsStream) -> Ended {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        self.shared.attempts.store(0, Ordering::SeqCst);
        let resumed = self.shared.opened_before.swap(true, Ordering::SeqCst);

        if resumed {
            match OutboundMessage::Reconnect.to_json() {
                Ok(json) => {
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        return Ended::Lost(e.into());
                    }
                }
                Err(e) => error!("Failed to serialize reconnect notice: {}", e),
            }
        }

        self.shared.set_outbound(Some(outbound_tx));
        self.shared.set_state(ConnectionState::Connected);
        self.shared.emit(TransportEvent::Opened { resumed });

        info!("Connected to {}{}", self.options.url, if resumed { " (resumed)" } else { "" });

        let mut keepalive = self.options.keepalive_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });

        // Any inbound frame (Pong included) proves the peer is alive
        let mut last_heard = Instant::now();

        let ended = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break Ended::Cancelled;
                }

                Some(message) = outbound_rx.recv() => {
                    if let Err(e) = sink.send(message).await {
                        break Ended::Lost(e.into());
                    }
                }

                frame = stream.next() => {
                    if let Some(Ok(_)) = &frame {
                        last_heard = Instant::now();
                    }
                    match frame {
                        Some(Ok(Message::Text(text))) => self.dispatch_text(&text),
                        Some(Ok(Message::Binary(data))) => {
                            self.shared.emit(TransportEvent::Inbound(InboundFrame::Audio(Bytes::from(data))));
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                break Ended::Lost(e.into());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "closed by server".to_string());
                            break Ended::Lost(TransportError::Closed(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Ended::Lost(e.into()),
                        None => break Ended::Lost(TransportError::Closed("stream ended".to_string())),
                    }
                },

                _ = next_tick(&mut keepalive) => {
                    if let Some(period) = self.options.keepalive_interval {
                        let silent_for = last_heard.elapsed();
                        if silent_for > period * 2 {
                            warn!("No frames from {} for {:?}, dropping connection", self.options.url, silent_for);
                            break Ended::Lost(TransportError::Closed(format!(
                                "peer silent for {}s",
                                silent_for.as_secs()
                            )));
                        }
                    }
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        break Ended::Lost(e.into());
                    }
                }
            }
        };

        self.shared.set_outbound(None);
        ended
    }

    fn dispatch_text(&self, text: &str) {
        match InboundMessage::parse(text) {
            Ok(message) => self
                .shared
                .emit(TransportEvent::Inbound(InboundFrame::Message(message))),
            Err(e) => warn!("Dropping inbound message: {}", e),
        }
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
