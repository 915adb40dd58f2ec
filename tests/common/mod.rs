// Shared helpers for transport and session integration tests
//
// `MockConnector` hands out in-memory sockets. Each accepted connection
// yields a `ServerEnd` the test uses to play the companion service.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use nutri_voice::transport::{Connector, TransportEvent, WsSink, WsStream};
use nutri_voice::TransportError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub enum Script {
    Accept,
    Refuse,
    /// Never completes the handshake
    Hang,
}

pub struct ServerEnd {
    to_client: fmpsc::UnboundedSender<Result<Message, WsError>>,
    from_client: fmpsc::UnboundedReceiver<Message>,
}

impl ServerEnd {
    pub fn send_json(&self, json: &str) {
        let _ = self.to_client.unbounded_send(Ok(Message::Text(json.to_string())));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.to_client.unbounded_send(Ok(Message::Binary(bytes)));
    }

    pub fn send_raw(&self, message: Message) {
        let _ = self.to_client.unbounded_send(Ok(message));
    }

    /// Next frame the client wrote, if one arrives within `within`
    pub async fn recv(&mut self, within: Duration) -> Option<Message> {
        tokio::time::timeout(within, self.from_client.next())
            .await
            .ok()
            .flatten()
    }

    /// Next text frame, skipping binary audio and control frames
    pub async fn recv_text(&mut self, within: Duration) -> Option<String> {
        let deadline = Instant::now() + within;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv(remaining).await? {
                Message::Text(text) => return Some(text),
                _ => continue,
            }
        }
    }

    /// Drain everything the client has written so far
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(Some(message)) = self.from_client.try_next() {
            out.push(message);
        }
        out
    }
}

pub struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<Instant>>,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl MockConnector {
    /// Connections beyond the script are refused
    pub fn new(script: Vec<Script>) -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, servers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            servers,
        };
        (connector, servers_rx)
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn push(&self, step: Script) {
        self.script.lock().unwrap().push_back(step);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<(WsSink, WsStream), TransportError> {
        self.calls.lock().unwrap().push(Instant::now());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Refuse);

        match step {
            Script::Accept => {
                let (to_client, client_rx) = fmpsc::unbounded();
                let (client_tx, from_client) = fmpsc::unbounded();
                let _ = self.servers.send(ServerEnd {
                    to_client,
                    from_client,
                });

                let sink: WsSink = Box::pin(client_tx.sink_map_err(|_| WsError::ConnectionClosed));
                let stream: WsStream = Box::pin(client_rx);
                Ok((sink, stream))
            }
            Script::Refuse => Err(TransportError::ConnectFailed {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
            Script::Hang => std::future::pending().await,
        }
    }
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(120), events.recv())
        .await
        .ok()
        .flatten()
        .expect("transport event")
}

/// Skip events until one matches
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    wanted: impl Fn(&TransportEvent) -> bool,
) -> TransportEvent {
    loop {
        let event = next_event(events).await;
        if wanted(&event) {
            return event;
        }
    }
}
