use futures::{Sink, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use crate::error::TransportError;

/// Write half of an open socket
pub type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Read half of an open socket
pub type WsStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Opens duplex connections to the service.
///
/// The production connector dials a real WebSocket; tests hand back
/// in-memory channel pairs.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(WsSink, WsStream), TransportError>;
}

/// tokio-tungstenite client (ws:// and wss://)
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(WsSink, WsStream), TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        debug!("WebSocket handshake completed ({})", response.status());

        let (sink, stream) = ws_stream.split();
        let sink: WsSink = Box::pin(sink);
        let stream: WsStream = Box::pin(stream);
        Ok((sink, stream))
    }
}
