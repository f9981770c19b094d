//! Transport seam: how a channel manager reaches the hub.
//!
//! [`WsConnector`] is the production transport (tokio-tungstenite). Other connectors can be
//! plugged in for tests or alternative hosts.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connecting to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("transport send failed: {0}")]
    Send(String),
}

/// What the transport has to say next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the hub.
    Message(String),
    /// The connection ended (close frame or end of stream).
    Closed,
    /// The connection broke.
    Error(String),
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// One live connection. Owned by exactly one channel manager driver.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound event. Must be cancel-safe: dropping the future loses no frame.
    async fn next_event(&mut self) -> TransportEvent;

    /// Best-effort graceful shutdown.
    async fn close(&mut self);
}

/// WebSocket connector over tokio-tungstenite (ws:// and wss://).
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(WsTransport { ws }))
    }
}

struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let Some(msg) = self.ws.next().await else {
                return TransportEvent::Closed;
            };
            match msg {
                Ok(Message::Text(text)) => return TransportEvent::Message(text),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return TransportEvent::Message(text),
                    Err(_) => {
                        log::debug!("hub channel: dropping non-UTF-8 binary frame");
                    }
                },
                Ok(Message::Close(_)) => return TransportEvent::Closed,
                // pings are answered by tungstenite
                Ok(_) => {}
                Err(e) => return TransportEvent::Error(e.to_string()),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            log::debug!("hub channel: close handshake failed: {}", e);
        }
    }
}
