//! WebSocket push transport using tokio-tungstenite.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    realtime::{PushConnection, PushTransport},
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

/// Opens WebSocket connections for the status channel.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>> {
        info!(url = %url, "Opening push connection");
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("WebSocket connect: {}", e)))?;

        Ok(Box::new(TungsteniteConnection {
            stream,
            closed: false,
        }))
    }
}

/// A single open WebSocket.
///
/// Ping frames are answered inline; binary frames are ignored.
pub struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl PushConnection for TungsteniteConnection {
    async fn next_text(&mut self) -> Result<Option<String>> {
        if self.closed {
            return Ok(None);
        }

        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Ok(Some(text.to_string())),
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to answer ping");
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "Push connection closed by peer");
                    self.closed = true;
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => {
                    self.closed = true;
                    return Err(BridgeError::ConnectionClosed(e.to_string()));
                }
            }
        }

        self.closed = true;
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| BridgeError::ConnectionClosed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        let transport = TungsteniteTransport::new();
        let result = transport.connect("ws://127.0.0.1:1/ws/datasets/1/").await;
        assert!(matches!(result, Err(BridgeError::OperationFailed(_))));
    }
}
