//! WebSocket Transport
//!
//! `tokio-tungstenite` adapter for the [`FeedTransport`] port.
//!
//! The feed is read-only: the client never sends application messages. The
//! adapter answers pings with pongs, hands text frames to the caller and
//! reports a close frame or end of stream as a clean remote close.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{FeedConnection, FeedTransport, TransportError};

/// Opens WebSocket connections to the price feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn FeedConnection>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// One open WebSocket connection.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection").finish_non_exhaustive()
    }
}

#[async_trait]
impl FeedConnection for WebSocketConnection {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };

            match message.map_err(|e| TransportError::Read(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame");
                    }
                },
                Message::Ping(data) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| TransportError::Read(e.to_string()))?;
                }
                Message::Pong(_) => {
                    tracing::trace!("Received pong");
                }
                Message::Close(frame) => {
                    tracing::debug!(?frame, "Feed sent close frame");
                    return Ok(None);
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Close(e.to_string())),
        }
    }
}
