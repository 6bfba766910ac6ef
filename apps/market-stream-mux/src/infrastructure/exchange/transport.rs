//! WebSocket Transport
//!
//! [`Transport`] implementation over `tokio-tungstenite`. Protocol-level
//! pings are answered by tungstenite itself, which queues the pong and
//! flushes it on the next read or write. Binary frames are accepted if they
//! hold UTF-8 text.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{Transport, TransportError, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport to the exchange WebSocket endpoint.
pub struct WebSocketTransport {
    url: String,
    write: Option<SplitSink<WsStream, Message>>,
    read: Option<SplitStream<WsStream>>,
}

impl WebSocketTransport {
    /// Create a transport for `url`. Nothing is opened until `connect`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            write: None,
            read: None,
        }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("connected", &self.write.is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.close().await;
        tracing::info!(url = %self.url, "Connecting to exchange stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        Ok(())
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let write = self.write.as_mut().ok_or(TransportError::NotConnected)?;
        write
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(read) = self.read.as_mut() else {
            return TransportEvent::Errored(TransportError::NotConnected);
        };

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Frame(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return TransportEvent::Frame(text),
                    Err(_) => tracing::warn!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map_or_else(
                        || "no close frame".to_string(),
                        |f| format!("{} {}", u16::from(f.code), f.reason.as_str()),
                    );
                    tracing::info!(reason = %reason, "Server sent close frame");
                    return TransportEvent::Closed { reason };
                }
                Some(Err(e)) => {
                    return TransportEvent::Errored(TransportError::Protocol(e.to_string()));
                }
                None => {
                    return TransportEvent::Closed {
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }

    async fn close(&mut self) {
        self.read = None;
        if let Some(mut write) = self.write.take()
            && let Err(e) = write.close().await
        {
            tracing::debug!(error = %e, "Error closing WebSocket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_fails() {
        let mut transport = WebSocketTransport::new("wss://example.invalid/ws");
        let result = transport.send("{}".to_string()).await;
        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn next_event_before_connect_reports_error() {
        let mut transport = WebSocketTransport::new("wss://example.invalid/ws");
        assert_eq!(
            transport.next_event().await,
            TransportEvent::Errored(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = WebSocketTransport::new(format!("ws://127.0.0.1:{port}/ws"));
        let result = transport.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn server_ping_is_answered_once() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.send(Message::Ping(b"hb".to_vec().into())).await.unwrap();
            ws.send(Message::Text("after".into())).await.unwrap();

            let mut pongs = 0;
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Pong(_) => pongs += 1,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            pongs
        });

        let mut transport = WebSocketTransport::new(format!("ws://127.0.0.1:{port}/ws"));
        transport.connect().await.unwrap();
        assert_eq!(
            transport.next_event().await,
            TransportEvent::Frame("after".to_string())
        );
        transport.close().await;

        let pongs = tokio::time::timeout(std::time::Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pongs, 1);
    }

    #[test]
    fn debug_shows_url_and_state() {
        let transport = WebSocketTransport::new("wss://api.hyperliquid.xyz/ws");
        let debug = format!("{transport:?}");
        assert!(debug.contains("api.hyperliquid.xyz"));
        assert!(debug.contains("connected: false"));
    }
}
