//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! This module provides [`WebSocketTransport`], a [`Transport`]
//! implementation speaking a JSON frame protocol over a WebSocket
//! connection, and [`WsConnector`], the matching [`Connector`] for
//! [`BrokerClient::start`](crate::client::BrokerClient::start). Both
//! `ws://` and `wss://` URLs are supported — TLS is handled transparently
//! via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Wire format
//!
//! Outbound frames are JSON objects with an `op` discriminator:
//!
//! ```json
//! {"op": "subscribe", "topic": "/topic/leaderboard"}
//! {"op": "unsubscribe", "topic": "/topic/leaderboard"}
//! {"op": "publish", "topic": "/app/players/create", "payload": {...}}
//! ```
//!
//! Inbound frames carry the topic and the published payload:
//!
//! ```json
//! {"topic": "/topic/leaderboard", "payload": [...]}
//! ```
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is
//! enabled (it is enabled by default).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::SyncError;
use crate::transport::{Connector, InboundMessage, Transport};

/// Default deadline for establishing the WebSocket connection.
const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Type alias for the underlying WebSocket stream.
///
/// Made public so that callers can construct a [`WebSocketTransport`] from
/// an existing stream via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Serialize)]
struct OutboundFrame<'a> {
    op: &'a str,
    topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct InboundFrame {
    topic: String,
    payload: Box<RawValue>,
}

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any
/// messages, making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// Supports both `ws://` and `wss://` schemes. TLS is handled
    /// automatically by `tokio-tungstenite` via
    /// [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the URL is invalid or the connection
    /// cannot be established. When the underlying error is an I/O error its
    /// [`ErrorKind`](std::io::ErrorKind) is preserved; all other errors are
    /// mapped to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, SyncError> {
        tracing::debug!(url = %url, "connecting to WebSocket broker");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            SyncError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Create a [`WebSocketTransport`] from an already-established stream.
    ///
    /// This is useful when you need custom TLS configuration, proxy
    /// headers, or any other connection setup that
    /// [`connect`](Self::connect) does not expose.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Establish a new WebSocket connection with a timeout.
    ///
    /// Behaves identically to [`connect`](Self::connect) but fails with
    /// [`SyncError::Timeout`] if the connection is not established within
    /// the given duration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if the deadline elapses, or any error
    /// that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, SyncError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    async fn send_frame(&mut self, frame: OutboundFrame<'_>) -> Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::TransportClosed);
        }
        let text = serde_json::to_string(&frame)?;
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn subscribe(&mut self, topic: &str) -> Result<(), SyncError> {
        self.send_frame(OutboundFrame {
            op: "subscribe",
            topic,
            payload: None,
        })
        .await
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SyncError> {
        self.send_frame(OutboundFrame {
            op: "unsubscribe",
            topic,
            payload: None,
        })
        .await
    }

    async fn publish(&mut self, topic: &str, payload: String) -> Result<(), SyncError> {
        let payload = RawValue::from_string(payload)?;
        self.send_frame(OutboundFrame {
            op: "publish",
            topic,
            payload: Some(&payload),
        })
        .await
    }

    async fn recv(&mut self) -> Option<Result<InboundMessage, SyncError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(SyncError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<InboundFrame>(text.as_str()) {
                    Ok(frame) => {
                        return Some(Ok(InboundMessage {
                            topic: frame.topic,
                            payload: frame.payload.get().to_owned(),
                        }));
                    }
                    Err(e) => {
                        // A broken frame must not kill the connection.
                        tracing::warn!("skipping unparseable broker frame: {e}");
                    }
                },
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Ping(_) => {
                    tracing::debug!("received WebSocket ping (auto-pong handled by tungstenite)");
                    // tungstenite auto-queues a Pong reply; no manual response needed.
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                    // Continue the loop.
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                    // Continue the loop.
                }
                Message::Frame(_) => {
                    // Never produced by the read half of the stream; the arm
                    // exists only for exhaustiveness.
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }
}

/// [`Connector`] producing [`WebSocketTransport`] sessions for one URL.
///
/// The client calls it once per connection attempt, so every reconnect gets
/// a fresh stream.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: std::time::Duration,
}

impl WsConnector {
    /// Create a connector for the broker at `url`
    /// (e.g. `wss://game.example/ws`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the per-attempt connection deadline (default 10 seconds).
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&mut self) -> Result<Box<dyn Transport>, SyncError> {
        let transport = WebSocketTransport::connect_with_timeout(&self.url, self.connect_timeout)
            .await
            .map_err(|e| SyncError::ConnectFailed(e.to_string()))?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        assert!(matches!(result.unwrap_err(), SyncError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1").await;
        assert!(matches!(result.unwrap_err(), SyncError::Io(_)));
    }

    // ── Mock-server helpers ─────────────────────────────────────────

    use tokio::net::TcpListener;

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    // ── Mock-server tests ───────────────────────────────────────────

    #[tokio::test]
    async fn subscribe_sends_a_subscribe_frame() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(frame["op"], "subscribe");
                assert_eq!(frame["topic"], "/topic/leaderboard");
                // Acknowledge by echoing a data frame.
                ws.send(Message::Text(
                    r#"{"topic":"/topic/leaderboard","payload":[]}"#.into(),
                ))
                .await
                .unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.subscribe("/topic/leaderboard").await.unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg.topic, "/topic/leaderboard");
        assert_eq!(msg.payload, "[]");
    }

    #[tokio::test]
    async fn publish_embeds_the_payload_verbatim() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(frame["op"], "publish");
                assert_eq!(frame["topic"], "/app/players/create");
                assert_eq!(frame["payload"]["id"], 1);
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .publish("/app/players/create", r#"{"id":1}"#.to_owned())
            .await
            .unwrap();

        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_unparseable_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("{not a frame".into())).await.unwrap();
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"{"topic":"/topic/players","payload":{"id":2}}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg.topic, "/topic/players");
    }

    #[tokio::test]
    async fn recv_returns_none_on_close_frame() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.subscribe("/topic/players").await.unwrap_err();
        assert!(matches!(err, SyncError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address to guarantee a timeout.
        let result = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await;

        assert!(matches!(result.unwrap_err(), SyncError::Timeout));
    }

    #[tokio::test]
    async fn connector_produces_working_sessions() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(
                r#"{"topic":"/topic/game/state","payload":"IN_PROGRESS"}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut connector = WsConnector::new(url);
        let mut transport = connector.connect().await.unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg.topic, "/topic/game/state");
        assert_eq!(msg.payload, "\"IN_PROGRESS\"");
    }
}
