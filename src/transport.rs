//! Transport abstraction for the broker connection.
//!
//! The [`Transport`] trait models an established session with the message
//! broker: topic subscription management plus a stream of inbound messages.
//! The [`Connector`] trait models the ability to (re)establish such a
//! session; the client calls it once per connection attempt, so the
//! reconnect policy lives entirely in the client loop.
//!
//! The bundled WebSocket implementation lives in
//! [`crate::transports::websocket`] behind the `transport-websocket`
//! feature. Tests substitute scripted in-memory implementations.

use async_trait::async_trait;

use crate::error::SyncError;

/// One message delivered by the broker: the topic it arrived on and its raw
/// payload, left unparsed until fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Broker destination the message was published on.
    pub topic: String,
    /// Raw payload text, expected to be JSON.
    pub payload: String,
}

/// An established broker session.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it
/// is used inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data. Channel-based
/// implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Ask the broker to start delivering messages published on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the subscription frame could
    /// not be sent.
    async fn subscribe(&mut self, topic: &str) -> Result<(), SyncError>;

    /// Ask the broker to stop delivering messages for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the frame could not be sent.
    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SyncError>;

    /// Publish a payload to a broker destination.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the frame could not be sent.
    async fn publish(&mut self, topic: &str, payload: String) -> Result<(), SyncError>;

    /// Receive the next inbound message.
    ///
    /// Returns:
    /// - `Some(Ok(message))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<InboundMessage, SyncError>>;

    /// Close the session gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// Factory for broker sessions, called once per connection attempt.
///
/// Implementations own the connection parameters (URL, credentials,
/// timeouts) so the client stays transport-agnostic.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new broker session.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConnectFailed`] if the session could not be
    /// established. The client retries after its reconnect delay.
    async fn connect(&mut self) -> Result<Box<dyn Transport>, SyncError>;
}
