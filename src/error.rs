//! Error types for the treasure-hunt client.

use std::collections::HashMap;

use thiserror::Error;

/// Errors that can occur when using the treasure-hunt client.
///
/// The taxonomy mirrors how failures are handled:
///
/// - transport errors are non-fatal and drive automatic reconnection or the
///   pull fallback,
/// - protocol errors (malformed push payloads) are logged and dropped inside
///   the delivery loop and never surface here,
/// - application errors ([`SyncError::Api`]) are propagated to the caller so
///   user-initiated actions (login, rename, answer submission) can display
///   them.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to send a frame through the broker transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the broker transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The broker connection could not be established.
    #[error("broker connect error: {0}")]
    ConnectFailed(String),

    /// The broker connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker client has shut down; no further operations are possible.
    #[error("not connected to broker")]
    NotConnected,

    /// A REST endpoint returned an application-level error.
    ///
    /// `status` is the HTTP status code, or `0` when the request never
    /// reached the server (network unreachable). `fields_errors` carries
    /// per-field validation messages for form display.
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code; `0` for network-unreachable.
        status: u16,
        /// Human-readable message from the backend.
        message: String,
        /// Per-field validation errors, if the backend provided any.
        fields_errors: HashMap<String, String>,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Build an [`SyncError::Api`] without field errors.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        SyncError::Api {
            status,
            message: message.into(),
            fields_errors: HashMap::new(),
        }
    }

    /// Build the normalized network-unreachable error (`status = 0`).
    pub fn network_unreachable() -> Self {
        SyncError::api(0, "Network error. Please check your connection.")
    }

    /// Returns `true` for the recognized, non-fatal "player not assigned to
    /// any team" response from the team endpoint.
    pub fn is_no_team(&self) -> bool {
        match self {
            SyncError::Api {
                status, message, ..
            } => (400..500).contains(status) && message.contains("not assigned to any team"),
            _ => false,
        }
    }
}

/// A specialized [`Result`] type for treasure-hunt client operations.
pub type Result<T> = std::result::Result<T, SyncError>;
