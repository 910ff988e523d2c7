//! Bundled transport implementations.
//!
//! Concrete [`Transport`](crate::transport::Transport) and
//! [`Connector`](crate::transport::Connector) implementations live here
//! behind feature gates. Enable the corresponding Cargo feature to pull in
//! a transport:
//!
//! | Feature                | Transport              | Connector       |
//! |------------------------|------------------------|-----------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WsConnector`] |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketTransport, WsConnector};
