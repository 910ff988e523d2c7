//! # Treasure Hunt Client
//!
//! Transport-agnostic Rust client for a live multiplayer treasure-hunt
//! backend: broker subscriptions with automatic reconnection, a REST
//! fallback for the initial game phase, and a durable cache so a restarted
//! client resumes where it left off.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait and
//!   [`Connector`] for any broker backend
//! - **WebSocket built-in** — default `transport-websocket` feature
//!   provides `WebSocketTransport` and `WsConnector`
//! - **Multiplexed subscriptions** — one broker subscription per topic, any
//!   number of observers, fan-out in registration order
//! - **Offline-tolerant** — subscribes and publishes issued while
//!   disconnected replay on the next connect, in order
//! - **Durable** — game phase, team, leaderboard, and puzzle cooldowns
//!   survive restarts through an injected [`Cache`]
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use treasure_hunt_client::{
//!     BrokerClient, BrokerConfig, GameSession, HttpApi, JsonFileCache, WsConnector,
//! };
//!
//! let cache: Arc<dyn treasure_hunt_client::Cache> =
//!     Arc::new(JsonFileCache::open("state.json"));
//! let api = Arc::new(HttpApi::new("https://game.example"));
//! let session = GameSession::new(api.clone(), cache.clone());
//!
//! let connector = WsConnector::new("wss://game.example/ws");
//! let (broker, mut events) = BrokerClient::start(connector, BrokerConfig::new());
//!
//! let resolution = treasure_hunt_client::resolve_initial_phase(
//!     &broker,
//!     &mut events,
//!     api.as_ref(),
//!     cache.as_ref(),
//!     treasure_hunt_client::DEFAULT_PUSH_DEADLINE,
//! )
//! .await?;
//! println!("starting in phase {:?}", resolution.phase);
//! ```

pub mod api;
pub mod cache;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod mux;
pub mod puzzles;
pub mod session;
pub mod topics;
pub mod transport;
pub mod transports;
pub mod types;

// Re-export primary types for ergonomic imports.
pub use api::{GameApi, HttpApi};
pub use cache::{Cache, JsonFileCache, MemoryCache};
pub use client::{BrokerClient, BrokerConfig, ConnectionEvent};
pub use coordinator::{resolve_initial_phase, PhaseResolution, PhaseSource, DEFAULT_PUSH_DEADLINE};
pub use error::{Result, SyncError};
pub use mux::SubscriptionToken;
pub use puzzles::{AttemptState, PuzzleBoard, SubmitResult};
pub use session::GameSession;
pub use transport::{Connector, InboundMessage, Transport};
pub use types::{GamePhase, GameSettings, LeaderboardEntry, Player, Team, TeamPuzzle};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketTransport, WsConnector};
