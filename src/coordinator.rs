//! Initial game-phase resolution: race the push path against a REST pull.
//!
//! On startup the client subscribes for the phase snapshot and waits. If no
//! push lands within the deadline, or the broker connection fails outright,
//! a single REST pull is issued. A push that arrives while the pull is in
//! flight still wins; late arrivals after resolution flow through the
//! regular subscription path and are not this module's concern.
//!
//! Resolution passes through three states: awaiting the push, fallback
//! requested, resolved. The fallback is requested at most once, so the
//! backend sees at most one pull per startup no matter how the race plays
//! out.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::GameApi;
use crate::cache::{self, keys, Cache};
use crate::client::{BrokerClient, ConnectionEvent};
use crate::error::Result;
use crate::topics;
use crate::types::GamePhase;

/// How long to wait for a phase push before pulling over REST.
pub const DEFAULT_PUSH_DEADLINE: Duration = Duration::from_secs(3);

/// How the initial phase was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSource {
    /// A broker push arrived in time.
    Push,
    /// The REST pull (or, failing that, the cache) supplied the phase.
    Fallback,
}

/// Outcome of [`resolve_initial_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseResolution {
    pub phase: GamePhase,
    pub via: PhaseSource,
}

/// Determine the current game phase at startup.
///
/// Subscribes to both game-state topics, waits up to `deadline` for a push,
/// and falls back to one `GET /api/v1/game/state` pull when the deadline
/// expires or the broker reports a failed or lost connection. If the pull
/// itself fails, the cached phase is used, defaulting to
/// [`GamePhase::NotStarted`] on a cold cache.
///
/// The resolved phase is persisted to the cache, and the temporary
/// observers are removed before returning. The broker subscriptions stay
/// open so later phase observers reuse them without a broker round-trip.
///
/// # Errors
///
/// Returns [`crate::error::SyncError::NotConnected`] only when `broker` has
/// already shut down.
pub async fn resolve_initial_phase(
    broker: &BrokerClient,
    events: &mut mpsc::Receiver<ConnectionEvent>,
    api: &dyn GameApi,
    cache: &dyn Cache,
    deadline: Duration,
) -> Result<PhaseResolution> {
    let (push_tx, mut push_rx) = mpsc::channel::<GamePhase>(8);
    let tokens = [
        broker.subscribe(topics::GAME_STATE_INITIAL, phase_observer(push_tx.clone()))?,
        broker.subscribe(topics::GAME_STATE_UPDATES, phase_observer(push_tx))?,
    ];

    let resolution = await_phase(&mut push_rx, events, api, cache, deadline).await;

    for token in tokens {
        let _ = broker.remove_observer(token);
    }

    cache::store(cache, keys::GAME_STATE, &resolution.phase);
    debug!(phase = ?resolution.phase, via = ?resolution.via, "initial phase resolved");
    Ok(resolution)
}

fn phase_observer(tx: mpsc::Sender<GamePhase>) -> impl FnMut(&Value) + Send + 'static {
    move |payload| {
        if let Some(phase) = GamePhase::from_message(payload) {
            let _ = tx.try_send(phase);
        }
    }
}

async fn await_phase(
    push_rx: &mut mpsc::Receiver<GamePhase>,
    events: &mut mpsc::Receiver<ConnectionEvent>,
    api: &dyn GameApi,
    cache: &dyn Cache,
    deadline: Duration,
) -> PhaseResolution {
    let wait = tokio::time::sleep(deadline);
    tokio::pin!(wait);

    // Awaiting push: a connect failure or a lost session means the push is
    // not coming soon, so the fallback is requested early.
    loop {
        tokio::select! {
            Some(phase) = push_rx.recv() => {
                return PhaseResolution { phase, via: PhaseSource::Push };
            }
            event = events.recv() => match event {
                Some(ConnectionEvent::Connected) => continue,
                Some(ConnectionEvent::ConnectFailed { .. })
                | Some(ConnectionEvent::Disconnected { .. })
                | None => break,
            },
            () = &mut wait => break,
        }
    }

    debug!("no phase push in time, requesting fallback pull");

    // Fallback requested: one pull, still racing the push.
    let pull = api.game_state();
    tokio::pin!(pull);
    tokio::select! {
        Some(phase) = push_rx.recv() => PhaseResolution {
            phase,
            via: PhaseSource::Push,
        },
        result = &mut pull => match result {
            Ok(phase) => PhaseResolution {
                phase,
                via: PhaseSource::Fallback,
            },
            Err(e) => {
                warn!("game state pull failed, using cached phase: {e}");
                let phase = cache::load(cache, keys::GAME_STATE).unwrap_or_default();
                PhaseResolution {
                    phase,
                    via: PhaseSource::Fallback,
                }
            }
        },
    }
}
