#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for treasure-hunt client integration tests.
//!
//! Provides a scripted [`MockTransport`] / [`MockConnector`] pair for the
//! broker loop, a scriptable [`MockApi`] with per-endpoint call counters,
//! and small builders for the common wire payloads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use treasure_hunt_client::api::GameApi;
use treasure_hunt_client::transport::{Connector, InboundMessage, Transport};
use treasure_hunt_client::types::{
    GamePhase, GameSettings, LoginRequest, Player, PlayerId, SubmitAnswerRequest, SubmitOutcome,
    Team, TeamId, TeamPuzzle,
};
use treasure_hunt_client::{Result, SyncError};

// ── MockTransport ───────────────────────────────────────────────────

/// One step of a scripted broker session, consumed in order by `recv`.
pub enum ScriptItem {
    /// Deliver an inbound message.
    Msg(InboundMessage),
    /// Fail the receive with a transport error.
    Error(SyncError),
    /// End the stream cleanly.
    Close,
    /// Sleep before the next step, to sequence races in tests.
    Wait(Duration),
}

/// A frame sent by the client through the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: String },
}

/// A scripted broker session. Outgoing frames are recorded in a shared
/// log; scripted incoming items are consumed in order, after which `recv`
/// hangs until the session is torn down.
pub struct MockTransport {
    incoming: VecDeque<ScriptItem>,
    sent: Arc<StdMutex<Vec<SentFrame>>>,
    closed: Arc<AtomicBool>,
    fail_sends: bool,
}

impl MockTransport {
    pub fn new(
        incoming: Vec<ScriptItem>,
    ) -> (Self, Arc<StdMutex<Vec<SentFrame>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            fail_sends: false,
        };
        (transport, sent, closed)
    }

    fn record(&mut self, frame: SentFrame) -> Result<()> {
        if self.fail_sends {
            return Err(SyncError::TransportSend("scripted send failure".into()));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.record(SentFrame::Subscribe(topic.to_owned()))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        self.record(SentFrame::Unsubscribe(topic.to_owned()))
    }

    async fn publish(&mut self, topic: &str, payload: String) -> Result<()> {
        self.record(SentFrame::Publish {
            topic: topic.to_owned(),
            payload,
        })
    }

    async fn recv(&mut self) -> Option<Result<InboundMessage>> {
        loop {
            // Wait items are popped only after the sleep completes, so a
            // cancelled recv restarts the delay instead of skipping it.
            let wait = match self.incoming.front() {
                Some(ScriptItem::Wait(duration)) => Some(*duration),
                Some(_) => None,
                None => {
                    // Script exhausted: stay connected until shutdown.
                    std::future::pending::<()>().await;
                    return None;
                }
            };
            if let Some(duration) = wait {
                tokio::time::sleep(duration).await;
                self.incoming.pop_front();
                continue;
            }
            match self.incoming.pop_front() {
                Some(ScriptItem::Msg(message)) => return Some(Ok(message)),
                Some(ScriptItem::Error(e)) => return Some(Err(e)),
                _ => return None,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// One scripted connection attempt.
pub enum ConnectScript {
    /// The attempt fails.
    Fail,
    /// The attempt succeeds with the given session script.
    Succeed(Vec<ScriptItem>),
}

/// Scripted [`Connector`]. Sessions share one sent-frame log so tests can
/// assert ordering across reconnects. Once the script is exhausted, every
/// further attempt succeeds with an idle session.
pub struct MockConnector {
    script: VecDeque<ConnectScript>,
    attempts: Arc<AtomicUsize>,
    sent: Arc<StdMutex<Vec<SentFrame>>>,
}

impl MockConnector {
    pub fn new(
        script: Vec<ConnectScript>,
    ) -> (Self, Arc<StdMutex<Vec<SentFrame>>>, Arc<AtomicUsize>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            script: VecDeque::from(script),
            attempts: Arc::clone(&attempts),
            sent: Arc::clone(&sent),
        };
        (connector, sent, attempts)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&mut self) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let incoming = match self.script.pop_front() {
            Some(ConnectScript::Fail) => {
                return Err(SyncError::ConnectFailed("scripted connect failure".into()));
            }
            Some(ConnectScript::Succeed(incoming)) => incoming,
            None => Vec::new(),
        };
        Ok(Box::new(MockTransport {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&self.sent),
            closed: Arc::new(AtomicBool::new(false)),
            fail_sends: false,
        }))
    }
}

// ── MockApi ─────────────────────────────────────────────────────────

/// Scriptable [`GameApi`]. Each endpoint consumes queued results in order
/// and answers with a network-unreachable error once its queue is empty.
/// Call counts are recorded per endpoint.
#[derive(Default)]
pub struct MockApi {
    pub login_calls: AtomicUsize,
    pub state_calls: AtomicUsize,
    pub settings_calls: AtomicUsize,
    pub team_calls: AtomicUsize,
    pub rename_calls: AtomicUsize,
    pub puzzles_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    login_results: StdMutex<VecDeque<Result<Player>>>,
    state_results: StdMutex<VecDeque<Result<GamePhase>>>,
    settings_results: StdMutex<VecDeque<Result<GameSettings>>>,
    team_results: StdMutex<VecDeque<Result<Team>>>,
    rename_results: StdMutex<VecDeque<Result<Team>>>,
    puzzles_results: StdMutex<VecDeque<Result<Vec<TeamPuzzle>>>>,
    submit_results: StdMutex<VecDeque<Result<SubmitOutcome>>>,
    /// Delay applied to `game_state`, for racing the pull against a push.
    state_delay: StdMutex<Option<Duration>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, result: Result<Player>) {
        self.login_results.lock().unwrap().push_back(result);
    }

    pub fn push_state(&self, result: Result<GamePhase>) {
        self.state_results.lock().unwrap().push_back(result);
    }

    pub fn push_settings(&self, result: Result<GameSettings>) {
        self.settings_results.lock().unwrap().push_back(result);
    }

    pub fn push_team(&self, result: Result<Team>) {
        self.team_results.lock().unwrap().push_back(result);
    }

    pub fn push_rename(&self, result: Result<Team>) {
        self.rename_results.lock().unwrap().push_back(result);
    }

    pub fn push_puzzles(&self, result: Result<Vec<TeamPuzzle>>) {
        self.puzzles_results.lock().unwrap().push_back(result);
    }

    pub fn push_submit(&self, result: Result<SubmitOutcome>) {
        self.submit_results.lock().unwrap().push_back(result);
    }

    pub fn set_state_delay(&self, delay: Duration) {
        *self.state_delay.lock().unwrap() = Some(delay);
    }

    fn pop<T>(queue: &StdMutex<VecDeque<Result<T>>>) -> Result<T> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::network_unreachable()))
    }
}

#[async_trait]
impl GameApi for MockApi {
    async fn login_player(&self, _request: &LoginRequest) -> Result<Player> {
        self.login_calls.fetch_add(1, Ordering::Relaxed);
        Self::pop(&self.login_results)
    }

    async fn game_state(&self) -> Result<GamePhase> {
        self.state_calls.fetch_add(1, Ordering::Relaxed);
        let delay = *self.state_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::pop(&self.state_results)
    }

    async fn game_settings(&self) -> Result<GameSettings> {
        self.settings_calls.fetch_add(1, Ordering::Relaxed);
        Self::pop(&self.settings_results)
    }

    async fn team_for_player(&self, _player_id: PlayerId) -> Result<Team> {
        self.team_calls.fetch_add(1, Ordering::Relaxed);
        Self::pop(&self.team_results)
    }

    async fn rename_team(&self, _team_id: TeamId, _name: &str) -> Result<Team> {
        self.rename_calls.fetch_add(1, Ordering::Relaxed);
        Self::pop(&self.rename_results)
    }

    async fn team_puzzles(&self, _team_id: TeamId) -> Result<Vec<TeamPuzzle>> {
        self.puzzles_calls.fetch_add(1, Ordering::Relaxed);
        Self::pop(&self.puzzles_results)
    }

    async fn submit_answer(&self, _request: &SubmitAnswerRequest) -> Result<SubmitOutcome> {
        self.submit_calls.fetch_add(1, Ordering::Relaxed);
        Self::pop(&self.submit_results)
    }
}

// ── Payload builders ────────────────────────────────────────────────

/// Script item delivering `payload` on `topic`.
pub fn msg(topic: &str, payload: &Value) -> ScriptItem {
    ScriptItem::Msg(InboundMessage {
        topic: topic.to_owned(),
        payload: payload.to_string(),
    })
}

/// Script item delivering a raw (possibly malformed) payload on `topic`.
pub fn raw_msg(topic: &str, payload: &str) -> ScriptItem {
    ScriptItem::Msg(InboundMessage {
        topic: topic.to_owned(),
        payload: payload.to_owned(),
    })
}

pub fn recv_error(reason: &str) -> ScriptItem {
    ScriptItem::Error(SyncError::TransportReceive(reason.to_owned()))
}

pub fn player(id: PlayerId, username: &str) -> Player {
    Player {
        id,
        full_name: format!("{username} full"),
        username: username.to_owned(),
        team_id: None,
    }
}

pub fn team(id: TeamId, name: &str, xp: u64, level: u32) -> Team {
    Team {
        id,
        name: name.to_owned(),
        xp,
        level,
        players: Vec::new(),
    }
}

pub fn puzzle(id: i64, puzzle_id: i64, title: &str, solved: bool) -> TeamPuzzle {
    TeamPuzzle {
        id,
        puzzle_id,
        puzzle_title: title.to_owned(),
        puzzle_description: String::new(),
        solved,
    }
}

/// Poll `cond` until it holds, panicking after roughly a second.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
