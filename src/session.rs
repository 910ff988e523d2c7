//! Local game-session state: identity, team, phase, leaderboard, roster.
//!
//! [`GameSession`] is the single place where push payloads and REST results
//! meet. It keeps the in-memory view, writes every accepted update through
//! to the cache, and applies the cross-cutting rules: rank and XP always
//! come from the same leaderboard snapshot, and a reset to
//! [`GamePhase::NotStarted`] wipes the local identity.
//!
//! Push-applying methods (`apply_*`) take `&self` and a raw payload so they
//! can be called directly from subscription observers holding an
//! `Arc<GameSession>`.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, warn};

use crate::api::GameApi;
use crate::cache::{self, keys, Cache};
use crate::client::BrokerClient;
use crate::error::Result;
use crate::topics;
use crate::types::{
    GamePhase, GameSettings, LeaderboardEntry, LoginRequest, Player, Team, TeamId,
};

struct SessionState {
    player: Option<Player>,
    team: Option<Team>,
    /// Own team's rank from the last snapshot that included it.
    team_rank: Option<u32>,
    phase: GamePhase,
    leaderboard: Vec<LeaderboardEntry>,
    settings: GameSettings,
    waiting_players: Vec<Player>,
}

/// Session facade over the REST API and the durable cache.
pub struct GameSession {
    api: Arc<dyn GameApi>,
    cache: Arc<dyn Cache>,
    state: Mutex<SessionState>,
}

impl GameSession {
    /// Build a session seeded from the cache, so a restarted client shows
    /// its last known state before any network traffic completes.
    pub fn new(api: Arc<dyn GameApi>, cache: Arc<dyn Cache>) -> Self {
        let mut state = SessionState {
            player: cache::load(cache.as_ref(), keys::PLAYER),
            team: cache::load(cache.as_ref(), keys::TEAM),
            team_rank: None,
            phase: cache::load(cache.as_ref(), keys::GAME_STATE).unwrap_or_default(),
            leaderboard: cache::load(cache.as_ref(), keys::LEADERBOARD).unwrap_or_default(),
            settings: cache::load(cache.as_ref(), keys::GAME_SETTINGS).unwrap_or_default(),
            waiting_players: Vec::new(),
        };
        Self::reconcile_rank(&mut state, cache.as_ref());
        Self {
            api,
            cache,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ── Identity ────────────────────────────────────────────────────

    /// Register the local player with the backend.
    pub async fn login(&self, full_name: &str, username: &str) -> Result<Player> {
        let request = LoginRequest {
            full_name: full_name.to_owned(),
            username: username.to_owned(),
        };
        let player = self.api.login_player(&request).await?;
        cache::store(self.cache.as_ref(), keys::PLAYER, &player);
        self.lock().player = Some(player.clone());
        Ok(player)
    }

    /// The logged-in player, if any.
    pub fn player(&self) -> Option<Player> {
        self.lock().player.clone()
    }

    // ── Team ────────────────────────────────────────────────────────

    /// Fetch the logged-in player's team.
    ///
    /// `Ok(None)` means no player is logged in or the backend says the
    /// player has no team yet. If the fetch fails for any other reason and
    /// a cached team exists, the cached team is returned instead of the
    /// error.
    pub async fn load_team(&self) -> Result<Option<Team>> {
        let player_id = self.lock().player.as_ref().map(|p| p.id);
        let Some(player_id) = player_id else {
            return Ok(None);
        };
        match self.api.team_for_player(player_id).await {
            Ok(team) => {
                self.adopt_team(team.clone());
                Ok(Some(team))
            }
            Err(e) if e.is_no_team() => {
                self.cache.remove(keys::TEAM);
                self.cache.remove(keys::TEAM_ID);
                let mut state = self.lock();
                state.team = None;
                state.team_rank = None;
                Ok(None)
            }
            Err(e) => match cache::load::<Team>(self.cache.as_ref(), keys::TEAM) {
                Some(team) => {
                    warn!("team fetch failed, using cached team: {e}");
                    self.adopt_team(team.clone());
                    Ok(Some(team))
                }
                None => Err(e),
            },
        }
    }

    /// Rename a team and adopt the backend's updated copy.
    pub async fn rename_team(&self, team_id: TeamId, name: &str) -> Result<Team> {
        let team = self.api.rename_team(team_id, name).await?;
        self.adopt_team(team.clone());
        Ok(team)
    }

    /// Apply a per-team broker push (xp, level, name, membership changes).
    /// Pushes for other teams and malformed payloads are ignored.
    pub fn apply_team_update(&self, payload: &Value) {
        let team: Team = match serde_json::from_value(payload.clone()) {
            Ok(team) => team,
            Err(e) => {
                warn!("ignoring malformed team push: {e}");
                return;
            }
        };
        let current_id = self.lock().team.as_ref().map(|t| t.id);
        if current_id.is_some_and(|id| id != team.id) {
            debug!(team_id = team.id, "ignoring push for another team");
            return;
        }
        self.adopt_team(team);
    }

    fn adopt_team(&self, team: Team) {
        cache::store(self.cache.as_ref(), keys::TEAM, &team);
        cache::store(self.cache.as_ref(), keys::TEAM_ID, &team.id);
        let mut state = self.lock();
        state.team = Some(team);
        Self::reconcile_rank(&mut state, self.cache.as_ref());
    }

    /// The current team, if assigned.
    pub fn team(&self) -> Option<Team> {
        self.lock().team.clone()
    }

    /// Own team's rank from the last leaderboard snapshot that listed it.
    pub fn team_rank(&self) -> Option<u32> {
        self.lock().team_rank
    }

    // ── Phase ───────────────────────────────────────────────────────

    /// Apply a game-state push. Returns the decoded phase, or `None` for an
    /// unrecognized payload (which is ignored).
    pub fn apply_phase(&self, payload: &Value) -> Option<GamePhase> {
        let phase = GamePhase::from_message(payload)?;
        self.set_phase(phase);
        Some(phase)
    }

    /// Record a new phase. A reset to [`GamePhase::NotStarted`] invalidates
    /// the local identity: player, team, rank, roster, and the victory flag
    /// are all cleared.
    pub fn set_phase(&self, phase: GamePhase) {
        cache::store(self.cache.as_ref(), keys::GAME_STATE, &phase);
        let mut state = self.lock();
        state.phase = phase;
        if phase == GamePhase::NotStarted {
            state.player = None;
            state.team = None;
            state.team_rank = None;
            state.waiting_players.clear();
            cache::clear_identity(self.cache.as_ref());
            debug!("game reset, local identity cleared");
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.lock().phase
    }

    // ── Leaderboard ─────────────────────────────────────────────────

    /// Apply a full leaderboard snapshot push.
    ///
    /// Own rank and XP are taken from the same snapshot, joined by team id.
    /// When the own team is missing from the snapshot the previous rank and
    /// stats are kept.
    pub fn apply_leaderboard(&self, payload: &Value) {
        let entries: Vec<LeaderboardEntry> = match serde_json::from_value(payload.clone()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("ignoring malformed leaderboard push: {e}");
                return;
            }
        };
        cache::store(self.cache.as_ref(), keys::LEADERBOARD, &entries);
        let mut state = self.lock();
        state.leaderboard = entries;
        Self::reconcile_rank(&mut state, self.cache.as_ref());
    }

    fn reconcile_rank(state: &mut SessionState, cache: &dyn Cache) {
        let Some(team) = state.team.as_mut() else {
            return;
        };
        if let Some(entry) = state.leaderboard.iter().find(|e| e.id == team.id) {
            state.team_rank = Some(entry.rank);
            team.xp = entry.xp;
            team.level = entry.level;
            cache::store(cache, keys::TEAM, team);
        }
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.lock().leaderboard.clone()
    }

    /// The winning team of the current snapshot: the entry with the lowest
    /// rank value. `None` on an empty leaderboard.
    pub fn winner(&self) -> Option<LeaderboardEntry> {
        self.lock()
            .leaderboard
            .iter()
            .min_by_key(|e| e.rank)
            .cloned()
    }

    // ── Waiting-room roster ─────────────────────────────────────────

    /// Apply a roster push: either the full list (initial snapshot) or a
    /// single newly joined player. Duplicate ids are dropped, keeping the
    /// first occurrence.
    pub fn apply_roster(&self, payload: &Value) {
        let mut state = self.lock();
        if payload.is_array() {
            match serde_json::from_value::<Vec<Player>>(payload.clone()) {
                Ok(players) => {
                    state.waiting_players.clear();
                    for player in players {
                        if !state.waiting_players.iter().any(|p| p.id == player.id) {
                            state.waiting_players.push(player);
                        }
                    }
                }
                Err(e) => warn!("ignoring malformed roster snapshot: {e}"),
            }
        } else {
            match serde_json::from_value::<Player>(payload.clone()) {
                Ok(player) => {
                    if !state.waiting_players.iter().any(|p| p.id == player.id) {
                        state.waiting_players.push(player);
                    }
                }
                Err(e) => warn!("ignoring malformed roster push: {e}"),
            }
        }
    }

    /// Announce the logged-in player to the waiting room. A no-op when
    /// nobody is logged in.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::SyncError::NotConnected`] if the broker
    /// client has shut down.
    pub fn announce_join(&self, broker: &BrokerClient) -> Result<()> {
        let player = self.lock().player.clone();
        match player {
            Some(player) => broker.publish(topics::ROSTER_ANNOUNCE, &player),
            None => {
                warn!("no logged-in player to announce");
                Ok(())
            }
        }
    }

    pub fn waiting_players(&self) -> Vec<Player> {
        self.lock().waiting_players.clone()
    }

    // ── Settings ────────────────────────────────────────────────────

    /// Fetch game settings, falling back to the cached (or built-in
    /// default) values when the fetch fails.
    pub async fn load_settings(&self) -> GameSettings {
        match self.api.game_settings().await {
            Ok(settings) => {
                cache::store(self.cache.as_ref(), keys::GAME_SETTINGS, &settings);
                self.lock().settings = settings;
                settings
            }
            Err(e) => {
                let settings = self.lock().settings;
                warn!("settings fetch failed, keeping current values: {e}");
                settings
            }
        }
    }

    pub fn settings(&self) -> GameSettings {
        self.lock().settings
    }

    // ── Victory flag ────────────────────────────────────────────────

    /// Whether the victory celebration was already shown this game.
    pub fn victory_already_shown(&self) -> bool {
        cache::load::<bool>(self.cache.as_ref(), keys::VICTORY_SHOWN).unwrap_or(false)
    }

    /// Record that the victory celebration was shown, so reloads during the
    /// finished phase do not replay it.
    pub fn mark_victory_shown(&self) {
        cache::store(self.cache.as_ref(), keys::VICTORY_SHOWN, &true);
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
    use crate::cache::MemoryCache;
    use crate::error::SyncError;
    use crate::types::{
        GamePhase, LoginRequest, PlayerId, SubmitAnswerRequest, SubmitOutcome, TeamPuzzle,
    };
    use async_trait::async_trait;
    use serde_json::json;

    /// API stub for tests that exercise push handling only.
    struct OfflineApi;

    #[async_trait]
    impl GameApi for OfflineApi {
        async fn login_player(&self, _: &LoginRequest) -> Result<Player> {
            Err(SyncError::network_unreachable())
        }
        async fn game_state(&self) -> Result<GamePhase> {
            Err(SyncError::network_unreachable())
        }
        async fn game_settings(&self) -> Result<GameSettings> {
            Err(SyncError::network_unreachable())
        }
        async fn team_for_player(&self, _: PlayerId) -> Result<Team> {
            Err(SyncError::network_unreachable())
        }
        async fn rename_team(&self, _: TeamId, _: &str) -> Result<Team> {
            Err(SyncError::network_unreachable())
        }
        async fn team_puzzles(&self, _: TeamId) -> Result<Vec<TeamPuzzle>> {
            Err(SyncError::network_unreachable())
        }
        async fn submit_answer(&self, _: &SubmitAnswerRequest) -> Result<SubmitOutcome> {
            Err(SyncError::network_unreachable())
        }
    }

    fn session_with_team(team_id: TeamId) -> GameSession {
        let cache = MemoryCache::new();
        cache::store(
            &cache,
            keys::TEAM,
            &Team {
                id: team_id,
                name: "Vikings".into(),
                xp: 50,
                level: 1,
                players: Vec::new(),
            },
        );
        GameSession::new(Arc::new(OfflineApi), Arc::new(cache))
    }

    #[test]
    fn rank_and_xp_come_from_the_same_snapshot() {
        let session = session_with_team(7);

        session.apply_leaderboard(&json!([
            {"rank": 1, "id": 5, "name": "Pirates", "level": 4, "xp": 300},
            {"rank": 2, "id": 7, "name": "Vikings", "level": 3, "xp": 200},
        ]));

        assert_eq!(session.team_rank(), Some(2));
        let team = session.team().unwrap();
        assert_eq!(team.xp, 200);
        assert_eq!(team.level, 3);
    }

    #[test]
    fn missing_team_keeps_previous_rank() {
        let session = session_with_team(7);

        session.apply_leaderboard(&json!([
            {"rank": 1, "id": 5, "name": "Pirates", "level": 4, "xp": 300},
            {"rank": 2, "id": 7, "name": "Vikings", "level": 3, "xp": 200},
        ]));
        assert_eq!(session.team_rank(), Some(2));

        session.apply_leaderboard(&json!([
            {"rank": 1, "id": 5, "name": "Pirates", "level": 5, "xp": 400},
        ]));

        assert_eq!(session.team_rank(), Some(2));
        // Stats also stay from the last snapshot that listed the team.
        assert_eq!(session.team().unwrap().xp, 200);
    }

    #[test]
    fn malformed_leaderboard_keeps_previous_snapshot() {
        let session = session_with_team(7);
        session.apply_leaderboard(&json!([
            {"rank": 1, "id": 7, "name": "Vikings", "level": 3, "xp": 200},
        ]));

        session.apply_leaderboard(&json!({"rank": "nope"}));

        assert_eq!(session.leaderboard().len(), 1);
        assert_eq!(session.team_rank(), Some(1));
    }

    #[test]
    fn reset_to_not_started_clears_identity() {
        let cache = Arc::new(MemoryCache::new());
        cache::store(
            cache.as_ref(),
            keys::PLAYER,
            &Player {
                id: 1,
                full_name: "Ada".into(),
                username: "ada".into(),
                team_id: Some(7),
            },
        );
        cache.set(keys::VICTORY_SHOWN, json!(true));
        let session = GameSession::new(Arc::new(OfflineApi), Arc::clone(&cache) as Arc<dyn Cache>);
        assert!(session.player().is_some());

        session.apply_phase(&json!({"state": "NOT_STARTED"}));

        assert!(session.player().is_none());
        assert!(session.team().is_none());
        assert!(cache.get(keys::PLAYER).is_none());
        assert!(!session.victory_already_shown());
        assert_eq!(session.phase(), GamePhase::NotStarted);
    }

    #[test]
    fn roster_deduplicates_by_player_id() {
        let session = session_with_team(7);

        session.apply_roster(&json!([
            {"id": 1, "fullName": "Ada", "username": "ada"},
            {"id": 2, "fullName": "Grace", "username": "grace"},
            {"id": 1, "fullName": "Ada Again", "username": "ada2"},
        ]));
        assert_eq!(session.waiting_players().len(), 2);

        // A repeated join push is ignored, a new one appended.
        session.apply_roster(&json!({"id": 2, "fullName": "Grace", "username": "grace"}));
        session.apply_roster(&json!({"id": 3, "fullName": "Alan", "username": "alan"}));
        let roster = session.waiting_players();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster[2].id, 3);
    }

    #[test]
    fn winner_is_the_lowest_rank() {
        let session = session_with_team(7);
        session.apply_leaderboard(&json!([
            {"rank": 3, "id": 9, "name": "Crows", "level": 1, "xp": 10},
            {"rank": 1, "id": 5, "name": "Pirates", "level": 4, "xp": 300},
            {"rank": 2, "id": 7, "name": "Vikings", "level": 3, "xp": 200},
        ]));

        assert_eq!(session.winner().unwrap().id, 5);
    }

    #[test]
    fn team_pushes_for_other_teams_are_ignored() {
        let session = session_with_team(7);

        session.apply_team_update(&json!({
            "id": 9, "name": "Crows", "xp": 999, "level": 9, "players": []
        }));
        assert_eq!(session.team().unwrap().id, 7);

        session.apply_team_update(&json!({
            "id": 7, "name": "Renamed Vikings", "xp": 75, "level": 2, "players": []
        }));
        assert_eq!(session.team().unwrap().name, "Renamed Vikings");
    }
}
