//! Wire and data-model types for the treasure-hunt backend.
//!
//! Field names match the backend's JSON exactly (camelCase members, game
//! phases as SCREAMING_SNAKE_CASE strings). REST responses arrive wrapped in
//! an [`ApiEnvelope`]; push payloads arrive as bare JSON on broker topics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for players.
pub type PlayerId = i64;

/// Unique identifier for teams.
pub type TeamId = i64;

/// Unique identifier for puzzles.
pub type PuzzleId = i64;

// ── Game phase ──────────────────────────────────────────────────────

/// Global phase of the match. Transitions are backend-authoritative; the
/// client only observes and reacts, it never requests a transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    /// Match has not been opened yet; player/team identity is invalid.
    #[default]
    NotStarted,
    /// Players can log in and gather in the waiting room.
    WaitingForPlayers,
    /// The backend is forming teams.
    ArrangingTeams,
    /// Puzzles are live.
    InProgress,
    /// Final leaderboard is authoritative; no further submissions.
    Finished,
}

impl GamePhase {
    /// Decode a phase from a push payload.
    ///
    /// The backend publishes three shapes on the game-state topics: a bare
    /// string (`"IN_PROGRESS"`), `{"state": "..."}`, and `{"gameState": "..."}`.
    /// Returns `None` when none of them match.
    pub fn from_message(value: &Value) -> Option<Self> {
        let inner = match value {
            Value::Object(map) => map.get("state").or_else(|| map.get("gameState"))?,
            other => other,
        };
        serde_json::from_value(inner.clone()).ok()
    }
}

// ── Entities ────────────────────────────────────────────────────────

/// A human participant. Created by the login call; cleared when the game
/// resets to [`GamePhase::NotStarted`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub full_name: String,
    /// Handle, unique per game.
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
}

/// A group of players sharing progress. Created by the backend during team
/// arrangement; mutated by XP/level pushes and name edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub xp: u64,
    pub level: u32,
    #[serde(default)]
    pub players: Vec<Player>,
}

/// A team's ranked standing within one leaderboard snapshot.
///
/// `rank` is backend-authoritative and opaque — the client never invents a
/// tie-break. The whole leaderboard is replaced atomically on each push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based dense rank, unique within a snapshot. A backend contract
    /// breach (gaps, duplicates) must be tolerated without crashing.
    pub rank: u32,
    pub id: TeamId,
    pub name: String,
    pub level: u32,
    pub xp: u64,
}

/// Per-puzzle, per-team solve progress as reported by the backend.
///
/// The failed-attempt counter and cooldown are client-local derived state
/// (see [`crate::puzzles`]), not part of this wire type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamPuzzle {
    pub id: i64,
    pub puzzle_id: PuzzleId,
    pub puzzle_title: String,
    #[serde(default)]
    pub puzzle_description: String,
    pub solved: bool,
}

/// Server-supplied game configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    /// XP required per team level.
    #[serde(rename = "xpperLevel")]
    pub xp_per_level: u32,
    /// Failed attempts on one puzzle before the client-side cooldown starts.
    pub attempts_until_cooldown: u32,
    /// Cooldown length in seconds.
    pub cooldown_duration: u32,
}

impl Default for GameSettings {
    /// Hardcoded fallbacks used when the settings fetch fails.
    fn default() -> Self {
        Self {
            xp_per_level: 75,
            attempts_until_cooldown: 3,
            cooldown_duration: 60,
        }
    }
}

// ── Requests / outcomes ─────────────────────────────────────────────

/// Body for `POST /api/v1/players` (register/login).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub full_name: String,
    pub username: String,
}

/// Body for `POST /api/v1/team-puzzles/submit-answer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub team_id: TeamId,
    pub puzzle_id: PuzzleId,
    pub answer: String,
}

/// Result of an answer submission. `success = false` with a 2xx status is a
/// wrong answer, same as a 4xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Persisted per-puzzle cooldown state. The end time is an absolute epoch
/// timestamp (milliseconds) so a reload mid-cooldown resumes the countdown
/// instead of resetting it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CooldownRecord {
    pub end_time: i64,
    pub attempts: u32,
}

// ── REST envelope ───────────────────────────────────────────────────

/// Standard response envelope for all REST pull endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "none_data")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

fn none_data<T>() -> Option<T> {
    None
}

/// Error body for non-2xx REST responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub fields_errors: std::collections::HashMap<String, String>,
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
    use serde_json::json;

    #[test]
    fn phase_round_trips_as_screaming_snake_case() {
        let s = serde_json::to_string(&GamePhase::WaitingForPlayers).unwrap();
        assert_eq!(s, "\"WAITING_FOR_PLAYERS\"");
        let p: GamePhase = serde_json::from_str("\"ARRANGING_TEAMS\"").unwrap();
        assert_eq!(p, GamePhase::ArrangingTeams);
    }

    #[test]
    fn phase_from_message_accepts_all_backend_shapes() {
        assert_eq!(
            GamePhase::from_message(&json!("IN_PROGRESS")),
            Some(GamePhase::InProgress)
        );
        assert_eq!(
            GamePhase::from_message(&json!({"state": "FINISHED"})),
            Some(GamePhase::Finished)
        );
        assert_eq!(
            GamePhase::from_message(&json!({"gameState": "NOT_STARTED"})),
            Some(GamePhase::NotStarted)
        );
        assert_eq!(GamePhase::from_message(&json!({"other": 1})), None);
        assert_eq!(GamePhase::from_message(&json!(42)), None);
    }

    #[test]
    fn team_deserializes_camel_case() {
        let team: Team = serde_json::from_value(json!({
            "id": 7,
            "name": "Vikings",
            "xp": 200,
            "level": 3,
            "players": [
                {"id": 1, "fullName": "Ada Lovelace", "username": "ada", "teamId": 7}
            ]
        }))
        .unwrap();
        assert_eq!(team.id, 7);
        assert_eq!(team.players.len(), 1);
        assert_eq!(team.players[0].full_name, "Ada Lovelace");
        assert_eq!(team.players[0].team_id, Some(7));
    }

    #[test]
    fn settings_wire_names_match_backend() {
        let settings: GameSettings = serde_json::from_value(json!({
            "xpperLevel": 100,
            "attemptsUntilCooldown": 5,
            "cooldownDuration": 120
        }))
        .unwrap();
        assert_eq!(settings.xp_per_level, 100);
        assert_eq!(settings.attempts_until_cooldown, 5);
        assert_eq!(settings.cooldown_duration, 120);
    }

    #[test]
    fn settings_defaults_are_the_hardcoded_fallbacks() {
        let settings = GameSettings::default();
        assert_eq!(settings.xp_per_level, 75);
        assert_eq!(settings.attempts_until_cooldown, 3);
        assert_eq!(settings.cooldown_duration, 60);
    }

    #[test]
    fn envelope_tolerates_missing_fields() {
        let env: ApiEnvelope<Team> = serde_json::from_value(json!({
            "success": true,
            "data": {"id": 1, "name": "Pirates", "xp": 0, "level": 1}
        }))
        .unwrap();
        assert!(env.success);
        assert_eq!(env.data.unwrap().name, "Pirates");

        let env: ApiEnvelope<Team> =
            serde_json::from_value(json!({"message": "boom"})).unwrap();
        assert!(!env.success);
        assert!(env.data.is_none());
        assert_eq!(env.message.as_deref(), Some("boom"));
    }

    #[test]
    fn puzzle_wire_names_match_backend() {
        let puzzle: TeamPuzzle = serde_json::from_value(json!({
            "id": 11,
            "puzzleId": 3,
            "puzzleTitle": "The Locked Chest",
            "puzzleDescription": "X marks the spot",
            "solved": false
        }))
        .unwrap();
        assert_eq!(puzzle.puzzle_id, 3);
        assert!(!puzzle.solved);
    }
}
