//! REST endpoints: identity, pull fallback, and user-initiated actions.
//!
//! Everything the broker cannot carry goes through here: login, team lookup
//! and rename, puzzle seeding, answer submission, and the game-state pull
//! used when the push path is slow or down. The [`GameApi`] trait is the
//! seam tests mock; [`HttpApi`] is the production implementation.
//!
//! All endpoints return the standard `{success, data, message}` envelope on
//! 2xx. Non-2xx responses carry `{status, message, fieldsErrors}` and map to
//! [`SyncError::Api`]. Requests that never reach the server normalize to the
//! same variant with `status = 0`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::types::{
    ApiEnvelope, ApiErrorBody, GamePhase, GameSettings, LoginRequest, Player, PlayerId,
    SubmitAnswerRequest, SubmitOutcome, Team, TeamId, TeamPuzzle,
};

/// REST surface of the game backend.
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Register (or re-register) the local player.
    async fn login_player(&self, request: &LoginRequest) -> Result<Player>;

    /// Pull the current game phase. The fallback path when the push
    /// snapshot does not arrive in time.
    async fn game_state(&self) -> Result<GamePhase>;

    /// Fetch game configuration (XP curve, attempt and cooldown tuning).
    async fn game_settings(&self) -> Result<GameSettings>;

    /// Fetch the team a player belongs to.
    ///
    /// # Errors
    ///
    /// A player without a team is reported as a 4xx [`SyncError::Api`];
    /// callers check [`SyncError::is_no_team`] to treat it as absence.
    async fn team_for_player(&self, player_id: PlayerId) -> Result<Team>;

    /// Rename a team, returning the updated team.
    async fn rename_team(&self, team_id: TeamId, name: &str) -> Result<Team>;

    /// Fetch the puzzle list assigned to a team.
    async fn team_puzzles(&self, team_id: TeamId) -> Result<Vec<TeamPuzzle>>;

    /// Submit an answer. A wrong answer is `Ok` with `success = false`, not
    /// an error; errors mean the submission itself failed.
    async fn submit_answer(&self, request: &SubmitAnswerRequest) -> Result<SubmitOutcome>;
}

/// [`GameApi`] over HTTP via a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    /// Create an API client for the backend at `base_url`
    /// (e.g. `https://game.example`). A trailing slash is tolerated.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Execute a request and unwrap the response envelope's `data` field.
    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let envelope = self.execute_enveloped::<T>(request).await?;
        envelope.data.ok_or_else(|| {
            SyncError::api(
                200,
                envelope
                    .message
                    .unwrap_or_else(|| "response envelope is missing data".to_owned()),
            )
        })
    }

    /// Execute a request and return the whole envelope, for endpoints where
    /// the `success` flag itself is the answer.
    async fn execute_enveloped<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiEnvelope<T>> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("request never reached the server: {e}");
                return Err(SyncError::network_unreachable());
            }
        };
        let status = response.status();
        if !status.is_success() {
            let body: ApiErrorBody = response.json().await.unwrap_or_default();
            return Err(SyncError::Api {
                status: status.as_u16(),
                message: body
                    .message
                    .unwrap_or_else(|| format!("request failed with status {status}")),
                fields_errors: body.fields_errors,
            });
        }
        response
            .json()
            .await
            .map_err(|e| SyncError::api(status.as_u16(), format!("malformed response body: {e}")))
    }
}

#[async_trait]
impl GameApi for HttpApi {
    async fn login_player(&self, request: &LoginRequest) -> Result<Player> {
        self.execute(self.http.post(self.url("/api/v1/players")).json(request))
            .await
    }

    async fn game_state(&self) -> Result<GamePhase> {
        let value: Value = self
            .execute(self.http.get(self.url("/api/v1/game/state")))
            .await?;
        GamePhase::from_message(&value)
            .ok_or_else(|| SyncError::api(200, format!("unrecognized game state: {value}")))
    }

    async fn game_settings(&self) -> Result<GameSettings> {
        self.execute(self.http.get(self.url("/api/v1/game/settings")))
            .await
    }

    async fn team_for_player(&self, player_id: PlayerId) -> Result<Team> {
        self.execute(
            self.http
                .get(self.url(&format!("/api/v1/teams/player/{player_id}"))),
        )
        .await
    }

    async fn rename_team(&self, team_id: TeamId, name: &str) -> Result<Team> {
        self.execute(
            self.http
                .put(self.url(&format!("/api/v1/teams/{team_id}")))
                .json(&json!({ "name": name })),
        )
        .await
    }

    async fn team_puzzles(&self, team_id: TeamId) -> Result<Vec<TeamPuzzle>> {
        self.execute(
            self.http
                .get(self.url(&format!("/api/v1/team-puzzles/team/{team_id}"))),
        )
        .await
    }

    async fn submit_answer(&self, request: &SubmitAnswerRequest) -> Result<SubmitOutcome> {
        let envelope: ApiEnvelope<Value> = self
            .execute_enveloped(
                self.http
                    .post(self.url("/api/v1/team-puzzles/submit-answer"))
                    .json(request),
            )
            .await?;
        Ok(SubmitOutcome {
            success: envelope.success,
            message: envelope.message,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let api = HttpApi::new("https://game.example/");
        assert_eq!(api.url("/api/v1/players"), "https://game.example/api/v1/players");

        let api = HttpApi::new("https://game.example");
        assert_eq!(api.url("/api/v1/game/state"), "https://game.example/api/v1/game/state");
    }
}
