//! Session and puzzle-board tests against the scripted API: identity
//! lifecycle, cached fallbacks, error surfacing, and the answer/cooldown
//! flow.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;
use treasure_hunt_client::cache::{self, keys, Cache, MemoryCache};
use treasure_hunt_client::puzzles::{AttemptState, PuzzleBoard, SubmitResult};
use treasure_hunt_client::types::{GamePhase, GameSettings, SubmitOutcome};
use treasure_hunt_client::{GameSession, SyncError};

use common::{player, puzzle, team, MockApi};

fn fixture() -> (Arc<MockApi>, Arc<MemoryCache>) {
    (Arc::new(MockApi::new()), Arc::new(MemoryCache::new()))
}

fn session(api: &Arc<MockApi>, cache: &Arc<MemoryCache>) -> GameSession {
    GameSession::new(
        Arc::clone(api) as Arc<dyn treasure_hunt_client::GameApi>,
        Arc::clone(cache) as Arc<dyn Cache>,
    )
}

// ════════════════════════════════════════════════════════════════════
// Identity
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn login_persists_the_player() {
    let (api, cache) = fixture();
    api.push_login(Ok(player(1, "ada")));
    let session = session(&api, &cache);

    let logged_in = session.login("Ada Lovelace", "ada").await.unwrap();
    assert_eq!(logged_in.id, 1);
    assert_eq!(session.player().unwrap().username, "ada");

    // A fresh session over the same cache resumes the identity.
    let resumed = GameSession::new(
        Arc::clone(&api) as _,
        Arc::clone(&cache) as Arc<dyn Cache>,
    );
    assert_eq!(resumed.player().unwrap().id, 1);
}

#[tokio::test]
async fn login_surfaces_field_validation_errors() {
    let (api, cache) = fixture();
    api.push_login(Err(SyncError::Api {
        status: 400,
        message: "validation failed".into(),
        fields_errors: HashMap::from([("username".to_owned(), "already taken".to_owned())]),
    }));
    let session = session(&api, &cache);

    let err = session.login("Ada Lovelace", "ada").await.unwrap_err();
    match err {
        SyncError::Api {
            status,
            fields_errors,
            ..
        } => {
            assert_eq!(status, 400);
            assert_eq!(fields_errors.get("username").unwrap(), "already taken");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert!(session.player().is_none());
}

#[tokio::test]
async fn unreachable_backend_is_reported_as_status_zero() {
    let (api, cache) = fixture();
    // Empty script: the mock answers every call with the normalized
    // network error.
    let session = session(&api, &cache);

    let err = session.login("Ada Lovelace", "ada").await.unwrap_err();
    assert!(matches!(err, SyncError::Api { status: 0, .. }));
}

// ════════════════════════════════════════════════════════════════════
// Team
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn load_team_treats_no_team_as_absence() {
    let (api, cache) = fixture();
    api.push_login(Ok(player(1, "ada")));
    api.push_team(Err(SyncError::api(
        404,
        "Player is not assigned to any team yet",
    )));
    let session = session(&api, &cache);
    session.login("Ada Lovelace", "ada").await.unwrap();

    assert!(session.load_team().await.unwrap().is_none());
    assert!(session.team().is_none());
}

#[tokio::test]
async fn load_team_falls_back_to_the_cached_team() {
    let (api, cache) = fixture();
    api.push_login(Ok(player(1, "ada")));
    api.push_team(Ok(team(7, "Vikings", 50, 1)));
    let session = session(&api, &cache);
    session.login("Ada Lovelace", "ada").await.unwrap();

    // First load succeeds and caches.
    assert_eq!(session.load_team().await.unwrap().unwrap().id, 7);

    // Second load hits an empty script (network error) and serves the
    // cached copy.
    let cached = session.load_team().await.unwrap().unwrap();
    assert_eq!(cached.name, "Vikings");
    assert_eq!(api.team_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn cached_team_fallback_reconciles_the_rank() {
    let (api, cache) = fixture();
    api.push_login(Ok(player(1, "ada")));
    let session = session(&api, &cache);
    session.login("Ada Lovelace", "ada").await.unwrap();

    // The snapshot arrives before any team is known.
    session.apply_leaderboard(&json!([
        {"rank": 1, "id": 5, "name": "Pirates", "level": 4, "xp": 300},
        {"rank": 2, "id": 7, "name": "Vikings", "level": 3, "xp": 200},
    ]));
    assert_eq!(session.team_rank(), None);

    // The fetch fails, but a previous run left a cached team behind.
    cache::store(cache.as_ref(), keys::TEAM, &team(7, "Vikings", 50, 1));
    let fallback = session.load_team().await.unwrap().unwrap();
    assert_eq!(fallback.id, 7);

    // Adopting the cached team joins it with the held snapshot.
    assert_eq!(session.team_rank(), Some(2));
    assert_eq!(session.team().unwrap().xp, 200);
}

#[tokio::test]
async fn rename_team_adopts_the_backend_copy() {
    let (api, cache) = fixture();
    api.push_rename(Ok(team(7, "Renamed Vikings", 50, 1)));
    cache::store(cache.as_ref(), keys::TEAM, &team(7, "Vikings", 50, 1));
    let session = session(&api, &cache);

    let renamed = session.rename_team(7, "Renamed Vikings").await.unwrap();
    assert_eq!(renamed.name, "Renamed Vikings");
    assert_eq!(session.team().unwrap().name, "Renamed Vikings");
    assert_eq!(
        cache::load::<treasure_hunt_client::Team>(cache.as_ref(), keys::TEAM)
            .unwrap()
            .name,
        "Renamed Vikings"
    );
}

// ════════════════════════════════════════════════════════════════════
// Settings
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn settings_fetch_failure_keeps_the_defaults() {
    let (api, cache) = fixture();
    let session = session(&api, &cache);

    let settings = session.load_settings().await;
    assert_eq!(settings, GameSettings::default());

    // A later successful fetch replaces and persists them.
    api.push_settings(Ok(GameSettings {
        xp_per_level: 100,
        attempts_until_cooldown: 5,
        cooldown_duration: 120,
    }));
    let settings = session.load_settings().await;
    assert_eq!(settings.xp_per_level, 100);
    assert_eq!(
        cache::load::<GameSettings>(cache.as_ref(), keys::GAME_SETTINGS)
            .unwrap()
            .cooldown_duration,
        120
    );
}

// ════════════════════════════════════════════════════════════════════
// Puzzle board
// ════════════════════════════════════════════════════════════════════

fn board(api: &Arc<MockApi>, cache: &Arc<MemoryCache>, now_ms: i64) -> PuzzleBoard {
    PuzzleBoard::new(
        7,
        GameSettings::default(),
        Arc::clone(api) as _,
        Arc::clone(cache) as Arc<dyn Cache>,
        now_ms,
    )
}

#[tokio::test]
async fn board_seeds_from_cache_and_refreshes_over_rest() {
    let (api, cache) = fixture();
    cache::store(
        cache.as_ref(),
        &keys::team_puzzles(7),
        &vec![puzzle(1, 10, "The Locked Chest", false)],
    );
    api.push_puzzles(Ok(vec![
        puzzle(1, 10, "The Locked Chest", false),
        puzzle(2, 11, "The Map Cipher", false),
    ]));

    let mut board = board(&api, &cache, 0);
    assert_eq!(board.puzzles().len(), 1);

    board.refresh().await.unwrap();
    assert_eq!(board.puzzles().len(), 2);
    // Write-through: the cache holds the refreshed list.
    let cached: Vec<treasure_hunt_client::TeamPuzzle> =
        cache::load(cache.as_ref(), &keys::team_puzzles(7)).unwrap();
    assert_eq!(cached.len(), 2);
}

#[tokio::test]
async fn wrong_answers_lead_to_a_cooldown_and_expiry_reopens() {
    let (api, cache) = fixture();
    api.push_puzzles(Ok(vec![puzzle(1, 10, "The Locked Chest", false)]));
    let mut board = board(&api, &cache, 0);
    board.refresh().await.unwrap();

    let now = 1_000_000;
    for _ in 0..3 {
        api.push_submit(Ok(SubmitOutcome {
            success: false,
            message: Some("Wrong answer".into()),
        }));
        let result = board.submit(10, "guess", now).await.unwrap();
        assert!(matches!(result, SubmitResult::Incorrect { .. }));
    }

    // Third failure started the 60-second cooldown; nothing is sent now.
    let result = board.submit(10, "again", now + 1_000).await.unwrap();
    assert!(matches!(result, SubmitResult::CoolingDown { .. }));
    assert_eq!(api.submit_calls.load(Ordering::Relaxed), 3);

    // After expiry the puzzle reopens with a clean slate.
    assert_eq!(
        board.attempt_state(10, now + 61_000),
        AttemptState::Open { failed_attempts: 0 }
    );
}

#[tokio::test]
async fn backend_rejection_counts_as_a_failed_attempt() {
    let (api, cache) = fixture();
    api.push_puzzles(Ok(vec![puzzle(1, 10, "The Locked Chest", false)]));
    let mut board = board(&api, &cache, 0);
    board.refresh().await.unwrap();

    api.push_submit(Err(SyncError::api(422, "Answer cannot be empty")));
    let result = board.submit(10, "", 1_000).await.unwrap();
    match result {
        SubmitResult::Incorrect { message } => {
            assert_eq!(message.as_deref(), Some("Answer cannot be empty"));
        }
        other => panic!("expected Incorrect, got {other:?}"),
    }
    assert_eq!(
        board.attempt_state(10, 1_000),
        AttemptState::Open { failed_attempts: 1 }
    );
}

#[tokio::test]
async fn correct_answer_solves_and_is_terminal() {
    let (api, cache) = fixture();
    api.push_puzzles(Ok(vec![puzzle(1, 10, "The Locked Chest", false)]));
    let mut board = board(&api, &cache, 0);
    board.refresh().await.unwrap();

    api.push_submit(Ok(SubmitOutcome {
        success: true,
        message: None,
    }));
    assert_eq!(board.submit(10, "x", 1_000).await.unwrap(), SubmitResult::Correct);
    assert!(board.puzzles()[0].solved);
    assert!(board.all_solved());

    // No further requests for a solved puzzle.
    assert_eq!(
        board.submit(10, "x", 2_000).await.unwrap(),
        SubmitResult::AlreadySolved
    );
    assert_eq!(api.submit_calls.load(Ordering::Relaxed), 1);

    // A rebuilt board sees the solved flag from the cache.
    let mut rebuilt = PuzzleBoard::new(
        7,
        GameSettings::default(),
        Arc::clone(&api) as _,
        Arc::clone(&cache) as Arc<dyn Cache>,
        2_000,
    );
    assert_eq!(rebuilt.attempt_state(10, 2_000), AttemptState::Solved);
}

#[tokio::test]
async fn cooldown_survives_a_board_rebuild() {
    let (api, cache) = fixture();
    api.push_puzzles(Ok(vec![puzzle(1, 10, "The Locked Chest", false)]));
    let mut board = board(&api, &cache, 0);
    board.refresh().await.unwrap();

    let now = 1_000_000;
    for _ in 0..3 {
        api.push_submit(Ok(SubmitOutcome {
            success: false,
            message: None,
        }));
        board.submit(10, "guess", now).await.unwrap();
    }

    let mut rebuilt = PuzzleBoard::new(
        7,
        GameSettings::default(),
        Arc::clone(&api) as _,
        Arc::clone(&cache) as Arc<dyn Cache>,
        now + 30_000,
    );
    assert_eq!(
        rebuilt.attempt_state(10, now + 30_000),
        AttemptState::Cooldown {
            until_ms: now + 60_000,
            attempts: 3
        }
    );
}

#[tokio::test]
async fn push_updates_replace_the_board() {
    let (api, cache) = fixture();
    api.push_puzzles(Ok(vec![puzzle(1, 10, "The Locked Chest", false)]));
    let mut board = board(&api, &cache, 0);
    board.refresh().await.unwrap();

    board.apply_update(&json!([
        {"id": 1, "puzzleId": 10, "puzzleTitle": "The Locked Chest", "solved": true}
    ]));
    assert!(board.puzzles()[0].solved);

    // Malformed pushes keep the previous board.
    board.apply_update(&json!({"nope": true}));
    assert_eq!(board.puzzles().len(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Full game flow
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn a_full_game_runs_end_to_end() {
    let (api, cache) = fixture();
    let session = session(&api, &cache);

    // Waiting room: log in and watch the roster grow.
    session.set_phase(GamePhase::WaitingForPlayers);
    api.push_login(Ok(player(1, "ada")));
    session.login("Ada Lovelace", "ada").await.unwrap();
    session.apply_roster(&json!([{"id": 1, "fullName": "Ada Lovelace", "username": "ada"}]));
    session.apply_roster(&json!({"id": 2, "fullName": "Grace Hopper", "username": "grace"}));
    assert_eq!(session.waiting_players().len(), 2);

    // Teams are arranged and the game starts.
    session.apply_phase(&json!({"state": "ARRANGING_TEAMS"}));
    api.push_team(Ok(team(7, "Vikings", 0, 1)));
    let our_team = session.load_team().await.unwrap().unwrap();
    assert_eq!(our_team.id, 7);
    session.apply_phase(&json!("IN_PROGRESS"));

    // Solve the single puzzle.
    api.push_puzzles(Ok(vec![puzzle(1, 10, "The Locked Chest", false)]));
    let mut board = board(&api, &cache, 0);
    board.refresh().await.unwrap();
    api.push_submit(Ok(SubmitOutcome {
        success: true,
        message: None,
    }));
    assert_eq!(board.submit(10, "treasure", 1_000).await.unwrap(), SubmitResult::Correct);

    // Scoring lands on the leaderboard; rank and xp come together.
    session.apply_leaderboard(&json!([
        {"rank": 1, "id": 7, "name": "Vikings", "level": 2, "xp": 150},
        {"rank": 2, "id": 8, "name": "Pirates", "level": 1, "xp": 60},
    ]));
    assert_eq!(session.team_rank(), Some(1));
    assert_eq!(session.team().unwrap().xp, 150);

    // Game over: our team won, the celebration shows once.
    session.apply_phase(&json!({"gameState": "FINISHED"}));
    assert_eq!(session.phase(), GamePhase::Finished);
    assert_eq!(session.winner().unwrap().id, 7);
    assert!(!session.victory_already_shown());
    session.mark_victory_shown();
    assert!(session.victory_already_shown());

    // Backend reset wipes the identity for the next game.
    session.apply_phase(&json!("NOT_STARTED"));
    assert!(session.player().is_none());
    assert!(session.team().is_none());
    assert!(!session.victory_already_shown());
}
