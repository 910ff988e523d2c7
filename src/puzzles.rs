//! Puzzle progress: per-puzzle attempt tracking with client-side cooldowns.
//!
//! The backend reports which puzzles are solved; the attempt counter and
//! the cooldown after too many wrong answers are purely client-side.
//! Cooldowns persist as an absolute end timestamp, so a restart mid-cooldown
//! resumes the countdown instead of resetting it.
//!
//! State machine per puzzle: open, cooling down, solved. A puzzle reopens
//! with a fresh attempt counter when its cooldown expires; solved is
//! terminal.
//!
//! Callers pass the current time explicitly (epoch milliseconds, see
//! [`epoch_ms`]) so expiry logic is deterministic under test.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::api::GameApi;
use crate::cache::{self, keys, Cache};
use crate::error::{Result, SyncError};
use crate::types::{
    CooldownRecord, GameSettings, PuzzleId, SubmitAnswerRequest, SubmitOutcome, TeamId, TeamPuzzle,
};

/// Current wall-clock time as epoch milliseconds.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Attempt state of one puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Submissions allowed; tracks wrong answers since the last reset.
    Open { failed_attempts: u32 },
    /// Submissions blocked until `until_ms` (epoch milliseconds).
    Cooldown { until_ms: i64, attempts: u32 },
    /// Correct answer accepted. Terminal.
    Solved,
}

/// Per-puzzle attempt and cooldown bookkeeping, persisted write-through.
#[derive(Debug)]
pub struct AttemptTracker {
    puzzle_id: PuzzleId,
    settings: GameSettings,
    state: AttemptState,
}

impl AttemptTracker {
    /// Fresh tracker with no recorded attempts.
    pub fn new(puzzle_id: PuzzleId, settings: GameSettings) -> Self {
        Self {
            puzzle_id,
            settings,
            state: AttemptState::Open { failed_attempts: 0 },
        }
    }

    /// Rebuild a tracker from its persisted record.
    ///
    /// A cooldown whose end time has already passed reopens the puzzle with
    /// a fresh attempt counter and drops the stale record.
    pub fn restore(
        puzzle_id: PuzzleId,
        settings: GameSettings,
        cache: &dyn Cache,
        now_ms: i64,
    ) -> Self {
        let key = keys::puzzle_cooldown(puzzle_id);
        let state = match cache::load::<CooldownRecord>(cache, &key) {
            Some(record) if record.end_time > now_ms => AttemptState::Cooldown {
                until_ms: record.end_time,
                attempts: record.attempts,
            },
            Some(record) if record.end_time > 0 => {
                debug!(puzzle_id, "cooldown expired while away, reopening");
                cache.remove(&key);
                AttemptState::Open { failed_attempts: 0 }
            }
            Some(record) => AttemptState::Open {
                failed_attempts: record.attempts,
            },
            None => AttemptState::Open { failed_attempts: 0 },
        };
        Self {
            puzzle_id,
            settings,
            state,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Whether a submission would be accepted at `now_ms`.
    pub fn can_attempt(&self, now_ms: i64) -> bool {
        match self.state {
            AttemptState::Open { .. } => true,
            AttemptState::Cooldown { until_ms, .. } => until_ms <= now_ms,
            AttemptState::Solved => false,
        }
    }

    /// Milliseconds of cooldown left, if cooling down at `now_ms`.
    pub fn remaining_ms(&self, now_ms: i64) -> Option<i64> {
        match self.state {
            AttemptState::Cooldown { until_ms, .. } if until_ms > now_ms => {
                Some(until_ms - now_ms)
            }
            _ => None,
        }
    }

    /// Reopen the puzzle if its cooldown has expired. Returns `true` when a
    /// transition happened.
    pub fn tick(&mut self, cache: &dyn Cache, now_ms: i64) -> bool {
        if let AttemptState::Cooldown { until_ms, .. } = self.state {
            if until_ms <= now_ms {
                self.state = AttemptState::Open { failed_attempts: 0 };
                cache.remove(&keys::puzzle_cooldown(self.puzzle_id));
                return true;
            }
        }
        false
    }

    /// Count a wrong answer; entering cooldown once the configured attempt
    /// budget is exhausted. No-op while cooling down or solved.
    pub fn record_failure(&mut self, cache: &dyn Cache, now_ms: i64) {
        let AttemptState::Open { failed_attempts } = self.state else {
            return;
        };
        let failed = failed_attempts.saturating_add(1);
        let key = keys::puzzle_cooldown(self.puzzle_id);
        if failed >= self.settings.attempts_until_cooldown {
            let until_ms = now_ms + i64::from(self.settings.cooldown_duration) * 1000;
            self.state = AttemptState::Cooldown {
                until_ms,
                attempts: failed,
            };
            cache::store(
                cache,
                &key,
                &CooldownRecord {
                    end_time: until_ms,
                    attempts: failed,
                },
            );
            debug!(puzzle_id = self.puzzle_id, until_ms, "puzzle entered cooldown");
        } else {
            self.state = AttemptState::Open {
                failed_attempts: failed,
            };
            cache::store(
                cache,
                &key,
                &CooldownRecord {
                    end_time: 0,
                    attempts: failed,
                },
            );
        }
    }

    /// Mark the puzzle solved and drop its persisted record.
    pub fn record_success(&mut self, cache: &dyn Cache) {
        self.state = AttemptState::Solved;
        cache.remove(&keys::puzzle_cooldown(self.puzzle_id));
    }
}

/// Result of an answer submission as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    /// Correct answer; the puzzle is now solved.
    Correct,
    /// Wrong answer (or a rejected submission); a failed attempt was
    /// recorded.
    Incorrect { message: Option<String> },
    /// Submission blocked; the puzzle is cooling down.
    CoolingDown { remaining_ms: i64 },
    /// The puzzle was already solved; nothing was sent.
    AlreadySolved,
}

/// A team's puzzle list plus per-puzzle attempt trackers.
///
/// Seeds from the cache for instant display, refreshes over REST, and
/// applies broker pushes write-through.
pub struct PuzzleBoard {
    team_id: TeamId,
    settings: GameSettings,
    puzzles: Vec<TeamPuzzle>,
    trackers: HashMap<PuzzleId, AttemptTracker>,
    api: Arc<dyn GameApi>,
    cache: Arc<dyn Cache>,
}

impl PuzzleBoard {
    /// Build a board seeded from the cache. Trackers are restored for every
    /// cached puzzle so cooldowns survive a restart.
    pub fn new(
        team_id: TeamId,
        settings: GameSettings,
        api: Arc<dyn GameApi>,
        cache: Arc<dyn Cache>,
        now_ms: i64,
    ) -> Self {
        let puzzles: Vec<TeamPuzzle> =
            cache::load(cache.as_ref(), &keys::team_puzzles(team_id)).unwrap_or_default();
        let mut trackers = HashMap::new();
        for puzzle in &puzzles {
            let tracker = if puzzle.solved {
                let mut t = AttemptTracker::new(puzzle.puzzle_id, settings);
                t.record_success(cache.as_ref());
                t
            } else {
                AttemptTracker::restore(puzzle.puzzle_id, settings, cache.as_ref(), now_ms)
            };
            trackers.insert(puzzle.puzzle_id, tracker);
        }
        Self {
            team_id,
            settings,
            puzzles,
            trackers,
            api,
            cache,
        }
    }

    pub fn team_id(&self) -> TeamId {
        self.team_id
    }

    pub fn puzzles(&self) -> &[TeamPuzzle] {
        &self.puzzles
    }

    /// Whether every puzzle on the board is solved. `false` on an empty
    /// board.
    pub fn all_solved(&self) -> bool {
        !self.puzzles.is_empty() && self.puzzles.iter().all(|p| p.solved)
    }

    /// Attempt state of one puzzle, with expired cooldowns already
    /// reopened.
    pub fn attempt_state(&mut self, puzzle_id: PuzzleId, now_ms: i64) -> AttemptState {
        let cache = Arc::clone(&self.cache);
        let tracker = self.tracker_mut(puzzle_id);
        tracker.tick(cache.as_ref(), now_ms);
        tracker.state()
    }

    /// Replace the board with the backend's authoritative list.
    pub async fn refresh(&mut self) -> Result<()> {
        let puzzles = self.api.team_puzzles(self.team_id).await?;
        self.replace(puzzles);
        Ok(())
    }

    /// Apply a broker push carrying the full replacement list. Malformed
    /// payloads are logged and ignored, keeping the previous board.
    pub fn apply_update(&mut self, payload: &Value) {
        match serde_json::from_value::<Vec<TeamPuzzle>>(payload.clone()) {
            Ok(puzzles) => self.replace(puzzles),
            Err(e) => warn!(team_id = self.team_id, "ignoring malformed puzzle push: {e}"),
        }
    }

    /// Submit an answer for one puzzle.
    ///
    /// A wrong answer, and any backend rejection, counts as a failed
    /// attempt toward the cooldown. While cooling down nothing is sent.
    ///
    /// # Errors
    ///
    /// Propagates non-API failures (serialization, client shutdown). API
    /// rejections are folded into [`SubmitResult::Incorrect`].
    pub async fn submit(
        &mut self,
        puzzle_id: PuzzleId,
        answer: &str,
        now_ms: i64,
    ) -> Result<SubmitResult> {
        let cache = Arc::clone(&self.cache);
        let api = Arc::clone(&self.api);

        {
            let tracker = self.tracker_mut(puzzle_id);
            tracker.tick(cache.as_ref(), now_ms);
            match tracker.state() {
                AttemptState::Solved => return Ok(SubmitResult::AlreadySolved),
                AttemptState::Cooldown { until_ms, .. } => {
                    return Ok(SubmitResult::CoolingDown {
                        remaining_ms: until_ms - now_ms,
                    });
                }
                AttemptState::Open { .. } => {}
            }
        }

        let request = SubmitAnswerRequest {
            team_id: self.team_id,
            puzzle_id,
            answer: answer.to_owned(),
        };
        let outcome = match api.submit_answer(&request).await {
            Ok(outcome) => outcome,
            Err(SyncError::Api { message, .. }) => SubmitOutcome {
                success: false,
                message: Some(message),
            },
            Err(e) => return Err(e),
        };

        if outcome.success {
            self.tracker_mut(puzzle_id).record_success(cache.as_ref());
            self.mark_solved(puzzle_id);
            Ok(SubmitResult::Correct)
        } else {
            self.tracker_mut(puzzle_id)
                .record_failure(cache.as_ref(), now_ms);
            Ok(SubmitResult::Incorrect {
                message: outcome.message,
            })
        }
    }

    fn tracker_mut(&mut self, puzzle_id: PuzzleId) -> &mut AttemptTracker {
        let settings = self.settings;
        self.trackers
            .entry(puzzle_id)
            .or_insert_with(|| AttemptTracker::new(puzzle_id, settings))
    }

    fn replace(&mut self, puzzles: Vec<TeamPuzzle>) {
        for puzzle in &puzzles {
            if puzzle.solved {
                if let Some(tracker) = self.trackers.get_mut(&puzzle.puzzle_id) {
                    tracker.record_success(self.cache.as_ref());
                }
            }
        }
        self.puzzles = puzzles;
        cache::store(
            self.cache.as_ref(),
            &keys::team_puzzles(self.team_id),
            &self.puzzles,
        );
    }

    fn mark_solved(&mut self, puzzle_id: PuzzleId) {
        let mut changed = false;
        for puzzle in &mut self.puzzles {
            if puzzle.puzzle_id == puzzle_id && !puzzle.solved {
                puzzle.solved = true;
                changed = true;
            }
        }
        if changed {
            cache::store(
                self.cache.as_ref(),
                &keys::team_puzzles(self.team_id),
                &self.puzzles,
            );
        }
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

    fn settings() -> GameSettings {
        GameSettings {
            xp_per_level: 75,
            attempts_until_cooldown: 3,
            cooldown_duration: 60,
        }
    }

    #[test]
    fn cooldown_starts_after_configured_attempts() {
        let cache = MemoryCache::new();
        let mut tracker = AttemptTracker::new(1, settings());
        let now = 1_000_000;

        tracker.record_failure(&cache, now);
        tracker.record_failure(&cache, now);
        assert!(tracker.can_attempt(now));

        tracker.record_failure(&cache, now);
        assert!(!tracker.can_attempt(now));
        assert_eq!(
            tracker.state(),
            AttemptState::Cooldown {
                until_ms: now + 60_000,
                attempts: 3
            }
        );
        assert_eq!(tracker.remaining_ms(now + 10_000), Some(50_000));
    }

    #[test]
    fn cooldown_expiry_reopens_with_fresh_attempts() {
        let cache = MemoryCache::new();
        let mut tracker = AttemptTracker::new(1, settings());
        let now = 1_000_000;
        for _ in 0..3 {
            tracker.record_failure(&cache, now);
        }

        assert!(!tracker.tick(&cache, now + 59_999));
        assert!(tracker.tick(&cache, now + 60_000));
        assert_eq!(tracker.state(), AttemptState::Open { failed_attempts: 0 });
        assert!(cache.get(&keys::puzzle_cooldown(1)).is_none());
    }

    #[test]
    fn restore_resumes_an_active_cooldown() {
        let cache = MemoryCache::new();
        let now = 1_000_000;
        {
            let mut tracker = AttemptTracker::new(7, settings());
            for _ in 0..3 {
                tracker.record_failure(&cache, now);
            }
        }

        let tracker = AttemptTracker::restore(7, settings(), &cache, now + 30_000);
        assert_eq!(
            tracker.state(),
            AttemptState::Cooldown {
                until_ms: now + 60_000,
                attempts: 3
            }
        );
    }

    #[test]
    fn restore_drops_an_expired_cooldown() {
        let cache = MemoryCache::new();
        let now = 1_000_000;
        {
            let mut tracker = AttemptTracker::new(7, settings());
            for _ in 0..3 {
                tracker.record_failure(&cache, now);
            }
        }

        let tracker = AttemptTracker::restore(7, settings(), &cache, now + 61_000);
        assert_eq!(tracker.state(), AttemptState::Open { failed_attempts: 0 });
        assert!(cache.get(&keys::puzzle_cooldown(7)).is_none());
    }

    #[test]
    fn restore_keeps_partial_attempt_count() {
        let cache = MemoryCache::new();
        let now = 1_000_000;
        {
            let mut tracker = AttemptTracker::new(7, settings());
            tracker.record_failure(&cache, now);
            tracker.record_failure(&cache, now);
        }

        let tracker = AttemptTracker::restore(7, settings(), &cache, now);
        assert_eq!(tracker.state(), AttemptState::Open { failed_attempts: 2 });
    }

    #[test]
    fn solved_is_terminal() {
        let cache = MemoryCache::new();
        let mut tracker = AttemptTracker::new(1, settings());
        let now = 1_000_000;

        tracker.record_success(&cache);
        assert_eq!(tracker.state(), AttemptState::Solved);
        assert!(!tracker.can_attempt(now));

        tracker.record_failure(&cache, now);
        assert_eq!(tracker.state(), AttemptState::Solved);
        assert!(!tracker.tick(&cache, now + 1_000_000));
    }
}
