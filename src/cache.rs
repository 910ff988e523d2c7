//! Durable key/value cache used to seed UI state instantly on load and to
//! survive reloads.
//!
//! The cache is an injected abstraction rather than ambient global storage:
//! construct a [`JsonFileCache`] (durable) or [`MemoryCache`] (tests,
//! ephemeral sessions) and pass it where needed. Writes are whole-value
//! replace, last-writer-wins; there is no merge or compare-and-swap, since
//! game data is overwrite-only per key.
//!
//! Cache failures are never fatal: I/O problems are logged and swallowed, and
//! a value that no longer deserializes reads as absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Key/value persistence seam shared by every component that caches state.
pub trait Cache: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: Value);

    /// Remove `key` and its value. Removing an absent key is a no-op.
    fn remove(&self, key: &str);
}

/// Read a typed value from the cache. A missing key or a value that fails to
/// deserialize both read as `None`.
pub fn load<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let value = cache.get(key)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, "cached value no longer deserializes: {e}");
            None
        }
    }
}

/// Write a typed value to the cache.
pub fn store<T: Serialize>(cache: &dyn Cache, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => cache.set(key, v),
        Err(e) => warn!(key, "failed to serialize value for cache: {e}"),
    }
}

/// Well-known cache keys.
pub mod keys {
    /// Logged-in player identity.
    pub const PLAYER: &str = "player";
    /// Assigned team (full object).
    pub const TEAM: &str = "team";
    /// Assigned team id, stored separately for cheap lookups.
    pub const TEAM_ID: &str = "teamId";
    /// Last observed game phase.
    pub const GAME_STATE: &str = "gameState";
    /// Server-supplied game settings.
    pub const GAME_SETTINGS: &str = "gameSettings";
    /// Last received leaderboard snapshot.
    pub const LEADERBOARD: &str = "leaderboard";
    /// Session-scoped "victory animation already shown" flag.
    pub const VICTORY_SHOWN: &str = "congratulationsShown";

    /// Puzzle list for one team.
    pub fn team_puzzles(team_id: i64) -> String {
        format!("teamPuzzles_{team_id}")
    }

    /// Cooldown record (`{endTime, attempts}`) for one puzzle.
    pub fn puzzle_cooldown(puzzle_id: i64) -> String {
        format!("puzzle_cooldown_{puzzle_id}")
    }
}

/// Remove the player/team identity and the victory flag. Called when the
/// backend resets the game to `NOT_STARTED`.
pub fn clear_identity(cache: &dyn Cache) {
    cache.remove(keys::PLAYER);
    cache.remove(keys::TEAM);
    cache.remove(keys::TEAM_ID);
    cache.remove(keys::VICTORY_SHOWN);
}

// ── In-memory cache ─────────────────────────────────────────────────

/// Non-durable cache backed by a `HashMap`. The substitute for durable
/// storage in tests, also usable for throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        match self.entries.lock() {
            Ok(entries) => entries.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn set(&self, key: &str, value: Value) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key.to_owned(), value);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key.to_owned(), value);
            }
        }
    }

    fn remove(&self, key: &str) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.remove(key);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(key);
            }
        }
    }
}

// ── File-backed cache ───────────────────────────────────────────────

/// Durable cache persisting all entries as one JSON object in a file.
///
/// Entries are loaded once at open; every mutation rewrites the file
/// (write-through), so the on-disk state never lags a successful update.
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, Value>>,
}

impl JsonFileCache {
    /// Open (or create) the cache file at `path`.
    ///
    /// An unreadable or corrupt file starts the cache empty rather than
    /// failing: stale local state is recoverable, a blocked client is not.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::read_entries(&path).unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn read_entries(path: &Path) -> Option<HashMap<String, Value>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), "failed to read cache file: {e}");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(path = %path.display(), "cache file is corrupt, starting empty: {e}");
                None
            }
        }
    }

    fn persist(&self, entries: &HashMap<String, Value>) {
        let json = match serde_json::to_vec_pretty(entries) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize cache contents: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!(path = %self.path.display(), "failed to write cache file: {e}");
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Cache for JsonFileCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.with_entries(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) {
        self.with_entries(|entries| {
            entries.insert(key.to_owned(), value);
            self.persist(entries);
        });
    }

    fn remove(&self, key: &str) {
        self.with_entries(|entries| {
            if entries.remove(key).is_some() {
                self.persist(entries);
            }
        });
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
    use crate::types::{Player, Team};
    use serde_json::json;

    fn temp_cache_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "treasure-hunt-cache-{tag}-{}.json",
            uuid::Uuid::new_v4()
        ));
        path
    }

    #[test]
    fn memory_cache_round_trip() {
        let cache = MemoryCache::new();
        cache.set("k", json!({"a": 1}));
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));

        cache.set("k", json!(2));
        assert_eq!(cache.get("k"), Some(json!(2)));

        cache.remove("k");
        assert!(cache.get("k").is_none());
        // Removing again is a no-op.
        cache.remove("k");
    }

    #[test]
    fn typed_load_ignores_undeserializable_values() {
        let cache = MemoryCache::new();
        cache.set(keys::TEAM, json!("not a team"));
        let team: Option<Team> = load(&cache, keys::TEAM);
        assert!(team.is_none());
    }

    #[test]
    fn clear_identity_removes_player_and_team_keys() {
        let cache = MemoryCache::new();
        let player = Player {
            id: 1,
            full_name: "Ada".into(),
            username: "ada".into(),
            team_id: Some(7),
        };
        store(&cache, keys::PLAYER, &player);
        cache.set(keys::TEAM_ID, json!(7));
        cache.set(keys::VICTORY_SHOWN, json!(true));
        cache.set(keys::LEADERBOARD, json!([]));

        clear_identity(&cache);

        assert!(cache.get(keys::PLAYER).is_none());
        assert!(cache.get(keys::TEAM_ID).is_none());
        assert!(cache.get(keys::VICTORY_SHOWN).is_none());
        // Non-identity keys survive a reset.
        assert!(cache.get(keys::LEADERBOARD).is_some());
    }

    #[test]
    fn file_cache_survives_reopen() {
        let path = temp_cache_path("reopen");

        {
            let cache = JsonFileCache::open(&path);
            cache.set("phase", json!("IN_PROGRESS"));
            cache.set("teamId", json!(7));
        }

        let cache = JsonFileCache::open(&path);
        assert_eq!(cache.get("phase"), Some(json!("IN_PROGRESS")));
        assert_eq!(cache.get("teamId"), Some(json!(7)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn file_cache_starts_empty_on_corrupt_file() {
        let path = temp_cache_path("corrupt");
        std::fs::write(&path, b"{{{{ not json").unwrap();

        let cache = JsonFileCache::open(&path);
        assert!(cache.get("anything").is_none());

        let _ = std::fs::remove_file(&path);
    }
}
