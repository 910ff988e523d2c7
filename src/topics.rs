//! Broker topic names, one initial-snapshot and one live-update destination
//! per topic family.
//!
//! The team and puzzle families have no initial topic: they are seeded over
//! REST and only receive per-team change pushes.

/// Initial game-phase snapshot, delivered once per subscription.
pub const GAME_STATE_INITIAL: &str = "/app/game/state";

/// Game-phase change notifications.
pub const GAME_STATE_UPDATES: &str = "/topic/game/state";

/// Initial leaderboard snapshot.
pub const LEADERBOARD_INITIAL: &str = "/app/leaderboard";

/// Full leaderboard replacement on every scoring change.
pub const LEADERBOARD_UPDATES: &str = "/topic/leaderboard";

/// Initial waiting-room roster.
pub const ROSTER_INITIAL: &str = "/app/players";

/// One message per newly joined player.
pub const ROSTER_UPDATES: &str = "/topic/players";

/// Outbound destination announcing the local player to the waiting room.
pub const ROSTER_ANNOUNCE: &str = "/app/players/create";

/// Change notifications for one team (xp, level, name, membership).
pub fn team_updates(team_id: i64) -> String {
    format!("/topic/teams/{team_id}")
}

/// Full puzzle-list replacement for one team.
pub fn team_puzzle_updates(team_id: i64) -> String {
    format!("/topic/team-puzzles/{team_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_team_topics_embed_the_id() {
        assert_eq!(team_updates(7), "/topic/teams/7");
        assert_eq!(team_puzzle_updates(42), "/topic/team-puzzles/42");
    }
}
