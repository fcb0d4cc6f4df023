use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::state::lifecycle::GameStatus;

/// Aggregate game entity persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Primary key of the game.
    pub id: Uuid,
    /// Short human-entry join code (uppercase alphanumeric).
    pub code: String,
    /// Lifecycle status.
    pub status: GameStatus,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Set when the game enters the running status.
    pub started_at: Option<SystemTime>,
    /// Advisory end of the timed session.
    pub ends_at: Option<SystemTime>,
    /// Number of credited puzzles so far; never decreases.
    pub current_puzzle_index: u32,
    /// Remaining hints for the whole group.
    pub hints_left: u32,
    /// Seed for any puzzle randomization.
    pub seed: u32,
    /// Number of reserved player slots.
    pub player_count: u32,
}

impl GameEntity {
    /// Build a fresh waiting game with no players yet.
    pub fn new(code: String, seed: u32, hints_left: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            status: GameStatus::Waiting,
            created_at: SystemTime::now(),
            started_at: None,
            ends_at: None,
            current_puzzle_index: 0,
            hints_left,
            seed,
            player_count: 0,
        }
    }

    /// Whether the session deadline has passed at `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.ends_at.is_some_and(|ends_at| ends_at <= now)
    }

    /// Whether more than `retention` elapsed since the session deadline, or
    /// since creation for games that never got one.
    pub fn is_past_retention(&self, retention: Duration, now: SystemTime) -> bool {
        now.duration_since(self.ends_at.unwrap_or(self.created_at))
            .is_ok_and(|age| age > retention)
    }

    /// Whether the game was created more than `max_age` before `now`.
    pub fn is_older_than(&self, max_age: Duration, now: SystemTime) -> bool {
        now.duration_since(self.created_at)
            .is_ok_and(|age| age > max_age)
    }
}

/// Field updates applied together with a status compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameTransition {
    /// Status the game must currently hold for the update to apply.
    pub from: GameStatus,
    /// Status written when the precondition holds.
    pub to: GameStatus,
    /// Optional start timestamp to record.
    pub started_at: Option<SystemTime>,
    /// Optional session deadline to record.
    pub ends_at: Option<SystemTime>,
}

impl GameTransition {
    /// Transition without timestamp changes.
    pub fn new(from: GameStatus, to: GameStatus) -> Self {
        Self {
            from,
            to,
            started_at: None,
            ends_at: None,
        }
    }

    /// Record the session window alongside the transition.
    pub fn with_window(mut self, started_at: SystemTime, ends_at: SystemTime) -> Self {
        self.started_at = Some(started_at);
        self.ends_at = Some(ends_at);
        self
    }
}

/// Player belonging to exactly one game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Primary key of the player.
    pub id: Uuid,
    /// Owning game.
    pub game_id: Uuid,
    /// Display name.
    pub nickname: String,
    /// Freeform role tag.
    pub role: String,
    /// Join timestamp, used for roster ordering.
    pub joined_at: SystemTime,
    /// Presence flag, also read as readiness by the roster.
    pub is_connected: bool,
    /// Accumulated score; never decreases.
    pub score_total: i64,
}

impl PlayerEntity {
    /// Build a freshly joined player.
    pub fn new(game_id: Uuid, nickname: String, role: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            game_id,
            nickname,
            role,
            joined_at: SystemTime::now(),
            is_connected: true,
            score_total: 0,
        }
    }
}

/// Per-game runtime state tracking the current puzzle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeStateEntity {
    /// Owning game (1:1).
    pub game_id: Uuid,
    /// Slug of the puzzle the group is working on.
    pub current_puzzle_slug: String,
    /// Submissions against the current puzzle, all players included.
    pub attempts: u32,
    /// Whether any player solved the current puzzle.
    pub solved: bool,
    /// Opaque blob relayed for visual sync.
    pub puzzle_state: Option<serde_json::Value>,
}

impl RuntimeStateEntity {
    /// Fresh runtime state positioned on `slug`.
    pub fn starting_at(game_id: Uuid, slug: impl Into<String>) -> Self {
        Self {
            game_id,
            current_puzzle_slug: slug.into(),
            attempts: 0,
            solved: false,
            puzzle_state: None,
        }
    }
}

/// Ledger entry recording which player earned the credit for a puzzle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PuzzleCompletionEntity {
    /// Game the puzzle belongs to.
    pub game_id: Uuid,
    /// Solved puzzle.
    pub puzzle_slug: String,
    /// Player credited with the solve.
    pub completed_by: Uuid,
    /// Time of the winning claim.
    pub completed_at: SystemTime,
}

/// Personal attempt history of one player on one puzzle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerPuzzleProgressEntity {
    /// Player owning the record.
    pub player_id: Uuid,
    /// Game of the player.
    pub game_id: Uuid,
    /// Puzzle the attempts target.
    pub puzzle_slug: String,
    /// Number of submissions by this player.
    pub attempts: u32,
    /// Whether this player submitted a correct answer.
    pub solved: bool,
    /// Points credited to this player for the puzzle (0 when uncredited).
    pub score_awarded: i64,
    /// Last update timestamp.
    pub updated_at: SystemTime,
}

impl PlayerPuzzleProgressEntity {
    /// Empty record, before its first attempt is counted.
    pub fn empty(player_id: Uuid, game_id: Uuid, puzzle_slug: impl Into<String>) -> Self {
        Self {
            player_id,
            game_id,
            puzzle_slug: puzzle_slug.into(),
            attempts: 0,
            solved: false,
            score_awarded: 0,
            updated_at: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_game_starts_waiting_without_players() {
        let game = GameEntity::new("ABC123".into(), 42, 3);
        assert_eq!(game.status, GameStatus::Waiting);
        assert_eq!(game.player_count, 0);
        assert_eq!(game.current_puzzle_index, 0);
        assert!(game.started_at.is_none());
    }

    #[test]
    fn expiry_requires_a_deadline() {
        let mut game = GameEntity::new("ABC123".into(), 1, 3);
        let now = SystemTime::now();
        assert!(!game.is_expired_at(now));

        game.ends_at = Some(now - Duration::from_secs(1));
        assert!(game.is_expired_at(now));
    }

    #[test]
    fn retention_counts_from_the_deadline() {
        let mut game = GameEntity::new("ABC123".into(), 1, 3);
        let now = SystemTime::now();
        game.created_at = now - Duration::from_secs(7_200);
        game.ends_at = Some(now - Duration::from_secs(600));
        assert!(game.is_past_retention(Duration::from_secs(300), now));
        assert!(!game.is_past_retention(Duration::from_secs(900), now));
    }

    #[test]
    fn age_is_measured_from_creation() {
        let mut game = GameEntity::new("ABC123".into(), 1, 3);
        let now = SystemTime::now();
        game.created_at = now - Duration::from_secs(600);
        assert!(game.is_older_than(Duration::from_secs(300), now));
        assert!(!game.is_older_than(Duration::from_secs(900), now));
    }
}
