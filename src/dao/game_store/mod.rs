pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    GameEntity, GameTransition, PlayerEntity, PlayerPuzzleProgressEntity,
    PuzzleCompletionEntity, RuntimeStateEntity,
};
use crate::dao::storage::StorageResult;
use crate::state::lifecycle::GameStatus;

/// Record store for games, players, runtime state and the completion ledger.
///
/// Every operation touching a value shared between connections is atomic on
/// the backend side: callers never read a counter, compute and write it back.
pub trait GameStore: Send + Sync {
    /// Insert a new game; returns `false` when its code is already held by a
    /// non-abandoned game.
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Look up a non-abandoned game by its (already normalized) join code.
    fn find_game_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Waiting games with fewer than `capacity` players, most recent first.
    fn list_joinable_games(
        &self,
        capacity: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>>;
    fn list_games_by_status(
        &self,
        status: GameStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>>;
    /// Compare-and-set the game status; returns `false` when the game is not
    /// in `transition.from` anymore.
    fn transition_game(
        &self,
        id: Uuid,
        transition: GameTransition,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn advance_puzzle_index(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Reserve a player slot when the game is open and below `capacity`.
    fn reserve_player_slot(
        &self,
        game_id: Uuid,
        capacity: u32,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn release_player_slot(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Players of a game ordered by join time.
    fn list_players(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    /// Returns `false` when the player does not belong to the game.
    fn set_player_connected(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn add_player_score(&self, player_id: Uuid, points: i64)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Create or reset the runtime state of a game.
    fn reset_runtime_state(
        &self,
        state: RuntimeStateEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn find_runtime_state(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RuntimeStateEntity>>>;
    /// Count a submission against the current puzzle; returns `false` when
    /// `slug` is not the current puzzle.
    fn record_game_attempt(
        &self,
        game_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Move the runtime state off `solved_slug`: to `next_slug` with fresh
    /// counters, or mark it solved when there is no next puzzle. No-op when the
    /// runtime state already moved on.
    fn advance_runtime(
        &self,
        game_id: Uuid,
        solved_slug: String,
        next_slug: Option<String>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn set_puzzle_state(
        &self,
        game_id: Uuid,
        puzzle_state: serde_json::Value,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Count one submission in the player's personal history and return the
    /// updated record.
    fn record_player_attempt(
        &self,
        player_id: Uuid,
        game_id: Uuid,
        slug: String,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<PlayerPuzzleProgressEntity>>;
    fn find_player_progress(
        &self,
        player_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerPuzzleProgressEntity>>>;
    /// Mark the puzzle solved and credited for the player; returns `false`
    /// when points were already awarded on this record.
    fn credit_player_puzzle(
        &self,
        player_id: Uuid,
        slug: String,
        points: i64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Mark a correct but uncredited submission.
    fn mark_player_solved(
        &self,
        player_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Insert the ledger entry iff none exists for (game, slug) and the game is
    /// still running; a game finished concurrently wins over the claim.
    fn claim_completion(
        &self,
        completion: PuzzleCompletionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_completion(
        &self,
        game_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<Option<PuzzleCompletionEntity>>>;
    /// Ledger entries of a game ordered by completion time.
    fn list_completions(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PuzzleCompletionEntity>>>;
    /// Delete a game and every record it owns.
    fn delete_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
