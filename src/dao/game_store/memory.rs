//! Process-local [`GameStore`] backed by concurrent maps.
//!
//! Each conditional operation runs under the shard lock of the record it
//! touches, which gives the same insert-or-fail and compare-and-set guarantees
//! as the database backends. Data does not survive a restart.

use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::GameStore,
        models::{
            GameEntity, GameTransition, PlayerEntity, PlayerPuzzleProgressEntity,
            PuzzleCompletionEntity, RuntimeStateEntity,
        },
        storage::StorageResult,
    },
    state::lifecycle::GameStatus,
};

type PuzzleKey = (Uuid, String);

/// In-memory record store, cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    games: DashMap<Uuid, GameEntity>,
    active_codes: DashMap<String, Uuid>,
    players: DashMap<Uuid, PlayerEntity>,
    runtime: DashMap<Uuid, RuntimeStateEntity>,
    progress: DashMap<PuzzleKey, PlayerPuzzleProgressEntity>,
    completions: DashMap<PuzzleKey, PuzzleCompletionEntity>,
}

impl MemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryInner {
    fn insert_game(&self, game: GameEntity) -> bool {
        match self.active_codes.entry(game.code.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(game.id);
                self.games.insert(game.id, game);
                true
            }
        }
    }

    fn find_game_by_code(&self, code: &str) -> Option<GameEntity> {
        let id = self.active_codes.get(code).map(|entry| *entry.value())?;
        self.games.get(&id).map(|game| game.clone())
    }

    fn games_where(&self, predicate: impl Fn(&GameEntity) -> bool) -> Vec<GameEntity> {
        let mut games: Vec<GameEntity> = self
            .games
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        games.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        games
    }

    fn transition_game(&self, id: Uuid, transition: GameTransition) -> bool {
        let released_code = {
            let Some(mut game) = self.games.get_mut(&id) else {
                return false;
            };
            if game.status != transition.from {
                return false;
            }
            game.status = transition.to;
            if let Some(started_at) = transition.started_at {
                game.started_at = Some(started_at);
            }
            if let Some(ends_at) = transition.ends_at {
                game.ends_at = Some(ends_at);
            }
            (transition.to == GameStatus::Abandoned).then(|| game.code.clone())
        };

        if let Some(code) = released_code {
            self.active_codes.remove_if(&code, |_, owner| *owner == id);
        }
        true
    }

    fn reserve_player_slot(&self, game_id: Uuid, capacity: u32) -> bool {
        let Some(mut game) = self.games.get_mut(&game_id) else {
            return false;
        };
        if !game.status.is_open() || game.player_count >= capacity {
            return false;
        }
        game.player_count += 1;
        true
    }

    fn list_players(&self, game_id: Uuid) -> Vec<PlayerEntity> {
        let mut players: Vec<PlayerEntity> = self
            .players
            .iter()
            .filter(|entry| entry.game_id == game_id)
            .map(|entry| entry.value().clone())
            .collect();
        players.sort_by_key(|player| player.joined_at);
        players
    }

    fn record_game_attempt(&self, game_id: Uuid, slug: &str) -> bool {
        match self.runtime.get_mut(&game_id) {
            Some(mut state) if state.current_puzzle_slug == slug => {
                state.attempts += 1;
                true
            }
            _ => false,
        }
    }

    fn advance_runtime(&self, game_id: Uuid, solved_slug: &str, next_slug: Option<String>) {
        let Some(mut state) = self.runtime.get_mut(&game_id) else {
            return;
        };
        if state.current_puzzle_slug != solved_slug {
            return;
        }
        match next_slug {
            Some(next) => {
                state.current_puzzle_slug = next;
                state.attempts = 0;
                state.solved = false;
                state.puzzle_state = None;
            }
            None => state.solved = true,
        }
    }

    fn record_player_attempt(
        &self,
        player_id: Uuid,
        game_id: Uuid,
        slug: String,
        at: SystemTime,
    ) -> PlayerPuzzleProgressEntity {
        let mut record = self
            .progress
            .entry((player_id, slug.clone()))
            .or_insert_with(|| PlayerPuzzleProgressEntity::empty(player_id, game_id, slug));
        record.attempts += 1;
        record.updated_at = at;
        record.clone()
    }

    fn credit_player_puzzle(&self, player_id: Uuid, slug: String, points: i64) -> bool {
        match self.progress.get_mut(&(player_id, slug)) {
            Some(mut record) if record.score_awarded == 0 => {
                record.solved = true;
                record.score_awarded = points;
                record.updated_at = SystemTime::now();
                true
            }
            _ => false,
        }
    }

    fn claim_completion(&self, completion: PuzzleCompletionEntity) -> bool {
        // Held across the insert so a status transition cannot interleave.
        let Some(game) = self.games.get(&completion.game_id) else {
            return false;
        };
        if game.status != GameStatus::Running {
            return false;
        }
        let key = (completion.game_id, completion.puzzle_slug.clone());
        match self.completions.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(completion);
                true
            }
        }
    }

    fn list_completions(&self, game_id: Uuid) -> Vec<PuzzleCompletionEntity> {
        let mut completions: Vec<PuzzleCompletionEntity> = self
            .completions
            .iter()
            .filter(|entry| entry.game_id == game_id)
            .map(|entry| entry.value().clone())
            .collect();
        completions.sort_by_key(|completion| completion.completed_at);
        completions
    }

    fn delete_game(&self, id: Uuid) -> bool {
        let Some((_, game)) = self.games.remove(&id) else {
            return false;
        };
        self.active_codes
            .remove_if(&game.code, |_, owner| *owner == id);
        self.players.retain(|_, player| player.game_id != id);
        self.runtime.remove(&id);
        self.progress.retain(|_, record| record.game_id != id);
        self.completions.retain(|(game_id, _), _| *game_id != id);
        true
    }
}

impl GameStore for MemoryGameStore {
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.insert_game(game)) })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.games.get(&id).map(|game| game.clone())) })
    }

    fn find_game_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.find_game_by_code(&code)) })
    }

    fn list_joinable_games(
        &self,
        capacity: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.inner.games_where(|game| {
                game.status == GameStatus::Waiting && game.player_count < capacity
            }))
        })
    }

    fn list_games_by_status(
        &self,
        status: GameStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.games_where(|game| game.status == status)) })
    }

    fn transition_game(
        &self,
        id: Uuid,
        transition: GameTransition,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.transition_game(id, transition)) })
    }

    fn advance_puzzle_index(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut game) = store.inner.games.get_mut(&id) {
                game.current_puzzle_index += 1;
            }
            Ok(())
        })
    }

    fn reserve_player_slot(
        &self,
        game_id: Uuid,
        capacity: u32,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.reserve_player_slot(game_id, capacity)) })
    }

    fn release_player_slot(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut game) = store.inner.games.get_mut(&game_id) {
                game.player_count = game.player_count.saturating_sub(1);
            }
            Ok(())
        })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.players.insert(player.id, player);
            Ok(())
        })
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.players.get(&id).map(|player| player.clone())) })
    }

    fn list_players(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.list_players(game_id)) })
    }

    fn set_player_connected(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            match store.inner.players.get_mut(&player_id) {
                Some(mut player) if player.game_id == game_id => {
                    player.is_connected = connected;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn add_player_score(
        &self,
        player_id: Uuid,
        points: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut player) = store.inner.players.get_mut(&player_id) {
                player.score_total += points;
            }
            Ok(())
        })
    }

    fn reset_runtime_state(
        &self,
        state: RuntimeStateEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.runtime.insert(state.game_id, state);
            Ok(())
        })
    }

    fn find_runtime_state(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RuntimeStateEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.runtime.get(&game_id).map(|state| state.clone())) })
    }

    fn record_game_attempt(
        &self,
        game_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.record_game_attempt(game_id, &slug)) })
    }

    fn advance_runtime(
        &self,
        game_id: Uuid,
        solved_slug: String,
        next_slug: Option<String>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.advance_runtime(game_id, &solved_slug, next_slug);
            Ok(())
        })
    }

    fn set_puzzle_state(
        &self,
        game_id: Uuid,
        puzzle_state: serde_json::Value,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut state) = store.inner.runtime.get_mut(&game_id) {
                state.puzzle_state = Some(puzzle_state);
            }
            Ok(())
        })
    }

    fn record_player_attempt(
        &self,
        player_id: Uuid,
        game_id: Uuid,
        slug: String,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<PlayerPuzzleProgressEntity>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .record_player_attempt(player_id, game_id, slug, at))
        })
    }

    fn find_player_progress(
        &self,
        player_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerPuzzleProgressEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .progress
                .get(&(player_id, slug))
                .map(|record| record.clone()))
        })
    }

    fn credit_player_puzzle(
        &self,
        player_id: Uuid,
        slug: String,
        points: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.credit_player_puzzle(player_id, slug, points)) })
    }

    fn mark_player_solved(
        &self,
        player_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut record) = store.inner.progress.get_mut(&(player_id, slug)) {
                record.solved = true;
                record.updated_at = SystemTime::now();
            }
            Ok(())
        })
    }

    fn claim_completion(
        &self,
        completion: PuzzleCompletionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.claim_completion(completion)) })
    }

    fn find_completion(
        &self,
        game_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<Option<PuzzleCompletionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .completions
                .get(&(game_id, slug))
                .map(|completion| completion.clone()))
        })
    }

    fn list_completions(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PuzzleCompletionEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.list_completions(game_id)) })
    }

    fn delete_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.delete_game(id)) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(game_id: Uuid, slug: &str, by: Uuid) -> PuzzleCompletionEntity {
        PuzzleCompletionEntity {
            game_id,
            puzzle_slug: slug.into(),
            completed_by: by,
            completed_at: SystemTime::now(),
        }
    }

    async fn running_game(store: &MemoryGameStore, code: &str) -> Uuid {
        let game = GameEntity::new(code.into(), 1, 3);
        let id = game.id;
        store.insert_game(game).await.unwrap();
        let start = GameTransition::new(GameStatus::Waiting, GameStatus::Running);
        assert!(store.transition_game(id, start).await.unwrap());
        id
    }

    #[tokio::test]
    async fn duplicate_active_code_is_rejected_until_abandoned() {
        let store = MemoryGameStore::new();
        let first = GameEntity::new("ABCDEF".into(), 1, 3);
        let first_id = first.id;
        assert!(store.insert_game(first).await.unwrap());
        assert!(
            !store
                .insert_game(GameEntity::new("ABCDEF".into(), 2, 3))
                .await
                .unwrap()
        );

        let abandoned = store
            .transition_game(
                first_id,
                GameTransition::new(GameStatus::Waiting, GameStatus::Abandoned),
            )
            .await
            .unwrap();
        assert!(abandoned);
        assert!(store.find_game_by_code("ABCDEF".into()).await.unwrap().is_none());
        assert!(
            store
                .insert_game(GameEntity::new("ABCDEF".into(), 3, 3))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn transition_requires_expected_status() {
        let store = MemoryGameStore::new();
        let game = GameEntity::new("QWERTY".into(), 1, 3);
        let id = game.id;
        store.insert_game(game).await.unwrap();

        let stale = GameTransition::new(GameStatus::Running, GameStatus::Finished);
        assert!(!store.transition_game(id, stale).await.unwrap());

        let start = GameTransition::new(GameStatus::Waiting, GameStatus::Running);
        assert!(store.transition_game(id, start.clone()).await.unwrap());
        assert!(!store.transition_game(id, start).await.unwrap());
    }

    #[tokio::test]
    async fn slot_reservation_respects_capacity() {
        let store = MemoryGameStore::new();
        let game = GameEntity::new("SLOTS1".into(), 1, 3);
        let id = game.id;
        store.insert_game(game).await.unwrap();

        for _ in 0..4 {
            assert!(store.reserve_player_slot(id, 4).await.unwrap());
        }
        assert!(!store.reserve_player_slot(id, 4).await.unwrap());

        store.release_player_slot(id).await.unwrap();
        assert!(store.reserve_player_slot(id, 4).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_produce_a_single_completion() {
        let store = MemoryGameStore::new();
        let game_id = running_game(&store, "CLAIMS").await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .claim_completion(completion(game_id, "p1", Uuid::new_v4()))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.list_completions(game_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claims_are_refused_unless_the_game_is_running() {
        let store = MemoryGameStore::new();
        let waiting = GameEntity::new("WAITNG".into(), 1, 3);
        let waiting_id = waiting.id;
        store.insert_game(waiting).await.unwrap();
        let player = Uuid::new_v4();
        assert!(
            !store
                .claim_completion(completion(waiting_id, "p1", player))
                .await
                .unwrap()
        );

        let game_id = running_game(&store, "ENDING").await;
        let finish = GameTransition::new(GameStatus::Running, GameStatus::Finished);
        assert!(store.transition_game(game_id, finish).await.unwrap());
        assert!(
            !store
                .claim_completion(completion(game_id, "p1", player))
                .await
                .unwrap()
        );
        assert!(store.find_completion(game_id, "p1".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn player_progress_reads_back_every_update() {
        let store = MemoryGameStore::new();
        let (player, game) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(
            store
                .find_player_progress(player, "p1".into())
                .await
                .unwrap()
                .is_none()
        );

        for _ in 0..2 {
            store
                .record_player_attempt(player, game, "p1".into(), SystemTime::now())
                .await
                .unwrap();
        }
        store.mark_player_solved(player, "p1".into()).await.unwrap();

        let record = store
            .find_player_progress(player, "p1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.attempts, 2);
        assert!(record.solved);
        assert_eq!(record.score_awarded, 0);
    }

    #[tokio::test]
    async fn credit_is_awarded_once_per_player_record() {
        let store = MemoryGameStore::new();
        let (player, game) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(!store.credit_player_puzzle(player, "p1".into(), 400).await.unwrap());

        let record = store
            .record_player_attempt(player, game, "p1".into(), SystemTime::now())
            .await
            .unwrap();
        assert_eq!(record.attempts, 1);
        assert!(store.credit_player_puzzle(player, "p1".into(), 400).await.unwrap());
        assert!(!store.credit_player_puzzle(player, "p1".into(), 400).await.unwrap());
    }

    #[tokio::test]
    async fn runtime_attempts_only_count_current_puzzle() {
        let store = MemoryGameStore::new();
        let game_id = Uuid::new_v4();
        store
            .reset_runtime_state(RuntimeStateEntity::starting_at(game_id, "p1"))
            .await
            .unwrap();

        assert!(store.record_game_attempt(game_id, "p1".into()).await.unwrap());
        assert!(!store.record_game_attempt(game_id, "p2".into()).await.unwrap());

        store
            .advance_runtime(game_id, "p1".into(), Some("p2".into()))
            .await
            .unwrap();
        let state = store.find_runtime_state(game_id).await.unwrap().unwrap();
        assert_eq!(state.current_puzzle_slug, "p2");
        assert_eq!(state.attempts, 0);

        // A late advance for the old puzzle leaves the new one untouched.
        store
            .advance_runtime(game_id, "p1".into(), None)
            .await
            .unwrap();
        let state = store.find_runtime_state(game_id).await.unwrap().unwrap();
        assert!(!state.solved);
    }

    #[tokio::test]
    async fn delete_cascades_to_owned_records() {
        let store = MemoryGameStore::new();
        let game_id = running_game(&store, "CASCAD").await;
        let player = PlayerEntity::new(game_id, "Agent".into(), "curator".into());
        let player_id = player.id;
        store.insert_player(player).await.unwrap();
        store
            .record_player_attempt(player_id, game_id, "p1".into(), SystemTime::now())
            .await
            .unwrap();
        assert!(
            store
                .claim_completion(completion(game_id, "p1", player_id))
                .await
                .unwrap()
        );

        assert!(store.delete_game(game_id).await.unwrap());
        assert!(store.find_player(player_id).await.unwrap().is_none());
        assert!(store.list_completions(game_id).await.unwrap().is_empty());
        assert!(store.find_game_by_code("CASCAD".into()).await.unwrap().is_none());
        assert!(!store.delete_game(game_id).await.unwrap());
    }
}
