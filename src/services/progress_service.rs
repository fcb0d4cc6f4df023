//! Answer submission and the per-game completion ledger.
//!
//! The ledger insert is the single arbitration point for credit: the caller
//! whose `claim_completion` succeeds is the only one that awards points,
//! advances the game and announces the solve.

use std::time::SystemTime;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        game_store::GameStore,
        models::{GameEntity, PlayerEntity, PuzzleCompletionEntity},
    },
    dto::{
        format_system_time,
        game::CompletedPuzzlesResponse,
        progress::SubmitAnswerResponse,
        ws::{GameStateSnapshot, PuzzleSolvedEvent},
    },
    error::ServiceError,
    services::{
        answers, credentials::Credential, events, roster_service, session_service,
    },
    state::{
        SharedState,
        lifecycle::{FinishReason, GameStatus},
    },
};

const DUPLICATE_CREDIT_MESSAGE: &str = "Puzzle already solved by another player";
const ALREADY_CREDITED_MESSAGE: &str = "Puzzle already credited to you";

/// Result of one answer submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The caller won the puzzle.
    Credited {
        points: i64,
        completed_ids: Vec<String>,
        game_completed: bool,
    },
    /// The caller already holds the credit; nothing changed.
    AlreadyCredited,
    /// Correct, but another player holds the credit.
    DuplicateCredit,
    /// Wrong answer.
    Incorrect,
}

impl From<AnswerOutcome> for SubmitAnswerResponse {
    fn from(outcome: AnswerOutcome) -> Self {
        match outcome {
            AnswerOutcome::Credited { points, .. } => Self {
                ok: true,
                accepted: true,
                already_solved_by_other: false,
                points_awarded: points,
                message: None,
            },
            AnswerOutcome::AlreadyCredited => Self {
                ok: true,
                accepted: true,
                already_solved_by_other: false,
                points_awarded: 0,
                message: Some(ALREADY_CREDITED_MESSAGE.into()),
            },
            AnswerOutcome::DuplicateCredit => Self {
                ok: true,
                accepted: false,
                already_solved_by_other: true,
                points_awarded: 0,
                message: Some(DUPLICATE_CREDIT_MESSAGE.into()),
            },
            AnswerOutcome::Incorrect => Self {
                ok: false,
                accepted: false,
                already_solved_by_other: false,
                points_awarded: 0,
                message: None,
            },
        }
    }
}

/// Evaluate an answer for `slug` on behalf of the credential holder.
pub async fn submit_answer(
    state: &SharedState,
    credential: &Credential,
    slug: &str,
    attempt: &str,
) -> Result<AnswerOutcome, ServiceError> {
    let config = state.config();
    if config.puzzle(slug).is_none() {
        return Err(ServiceError::NotFound(format!("unknown puzzle `{slug}`")));
    }

    let store = state.require_game_store().await?;
    let player = roster_service::require_player(store.as_ref(), credential).await?;
    let game = session_service::load_game(store.as_ref(), credential.game_id).await?;
    match game.status {
        GameStatus::Running => {}
        GameStatus::Waiting => {
            return Err(ServiceError::InvalidState(
                "game has not started yet".into(),
            ));
        }
        GameStatus::Finished | GameStatus::Abandoned => {
            return Err(ServiceError::GameClosed(format!(
                "game `{}` is {}",
                game.id,
                game.status.as_str()
            )));
        }
    }

    let correct = answers::is_correct_answer(config, state.answers(), slug, attempt);
    let now = SystemTime::now();
    store.record_game_attempt(game.id, slug.to_owned()).await?;
    store
        .record_player_attempt(player.id, game.id, slug.to_owned(), now)
        .await?;

    if !correct {
        debug!(game_id = %game.id, player_id = %player.id, slug, "incorrect answer");
        return Ok(AnswerOutcome::Incorrect);
    }

    let claim = PuzzleCompletionEntity {
        game_id: game.id,
        puzzle_slug: slug.to_owned(),
        completed_by: player.id,
        completed_at: now,
    };
    if store.claim_completion(claim).await? {
        return credit_winner(state, store.as_ref(), &game, &player, slug).await;
    }

    match store.find_completion(game.id, slug.to_owned()).await? {
        Some(completion) if completion.completed_by == player.id => {
            Ok(AnswerOutcome::AlreadyCredited)
        }
        Some(_) => {
            store.mark_player_solved(player.id, slug.to_owned()).await?;
            debug!(game_id = %game.id, player_id = %player.id, slug, "puzzle already credited to another player");
            Ok(AnswerOutcome::DuplicateCredit)
        }
        // No ledger entry and a refused claim: the game stopped running meanwhile.
        None => Err(ServiceError::GameClosed(format!(
            "game `{}` stopped running",
            game.id
        ))),
    }
}

/// Puzzles credited in the caller's game, ordered by completion time.
pub async fn get_completed_puzzles(
    state: &SharedState,
    credential: &Credential,
    game_id: Uuid,
) -> Result<CompletedPuzzlesResponse, ServiceError> {
    if credential.game_id != game_id {
        return Err(ServiceError::Forbidden(
            "credential belongs to another game".into(),
        ));
    }

    let store = state.require_game_store().await?;
    let completed_ids = completed_slugs(store.as_ref(), game_id).await?;
    Ok(CompletedPuzzlesResponse {
        game_id,
        completed_ids,
    })
}

/// Authoritative snapshot used to resynchronize realtime clients.
pub async fn state_snapshot(
    store: &dyn GameStore,
    game: &GameEntity,
) -> Result<GameStateSnapshot, ServiceError> {
    let completed_ids = completed_slugs(store, game.id).await?;
    let runtime = store.find_runtime_state(game.id).await?;
    let (current_puzzle_slug, puzzle_state) = match runtime {
        Some(runtime) => (Some(runtime.current_puzzle_slug), runtime.puzzle_state),
        None => (None, None),
    };

    Ok(GameStateSnapshot {
        phase: game.status,
        completed_ids,
        current_puzzle_index: game.current_puzzle_index,
        current_puzzle_slug,
        ends_at: game.ends_at.map(format_system_time),
        puzzle_state,
    })
}

pub(crate) async fn completed_slugs(
    store: &dyn GameStore,
    game_id: Uuid,
) -> Result<Vec<String>, ServiceError> {
    let completions = store.list_completions(game_id).await?;
    Ok(completions
        .into_iter()
        .map(|completion| completion.puzzle_slug)
        .collect())
}

async fn credit_winner(
    state: &SharedState,
    store: &dyn GameStore,
    game: &GameEntity,
    player: &PlayerEntity,
    slug: &str,
) -> Result<AnswerOutcome, ServiceError> {
    let config = state.config();
    let mut points = config.puzzle_points;
    if store
        .credit_player_puzzle(player.id, slug.to_owned(), points)
        .await?
    {
        store.add_player_score(player.id, points).await?;
    } else {
        warn!(player_id = %player.id, slug, "personal record was already credited");
        points = 0;
    }
    store.advance_puzzle_index(game.id).await?;

    let completed_ids = completed_slugs(store, game.id).await?;
    settle_runtime(state, store, game.id).await?;

    info!(game_id = %game.id, player_id = %player.id, slug, points, "puzzle solved");
    // A game finished since the claim already announced this solve in its
    // `game:completed` list.
    let still_running = store
        .find_game(game.id)
        .await?
        .is_some_and(|current| current.status == GameStatus::Running);
    if still_running {
        events::broadcast_puzzle_solved(
            state,
            game.id,
            PuzzleSolvedEvent {
                solver_name: player.nickname.clone(),
                solver_id: player.id,
                puzzle_slug: slug.to_owned(),
                points,
                completed_ids: completed_ids.clone(),
            },
        );
    }

    let game_completed = still_running
        && config.all_completed(&completed_ids)
        && session_service::finish_game(state, store, game.id, FinishReason::PuzzlesCompleted)
            .await?;

    Ok(AnswerOutcome::Credited {
        points,
        completed_ids,
        game_completed,
    })
}

/// Move the runtime state past every credited puzzle.
///
/// Solves of different puzzles may land in any order; each caller walks the
/// runtime forward from the fresh ledger, and the store only applies a step
/// when the runtime still points at the solved slug.
async fn settle_runtime(
    state: &SharedState,
    store: &dyn GameStore,
    game_id: Uuid,
) -> Result<(), ServiceError> {
    let config = state.config();
    for _ in 0..config.puzzle_count() {
        let Some(runtime) = store.find_runtime_state(game_id).await? else {
            return Ok(());
        };
        if runtime.solved {
            return Ok(());
        }
        let completed = completed_slugs(store, game_id).await?;
        if !completed.contains(&runtime.current_puzzle_slug) {
            return Ok(());
        }

        let next = config.next_open_puzzle(&completed).map(str::to_owned);
        let last = next.is_none();
        store
            .advance_runtime(game_id, runtime.current_puzzle_slug, next)
            .await?;
        if last {
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::memory::MemoryGameStore,
        dto::game::{JoinGameRequest, PlayerProfileRequest},
        services::{answers::ConfiguredSolutions, credentials::CredentialService},
        state::AppState,
    };

    const CONFIG: &str = r#"{
        "puzzles": {
            "p1": {"answers": ["alpha"]},
            "p2": {"answers": ["beta"]}
        },
        "puzzlePoints": 250
    }"#;

    async fn running_game(players: usize) -> (SharedState, Vec<Credential>) {
        let config = AppConfig::from_json(CONFIG).unwrap();
        let answers = Arc::new(ConfiguredSolutions::from_config(&config));
        let state = AppState::new(
            config,
            CredentialService::new(b"progress-secret", Duration::from_secs(60)),
            answers,
        );
        state
            .install_game_store(Arc::new(MemoryGameStore::new()))
            .await;

        let session = session_service::create_game(&state, PlayerProfileRequest::default())
            .await
            .unwrap();
        let mut tokens = vec![session.player_token];
        for _ in 1..players {
            let joined = session_service::join_game(
                &state,
                JoinGameRequest {
                    code: session.code.clone(),
                    profile: PlayerProfileRequest::default(),
                },
            )
            .await
            .unwrap();
            tokens.push(joined.player_token);
        }
        let credentials: Vec<Credential> = tokens
            .iter()
            .map(|token| state.credentials().authenticate(Some(token)).unwrap())
            .collect();
        session_service::start_game(&state, &credentials[0])
            .await
            .unwrap();
        (state, credentials)
    }

    #[tokio::test]
    async fn waiting_games_reject_answers() {
        let config = AppConfig::from_json(CONFIG).unwrap();
        let answers = Arc::new(ConfiguredSolutions::from_config(&config));
        let state = AppState::new(
            config,
            CredentialService::new(b"progress-secret", Duration::from_secs(60)),
            answers,
        );
        state
            .install_game_store(Arc::new(MemoryGameStore::new()))
            .await;
        let session = session_service::create_game(&state, PlayerProfileRequest::default())
            .await
            .unwrap();
        let credential = state
            .credentials()
            .authenticate(Some(&session.player_token))
            .unwrap();

        assert!(matches!(
            submit_answer(&state, &credential, "p1", "alpha").await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn first_solver_is_credited_once() {
        let (state, credentials) = running_game(2).await;

        let outcome = submit_answer(&state, &credentials[0], "p1", " ALPHA ")
            .await
            .unwrap();
        assert!(matches!(outcome, AnswerOutcome::Credited { points: 250, .. }));

        let again = submit_answer(&state, &credentials[0], "p1", "alpha")
            .await
            .unwrap();
        assert_eq!(again, AnswerOutcome::AlreadyCredited);

        let other = submit_answer(&state, &credentials[1], "p1", "alpha")
            .await
            .unwrap();
        assert_eq!(other, AnswerOutcome::DuplicateCredit);
        let response = SubmitAnswerResponse::from(other);
        assert!(response.ok && response.already_solved_by_other && !response.accepted);

        let store = state.require_game_store().await.unwrap();
        let winner = store.find_player(credentials[0].player_id).await.unwrap().unwrap();
        let loser = store.find_player(credentials[1].player_id).await.unwrap().unwrap();
        assert_eq!(winner.score_total, 250);
        assert_eq!(loser.score_total, 0);
    }

    #[tokio::test]
    async fn wrong_answers_are_counted_without_credit() {
        let (state, credentials) = running_game(1).await;

        let outcome = submit_answer(&state, &credentials[0], "p1", "gamma")
            .await
            .unwrap();
        assert_eq!(outcome, AnswerOutcome::Incorrect);

        let store = state.require_game_store().await.unwrap();
        let runtime = store
            .find_runtime_state(credentials[0].game_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runtime.attempts, 1);
        assert!(
            store
                .list_completions(credentials[0].game_id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unknown_puzzles_are_not_found() {
        let (state, credentials) = running_game(1).await;
        assert!(matches!(
            submit_answer(&state, &credentials[0], "nope", "alpha").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn out_of_order_solves_still_finish_the_game() {
        let (state, credentials) = running_game(1).await;
        let game_id = credentials[0].game_id;

        let outcome = submit_answer(&state, &credentials[0], "p2", "beta")
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AnswerOutcome::Credited {
                game_completed: false,
                ..
            }
        ));

        let outcome = submit_answer(&state, &credentials[0], "p1", "alpha")
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AnswerOutcome::Credited {
                game_completed: true,
                ..
            }
        ));

        let store = state.require_game_store().await.unwrap();
        let game = store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(game.status, GameStatus::Finished);
        assert_eq!(game.current_puzzle_index, 2);
        let runtime = store.find_runtime_state(game_id).await.unwrap().unwrap();
        assert!(runtime.solved);

        let completed = get_completed_puzzles(&state, &credentials[0], game_id)
            .await
            .unwrap();
        assert_eq!(completed.completed_ids, ["p2", "p1"]);
        assert!(matches!(
            submit_answer(&state, &credentials[0], "p1", "alpha").await,
            Err(ServiceError::GameClosed(_))
        ));
    }

    #[tokio::test]
    async fn completed_puzzles_are_scoped_to_the_credential_game() {
        let (state, credentials) = running_game(1).await;
        assert!(matches!(
            get_completed_puzzles(&state, &credentials[0], Uuid::new_v4()).await,
            Err(ServiceError::Forbidden(_))
        ));
    }
}
