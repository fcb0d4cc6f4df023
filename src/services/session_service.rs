use std::time::SystemTime;

use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        game_store::GameStore,
        models::{GameEntity, GameTransition, RuntimeStateEntity},
    },
    dto::{
        format_system_time,
        game::{
            CREATOR_ROLE, GameSnapshotResponse, JOINER_ROLE, JoinGameRequest,
            PlayerProfileRequest, PlayerView, RuntimeStateView, SessionResponse,
            StartGameResponse,
        },
        validation::normalize_join_code,
    },
    error::ServiceError,
    services::{
        credentials::Credential,
        events, progress_service,
        roster_service::{self, AdmittedPlayer},
    },
    state::{
        SharedState,
        lifecycle::{FinishReason, GameEvent, GameStatus},
    },
};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_SEED: u32 = 100_000;

/// Create a waiting game and admit its creator.
pub async fn create_game(
    state: &SharedState,
    profile: PlayerProfileRequest,
) -> Result<SessionResponse, ServiceError> {
    let store = state.require_game_store().await?;
    let config = state.config();
    let code_length = config.code_length;
    let game = allocate_game(store.as_ref(), config, || generate_code(code_length)).await?;

    let AdmittedPlayer { player, token } = roster_service::admit_player(
        state,
        store.as_ref(),
        game.id,
        profile.nickname(),
        profile.role_or(CREATOR_ROLE),
    )
    .await?;

    info!(game_id = %game.id, code = %game.code, "game created");
    Ok(SessionResponse {
        game_id: game.id,
        player_id: player.id,
        code: game.code,
        player_token: token,
        created: None,
    })
}

/// Join an open game by its code.
pub async fn join_game(
    state: &SharedState,
    request: JoinGameRequest,
) -> Result<SessionResponse, ServiceError> {
    let store = state.require_game_store().await?;
    let code = normalize_join_code(&request.code);
    let Some(game) = store.find_game_by_code(code.clone()).await? else {
        return Err(ServiceError::NotFound(format!("no game with code `{code}`")));
    };
    if !game.status.is_open() {
        return Err(ServiceError::GameClosed(format!(
            "game `{code}` is {}",
            game.status.as_str()
        )));
    }

    let AdmittedPlayer { player, token } = roster_service::admit_player(
        state,
        store.as_ref(),
        game.id,
        request.profile.nickname(),
        request.profile.role_or(JOINER_ROLE),
    )
    .await?;
    events::broadcast_player_joined(state, game.id, PlayerView::from(player.clone()));

    Ok(SessionResponse {
        game_id: game.id,
        player_id: player.id,
        code: game.code,
        player_token: token,
        created: None,
    })
}

/// Join the most recent waiting game with a free slot, or create one.
pub async fn join_random_game(
    state: &SharedState,
    profile: PlayerProfileRequest,
) -> Result<SessionResponse, ServiceError> {
    let store = state.require_game_store().await?;
    let candidates = store
        .list_joinable_games(state.config().max_players)
        .await?;

    for game in candidates {
        match roster_service::admit_player(
            state,
            store.as_ref(),
            game.id,
            profile.nickname(),
            profile.role_or(JOINER_ROLE),
        )
        .await
        {
            Ok(AdmittedPlayer { player, token }) => {
                events::broadcast_player_joined(state, game.id, PlayerView::from(player.clone()));
                return Ok(SessionResponse {
                    game_id: game.id,
                    player_id: player.id,
                    code: game.code,
                    player_token: token,
                    created: Some(false),
                });
            }
            // Filled or closed since it was listed.
            Err(
                ServiceError::GameFull(_) | ServiceError::GameClosed(_) | ServiceError::NotFound(_),
            ) => {
                debug!(game_id = %game.id, "joinable game taken; trying the next one");
            }
            Err(err) => return Err(err),
        }
    }

    let mut response = create_game(state, profile).await?;
    response.created = Some(true);
    Ok(response)
}

/// Start the session clock of the caller's game.
///
/// Starting an already running game is a no-op returning the existing deadline.
pub async fn start_game(
    state: &SharedState,
    credential: &Credential,
) -> Result<StartGameResponse, ServiceError> {
    let store = state.require_game_store().await?;
    roster_service::require_player(store.as_ref(), credential).await?;
    let game = load_game(store.as_ref(), credential.game_id).await?;

    match game.status {
        GameStatus::Running => return running_window(&game),
        GameStatus::Finished | GameStatus::Abandoned => {
            return Err(ServiceError::GameClosed(format!(
                "game `{}` is {}",
                game.id,
                game.status.as_str()
            )));
        }
        GameStatus::Waiting => {}
    }

    let config = state.config();
    let Some(first_puzzle) = config.first_puzzle() else {
        return Err(ServiceError::InvalidState("no puzzle is configured".into()));
    };

    let next = game.status.apply(GameEvent::Start)?;
    let started_at = SystemTime::now();
    let ends_at = started_at + config.session_duration;
    let transition = GameTransition::new(game.status, next).with_window(started_at, ends_at);
    if !store.transition_game(game.id, transition).await? {
        // Someone else moved the game first.
        let current = load_game(store.as_ref(), game.id).await?;
        return match current.status {
            GameStatus::Running => running_window(&current),
            status => Err(ServiceError::GameClosed(format!(
                "game `{}` is {}",
                current.id,
                status.as_str()
            ))),
        };
    }

    store
        .reset_runtime_state(RuntimeStateEntity::starting_at(game.id, first_puzzle))
        .await?;

    let ends_at = format_system_time(ends_at);
    info!(game_id = %game.id, %ends_at, "game started");
    events::broadcast_game_started(state, game.id, ends_at.clone());
    Ok(StartGameResponse { ok: true, ends_at })
}

/// Read-only snapshot of a game: record, runtime state and roster.
pub async fn get_game(
    state: &SharedState,
    game_id: Uuid,
) -> Result<GameSnapshotResponse, ServiceError> {
    let store = state.require_game_store().await?;
    let game = load_game(store.as_ref(), game_id).await?;
    let runtime = store.find_runtime_state(game_id).await?;
    let roster = roster_service::load_roster(store.as_ref(), game_id).await?;

    Ok(GameSnapshotResponse {
        game: game.into(),
        state: runtime.map(RuntimeStateView::from),
        roster,
    })
}

/// Move a running game to finished and announce it.
///
/// Returns `false` when the game was not running anymore, so concurrent
/// callers announce the end exactly once. The ledger is read after the
/// transition: claims are refused once the game left `running`, so the
/// announced list is final.
pub async fn finish_game(
    state: &SharedState,
    store: &dyn GameStore,
    game_id: Uuid,
    reason: FinishReason,
) -> Result<bool, ServiceError> {
    let next = GameStatus::Running.apply(GameEvent::Finish(reason))?;
    let transition = GameTransition::new(GameStatus::Running, next);
    if !store.transition_game(game_id, transition).await? {
        return Ok(false);
    }

    let completed_ids = progress_service::completed_slugs(store, game_id).await?;

    info!(%game_id, ?reason, completed = completed_ids.len(), "game finished");
    events::broadcast_game_completed(state, game_id, completed_ids, reason);
    Ok(true)
}

pub(crate) async fn load_game(
    store: &dyn GameStore,
    game_id: Uuid,
) -> Result<GameEntity, ServiceError> {
    store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game `{game_id}` not found")))
}

fn running_window(game: &GameEntity) -> Result<StartGameResponse, ServiceError> {
    let Some(ends_at) = game.ends_at else {
        return Err(ServiceError::Internal(format!(
            "running game `{}` has no deadline",
            game.id
        )));
    };
    Ok(StartGameResponse {
        ok: true,
        ends_at: format_system_time(ends_at),
    })
}

/// Insert a fresh game, drawing codes from `next_code` until one is free.
async fn allocate_game(
    store: &dyn GameStore,
    config: &AppConfig,
    mut next_code: impl FnMut() -> String,
) -> Result<GameEntity, ServiceError> {
    for attempt in 1..=config.code_attempts {
        let game = GameEntity::new(next_code(), random_seed(), config.hints_budget);
        if store.insert_game(game.clone()).await? {
            return Ok(game);
        }
        debug!(attempt, code = %game.code, "join code already taken");
    }

    Err(ServiceError::ResourceExhausted(format!(
        "no free join code after {} attempts",
        config.code_attempts
    )))
}

fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

fn random_seed() -> u32 {
    rand::rng().random_range(0..MAX_SEED)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        dao::game_store::memory::MemoryGameStore,
        services::{answers::ConfiguredSolutions, credentials::CredentialService},
        state::AppState,
    };

    async fn memory_state() -> SharedState {
        let config = AppConfig::default();
        let answers = Arc::new(ConfiguredSolutions::from_config(&config));
        let state = AppState::new(
            config,
            CredentialService::new(b"session-secret", Duration::from_secs(60)),
            answers,
        );
        state
            .install_game_store(Arc::new(MemoryGameStore::new()))
            .await;
        state
    }

    #[test]
    fn generated_codes_use_the_join_alphabet() {
        let code = generate_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.bytes().all(|byte| CODE_ALPHABET.contains(&byte)));
    }

    #[tokio::test]
    async fn code_allocation_gives_up_after_configured_attempts() {
        let store = MemoryGameStore::new();
        let config = AppConfig::default();
        store
            .insert_game(GameEntity::new("TAKEN1".into(), 1, 3))
            .await
            .unwrap();

        let mut draws = 0;
        let err = allocate_game(&store, &config, || {
            draws += 1;
            "TAKEN1".into()
        })
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ServiceError::ResourceExhausted(_)));
        assert_eq!(draws, config.code_attempts);
    }

    #[tokio::test]
    async fn code_allocation_retries_on_collision() {
        let store = MemoryGameStore::new();
        let config = AppConfig::default();
        store
            .insert_game(GameEntity::new("TAKEN1".into(), 1, 3))
            .await
            .unwrap();

        let mut codes = vec!["FRESH1", "TAKEN1"];
        let game = allocate_game(&store, &config, || codes.pop().unwrap().into())
            .await
            .unwrap();
        assert_eq!(game.code, "FRESH1");
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let state = memory_state().await;
        let session = create_game(&state, PlayerProfileRequest::default())
            .await
            .unwrap();
        let credential = state
            .credentials()
            .authenticate(Some(&session.player_token))
            .unwrap();

        let first = start_game(&state, &credential).await.unwrap();
        let second = start_game(&state, &credential).await.unwrap();
        assert_eq!(first.ends_at, second.ends_at);

        let snapshot = get_game(&state, session.game_id).await.unwrap();
        assert_eq!(snapshot.game.status, GameStatus::Running);
        assert_eq!(
            snapshot.state.unwrap().current_puzzle_slug,
            state.config().first_puzzle().unwrap()
        );
    }

    #[tokio::test]
    async fn finished_games_refuse_joins_and_starts() {
        let state = memory_state().await;
        let session = create_game(&state, PlayerProfileRequest::default())
            .await
            .unwrap();
        let credential = state
            .credentials()
            .authenticate(Some(&session.player_token))
            .unwrap();
        start_game(&state, &credential).await.unwrap();

        let store = state.require_game_store().await.unwrap();
        assert!(
            finish_game(
                &state,
                store.as_ref(),
                session.game_id,
                FinishReason::Expired
            )
            .await
            .unwrap()
        );
        assert!(
            !finish_game(
                &state,
                store.as_ref(),
                session.game_id,
                FinishReason::Expired
            )
            .await
            .unwrap()
        );

        assert!(matches!(
            start_game(&state, &credential).await,
            Err(ServiceError::GameClosed(_))
        ));
        let join = JoinGameRequest {
            code: session.code.to_lowercase(),
            profile: PlayerProfileRequest::default(),
        };
        assert!(matches!(
            join_game(&state, join).await,
            Err(ServiceError::GameClosed(_))
        ));
    }
}
