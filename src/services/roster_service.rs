use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{game_store::GameStore, models::PlayerEntity},
    dto::game::{OkResponse, PlayerView, RosterResponse},
    error::ServiceError,
    services::{credentials::Credential, events},
    state::SharedState,
};

/// Player admitted into a game together with its freshly issued credential.
pub struct AdmittedPlayer {
    pub player: PlayerEntity,
    pub token: String,
}

/// Reserve a slot in `game_id` and register a new player in it.
///
/// Slot reservation and capacity checks happen atomically in the store, so
/// concurrent joins never exceed the configured player cap.
pub async fn admit_player(
    state: &SharedState,
    store: &dyn GameStore,
    game_id: Uuid,
    nickname: String,
    role: String,
) -> Result<AdmittedPlayer, ServiceError> {
    let player = PlayerEntity::new(game_id, nickname, role);
    let token = state
        .credentials()
        .issue(game_id, player.id, &player.role)?;

    if !store
        .reserve_player_slot(game_id, state.config().max_players)
        .await?
    {
        return Err(match store.find_game(game_id).await? {
            None => ServiceError::NotFound(format!("game `{game_id}` not found")),
            Some(game) if !game.status.is_open() => ServiceError::GameClosed(format!(
                "game `{game_id}` is {}",
                game.status.as_str()
            )),
            Some(_) => ServiceError::GameFull(format!("game `{game_id}` is full")),
        });
    }

    if let Err(err) = store.insert_player(player.clone()).await {
        if let Err(release_err) = store.release_player_slot(game_id).await {
            warn!(%game_id, error = %release_err, "failed to release player slot");
        }
        return Err(err.into());
    }

    info!(%game_id, player_id = %player.id, role = %player.role, "player admitted");
    Ok(AdmittedPlayer { player, token })
}

/// Resolve the player behind a credential, rejecting credentials whose player
/// vanished or moved to another game.
pub async fn require_player(
    store: &dyn GameStore,
    credential: &Credential,
) -> Result<PlayerEntity, ServiceError> {
    match store.find_player(credential.player_id).await? {
        Some(player) if player.game_id == credential.game_id => Ok(player),
        _ => Err(ServiceError::Unauthorized(
            "player does not belong to this game".into(),
        )),
    }
}

/// Roster of a game ordered by join time.
pub async fn load_roster(
    store: &dyn GameStore,
    game_id: Uuid,
) -> Result<Vec<PlayerView>, ServiceError> {
    let players = store.list_players(game_id).await?;
    Ok(players.into_iter().map(PlayerView::from).collect())
}

/// List the players of a game. Unknown games yield an empty roster.
pub async fn list_players(
    state: &SharedState,
    game_id: Uuid,
) -> Result<RosterResponse, ServiceError> {
    let store = state.require_game_store().await?;
    let players = load_roster(store.as_ref(), game_id).await?;
    Ok(RosterResponse { players })
}

/// Toggle the readiness of the calling player and push the new roster.
pub async fn set_ready(
    state: &SharedState,
    credential: &Credential,
    ready: bool,
) -> Result<OkResponse, ServiceError> {
    let store = state.require_game_store().await?;
    if !store
        .set_player_connected(credential.game_id, credential.player_id, ready)
        .await?
    {
        return Err(ServiceError::Unauthorized(
            "player does not belong to this game".into(),
        ));
    }

    let roster = load_roster(store.as_ref(), credential.game_id).await?;
    events::broadcast_players_update(state, credential.game_id, roster);
    Ok(OkResponse { ok: true })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{game_store::memory::MemoryGameStore, models::GameEntity},
        services::{answers::ConfiguredSolutions, credentials::CredentialService},
        state::AppState,
    };

    async fn state_with_store() -> (SharedState, Arc<MemoryGameStore>) {
        let mut config = AppConfig::from_json("{}").unwrap();
        config.max_players = 2;
        let answers = Arc::new(ConfiguredSolutions::from_config(&config));
        let state = AppState::new(
            config,
            CredentialService::new(b"roster-secret", Duration::from_secs(60)),
            answers,
        );
        let store = Arc::new(MemoryGameStore::new());
        state.install_game_store(store.clone()).await;
        (state, store)
    }

    #[tokio::test]
    async fn admission_stops_at_capacity() {
        let (state, store) = state_with_store().await;
        let game = GameEntity::new("ROSTER".into(), 1, 3);
        assert!(store.insert_game(game.clone()).await.unwrap());

        for name in ["ada", "bob"] {
            admit_player(&state, store.as_ref(), game.id, name.into(), "analyst".into())
                .await
                .unwrap();
        }
        let err = admit_player(&state, store.as_ref(), game.id, "eve".into(), "analyst".into())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::GameFull(_)));

        let roster = load_roster(store.as_ref(), game.id).await.unwrap();
        let names: Vec<_> = roster.iter().map(|player| player.name.as_str()).collect();
        assert_eq!(names, ["ada", "bob"]);
    }

    #[tokio::test]
    async fn admission_into_unknown_game_is_not_found() {
        let (state, store) = state_with_store().await;
        let err = admit_player(
            &state,
            store.as_ref(),
            Uuid::new_v4(),
            "ada".into(),
            "analyst".into(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn credentials_of_other_games_are_rejected() {
        let (state, store) = state_with_store().await;
        let game = GameEntity::new("ROSTER".into(), 1, 3);
        store.insert_game(game.clone()).await.unwrap();
        let admitted = admit_player(&state, store.as_ref(), game.id, "ada".into(), "x".into())
            .await
            .unwrap();

        let forged = Credential {
            game_id: Uuid::new_v4(),
            player_id: admitted.player.id,
            role: "x".into(),
        };
        assert!(matches!(
            require_player(store.as_ref(), &forged).await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            set_ready(&state, &forged, false).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
