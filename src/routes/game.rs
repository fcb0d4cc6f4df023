use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::game::{
        CompletedPuzzlesResponse, GameSnapshotResponse, JoinGameRequest, OkResponse,
        PlayerProfileRequest, ReadyRequest, RosterResponse, SessionResponse, StartGameResponse,
    },
    error::AppError,
    routes::auth,
    services::{credentials::Credential, progress_service, roster_service, session_service},
    state::SharedState,
};

/// Game session routes: creation, joining, start, readiness and snapshots.
pub fn router(state: SharedState) -> Router<SharedState> {
    let authenticated = Router::new()
        .route("/api/games/start", post(start_game))
        .route("/api/games/ready", post(set_ready))
        .route("/api/games/{id}/completed", get(completed_puzzles))
        .route_layer(middleware::from_fn_with_state(state, auth::require_credential));

    Router::new()
        .route("/api/games", post(create_game))
        .route("/api/games/join", post(join_game))
        .route("/api/games/join-random", post(join_random_game))
        .route("/api/games/{id}", get(get_game))
        .route("/api/games/{id}/players", get(list_players))
        .merge(authenticated)
}

/// Create a waiting game; the caller becomes its first player.
#[utoipa::path(
    post,
    path = "/api/games",
    tag = "game",
    request_body = PlayerProfileRequest,
    responses(
        (status = 200, description = "Game created", body = SessionResponse),
        (status = 503, description = "No free join code or storage unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<PlayerProfileRequest>>,
) -> Result<Json<SessionResponse>, AppError> {
    Ok(Json(session_service::create_game(&state, payload).await?))
}

/// Join an open game with its code.
#[utoipa::path(
    post,
    path = "/api/games/join",
    tag = "game",
    request_body = JoinGameRequest,
    responses(
        (status = 200, description = "Joined", body = SessionResponse),
        (status = 403, description = "Game closed or full", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown code", body = crate::error::ErrorBody)
    )
)]
pub async fn join_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinGameRequest>>,
) -> Result<Json<SessionResponse>, AppError> {
    Ok(Json(session_service::join_game(&state, payload).await?))
}

/// Join any waiting game with a free slot, creating one when none exists.
#[utoipa::path(
    post,
    path = "/api/games/join-random",
    tag = "game",
    request_body = PlayerProfileRequest,
    responses((status = 200, description = "Joined or created", body = SessionResponse))
)]
pub async fn join_random_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<PlayerProfileRequest>>,
) -> Result<Json<SessionResponse>, AppError> {
    Ok(Json(session_service::join_random_game(&state, payload).await?))
}

/// Start the session clock of the caller's game.
#[utoipa::path(
    post,
    path = "/api/games/start",
    tag = "game",
    params(("Authorization" = String, Header, description = "Bearer player credential")),
    responses(
        (status = 200, description = "Game running", body = StartGameResponse),
        (status = 401, description = "Missing or invalid credential", body = crate::error::ErrorBody),
        (status = 403, description = "Game closed", body = crate::error::ErrorBody)
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Extension(credential): Extension<Credential>,
) -> Result<Json<StartGameResponse>, AppError> {
    Ok(Json(session_service::start_game(&state, &credential).await?))
}

/// Toggle the caller's readiness.
#[utoipa::path(
    post,
    path = "/api/games/ready",
    tag = "game",
    params(("Authorization" = String, Header, description = "Bearer player credential")),
    request_body = ReadyRequest,
    responses((status = 200, description = "Readiness stored", body = OkResponse))
)]
pub async fn set_ready(
    State(state): State<SharedState>,
    Extension(credential): Extension<Credential>,
    Json(payload): Json<ReadyRequest>,
) -> Result<Json<OkResponse>, AppError> {
    Ok(Json(
        roster_service::set_ready(&state, &credential, payload.ready).await?,
    ))
}

/// Snapshot of a game: record, runtime state and roster.
#[utoipa::path(
    get,
    path = "/api/games/{id}",
    tag = "game",
    params(("id" = Uuid, Path, description = "Identifier of the game")),
    responses(
        (status = 200, description = "Game snapshot", body = GameSnapshotResponse),
        (status = 404, description = "Unknown game", body = crate::error::ErrorBody)
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameSnapshotResponse>, AppError> {
    Ok(Json(session_service::get_game(&state, id).await?))
}

/// Players of a game ordered by join time.
#[utoipa::path(
    get,
    path = "/api/games/{id}/players",
    tag = "game",
    params(("id" = Uuid, Path, description = "Identifier of the game")),
    responses((status = 200, description = "Roster", body = RosterResponse))
)]
pub async fn list_players(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RosterResponse>, AppError> {
    Ok(Json(roster_service::list_players(&state, id).await?))
}

/// Puzzles credited in the caller's game.
#[utoipa::path(
    get,
    path = "/api/games/{id}/completed",
    tag = "game",
    params(
        ("Authorization" = String, Header, description = "Bearer player credential"),
        ("id" = Uuid, Path, description = "Identifier of the game")
    ),
    responses(
        (status = 200, description = "Completed puzzles", body = CompletedPuzzlesResponse),
        (status = 403, description = "Credential of another game", body = crate::error::ErrorBody)
    )
)]
pub async fn completed_puzzles(
    State(state): State<SharedState>,
    Extension(credential): Extension<Credential>,
    Path(id): Path<Uuid>,
) -> Result<Json<CompletedPuzzlesResponse>, AppError> {
    Ok(Json(
        progress_service::get_completed_puzzles(&state, &credential, id).await?,
    ))
}
