use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::post,
};
use axum_valid::Valid;

use crate::{
    dto::progress::{SubmitAnswerRequest, SubmitAnswerResponse},
    error::AppError,
    routes::auth,
    services::{credentials::Credential, progress_service},
    state::SharedState,
};

/// Answer submission route.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/api/validate/{slug}", post(submit_answer))
        .route_layer(middleware::from_fn_with_state(state, auth::require_credential))
}

/// Submit an answer for a puzzle of the caller's game.
///
/// A correct answer for a puzzle another player already won returns `200`
/// with `alreadySolvedByOther = true`.
#[utoipa::path(
    post,
    path = "/api/validate/{slug}",
    tag = "progress",
    params(
        ("Authorization" = String, Header, description = "Bearer player credential"),
        ("slug" = String, Path, description = "Puzzle slug")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer evaluated", body = SubmitAnswerResponse),
        (status = 403, description = "Game closed", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown puzzle", body = crate::error::ErrorBody),
        (status = 409, description = "Game not started", body = crate::error::ErrorBody)
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Extension(credential): Extension<Credential>,
    Path(slug): Path<String>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<SubmitAnswerResponse>, AppError> {
    let outcome =
        progress_service::submit_answer(&state, &credential, &slug, &payload.attempt).await?;
    Ok(Json(outcome.into()))
}
