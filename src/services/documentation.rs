use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Manoir Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::game::create_game,
        crate::routes::game::join_game,
        crate::routes::game::join_random_game,
        crate::routes::game::start_game,
        crate::routes::game::set_ready,
        crate::routes::game::get_game,
        crate::routes::game::list_players,
        crate::routes::game::completed_puzzles,
        crate::routes::progress::submit_answer,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::dto::health::HealthResponse,
            crate::dto::game::PlayerProfileRequest,
            crate::dto::game::JoinGameRequest,
            crate::dto::game::ReadyRequest,
            crate::dto::game::SessionResponse,
            crate::dto::game::StartGameResponse,
            crate::dto::game::OkResponse,
            crate::dto::game::GameView,
            crate::dto::game::RuntimeStateView,
            crate::dto::game::PlayerView,
            crate::dto::game::RosterResponse,
            crate::dto::game::GameSnapshotResponse,
            crate::dto::game::CompletedPuzzlesResponse,
            crate::dto::progress::SubmitAnswerRequest,
            crate::dto::progress::SubmitAnswerResponse,
            crate::dto::ws::SystemMessage,
            crate::dto::ws::GameStateSnapshot,
            crate::dto::ws::RoomJoinedEvent,
            crate::dto::ws::PlayerConnectedEvent,
            crate::dto::ws::PlayerJoinedEvent,
            crate::dto::ws::PlayersUpdateEvent,
            crate::dto::ws::ChatEvent,
            crate::dto::ws::RelayEvent,
            crate::dto::ws::PuzzleSelectedEvent,
            crate::dto::ws::PositionEvent,
            crate::dto::ws::PuzzleSolvedEvent,
            crate::dto::ws::GameCompletedEvent,
            crate::dto::ws::GameStartedEvent,
            crate::state::lifecycle::GameStatus,
            crate::state::lifecycle::FinishReason,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "Game sessions, roster and readiness"),
        (name = "progress", description = "Answer submission and puzzle credit"),
        (name = "realtime", description = "WebSocket rooms relaying game events"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/games",
            "/api/games/join",
            "/api/games/join-random",
            "/api/games/start",
            "/api/games/ready",
            "/api/games/{id}",
            "/api/games/{id}/players",
            "/api/games/{id}/completed",
            "/api/validate/{slug}",
            "/ws",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
