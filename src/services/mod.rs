/// Puzzle answer evaluation.
pub mod answers;
/// Session credential issuing and verification.
pub mod credentials;
/// OpenAPI documentation generation.
pub mod documentation;
/// Realtime room event names and fan-out helpers.
pub mod events;
/// Background finishing of expired games and purge of stale lobbies.
pub mod expiry_service;
/// Health check service.
pub mod health_service;
/// Answer submission and the completion ledger.
pub mod progress_service;
/// Player admission, roster and readiness.
pub mod roster_service;
/// Game creation, joining and start.
pub mod session_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
