use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/health` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the record store is reachable.
    pub ok: bool,
    /// Health status ("ok" or "degraded").
    pub status: String,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok() -> Self {
        Self {
            ok: true,
            status: "ok".to_string(),
        }
    }

    /// Create a health response indicating the system runs without storage.
    pub fn degraded() -> Self {
        Self {
            ok: false,
            status: "degraded".to_string(),
        }
    }
}
