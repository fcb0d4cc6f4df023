use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, error::ServiceError, state::SharedState};

const BEARER_SCHEMES: [&str; 2] = ["Bearer ", "bearer "];

/// Verify the `Authorization: Bearer` credential and expose it to handlers as
/// an `Extension<Credential>`.
pub async fn require_credential(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            BEARER_SCHEMES
                .iter()
                .find_map(|scheme| value.strip_prefix(scheme))
        });

    let credential = state
        .credentials()
        .authenticate(token)
        .map_err(ServiceError::from)?;
    req.extensions_mut().insert(credential);
    Ok(next.run(req).await)
}
