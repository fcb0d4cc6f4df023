use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report `ok` or `degraded`, pinging the record store on the way.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.game_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        None => warn!("storage unavailable (degraded mode)"),
    }

    if state.is_degraded() {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::memory::MemoryGameStore,
        services::{answers::ConfiguredSolutions, credentials::CredentialService},
        state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_until_a_store_is_installed() {
        let config = AppConfig::default();
        let answers = Arc::new(ConfiguredSolutions::from_config(&config));
        let state = AppState::new(
            config,
            CredentialService::new(b"health", Duration::from_secs(60)),
            answers,
        );
        assert!(!health_status(&state).await.ok);

        state
            .install_game_store(Arc::new(MemoryGameStore::new()))
            .await;
        let status = health_status(&state).await;
        assert!(status.ok);
        assert_eq!(status.status, "ok");

        state.set_degraded(true);
        assert!(!health_status(&state).await.ok);
    }
}
