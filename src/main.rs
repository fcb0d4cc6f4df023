//! Manoir Back binary entrypoint wiring REST, WebSocket and record store layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manoir_back::{
    config::AppConfig,
    dao::game_store::memory::MemoryGameStore,
    routes,
    services::{answers::ConfiguredSolutions, credentials::CredentialService, expiry_service},
    state::{AppState, SharedState},
};

const STORAGE_BACKEND_ENV: &str = "STORAGE_BACKEND";

/// Record store selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageBackend {
    Memory,
    Mongo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let answers = Arc::new(ConfiguredSolutions::from_config(&config));
    let app_state = AppState::new(config, CredentialService::from_env(), answers);

    start_storage(&app_state, storage_backend()?).await?;
    tokio::spawn(expiry_service::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Read `STORAGE_BACKEND`, defaulting to MongoDB when it is compiled in.
fn storage_backend() -> anyhow::Result<StorageBackend> {
    let value = env::var(STORAGE_BACKEND_ENV).unwrap_or_default();
    match value.trim().to_ascii_lowercase().as_str() {
        "" if cfg!(feature = "mongo-store") => Ok(StorageBackend::Mongo),
        "" | "memory" => Ok(StorageBackend::Memory),
        "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
        other => bail!("unknown {STORAGE_BACKEND_ENV} `{other}`; expected `memory` or `mongo`"),
    }
}

async fn start_storage(state: &SharedState, backend: StorageBackend) -> anyhow::Result<()> {
    match backend {
        StorageBackend::Memory => {
            warn!("using the in-memory record store; games are lost on restart");
            state
                .install_game_store(Arc::new(MemoryGameStore::new()))
                .await;
            Ok(())
        }
        StorageBackend::Mongo => spawn_mongo_supervisor(state),
    }
}

/// Supervise the MongoDB connection in the background; the API stays in
/// degraded mode until the first connection succeeds.
#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: &SharedState) -> anyhow::Result<()> {
    use manoir_back::{
        dao::{
            game_store::{
                GameStore,
                mongodb::{MongoConfig, MongoGameStore},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    tokio::spawn(storage_supervisor::run(state.clone(), || async {
        let config = MongoConfig::from_env().await?;
        let store = MongoGameStore::connect(config).await?;
        Ok::<_, StorageError>(Arc::new(store) as Arc<dyn GameStore>)
    }));
    Ok(())
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_mongo_supervisor(_state: &SharedState) -> anyhow::Result<()> {
    bail!("built without the `mongo-store` feature; set {STORAGE_BACKEND_ENV}=memory")
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
