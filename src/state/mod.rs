pub mod lifecycle;
pub mod rooms;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::game_store::GameStore,
    error::ServiceError,
    services::{answers::AnswerSource, credentials::CredentialService},
};

pub use self::rooms::{ConnectionId, RoomHub, RoomMember};

pub type SharedState = Arc<AppState>;

/// Central application state: record store handle, configuration, credential
/// service and realtime rooms.
pub struct AppState {
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    config: Arc<AppConfig>,
    credentials: CredentialService,
    answers: Arc<dyn AnswerSource>,
    rooms: RoomHub,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(
        config: AppConfig,
        credentials: CredentialService,
        answers: Arc<dyn AnswerSource>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            game_store: RwLock::new(None),
            config: Arc::new(config),
            credentials,
            answers,
            rooms: RoomHub::new(),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current game store, or [`ServiceError::Degraded`] when none is installed
    /// or the installed one failed its health checks.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn install_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.set_degraded(false);
    }

    /// Remove the current game store and enter degraded mode.
    pub async fn clear_game_store(&self) {
        {
            let mut guard = self.game_store.write().await;
            guard.take();
        }
        self.set_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Immutable configuration.
    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Issuer and verifier of session credentials.
    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    /// Source of dynamic puzzle solutions.
    pub fn answers(&self) -> &dyn AnswerSource {
        self.answers.as_ref()
    }

    /// Realtime rooms keyed by game.
    pub fn rooms(&self) -> &RoomHub {
        &self.rooms
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
