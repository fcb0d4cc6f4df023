#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::extract::ws::Message;
use manoir_back::{
    config::AppConfig,
    dao::game_store::{GameStore, memory::MemoryGameStore},
    dto::game::{JoinGameRequest, PlayerProfileRequest, SessionResponse},
    services::{
        answers::ConfiguredSolutions,
        credentials::{Credential, CredentialService},
        session_service,
    },
    state::{AppState, RoomMember, SharedState},
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_CONFIG: &str = r#"{
    "puzzles": {
        "p1": {"answers": ["ok"]},
        "p2": {"answers": ["second"]},
        "p3": {"answers": ["third"], "dynamicAnswer": "poem"}
    },
    "solutions": {"poem": "Musée Oublié"},
    "puzzlePoints": 100
}"#;

pub fn test_state() -> SharedState {
    let config = AppConfig::from_json(TEST_CONFIG).expect("test config");
    let answers = Arc::new(ConfiguredSolutions::from_config(&config));
    AppState::new(
        config,
        CredentialService::new(b"integration-secret", Duration::from_secs(600)),
        answers,
    )
}

pub async fn memory_state() -> (SharedState, Arc<dyn GameStore>) {
    let state = test_state();
    let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());
    state.install_game_store(store.clone()).await;
    (state, store)
}

pub fn credential(state: &SharedState, session: &SessionResponse) -> Credential {
    state
        .credentials()
        .authenticate(Some(&session.player_token))
        .expect("valid credential")
}

pub async fn create(state: &SharedState, nickname: &str) -> SessionResponse {
    session_service::create_game(state, profile(nickname))
        .await
        .expect("create game")
}

pub async fn join(state: &SharedState, code: &str, nickname: &str) -> SessionResponse {
    session_service::join_game(
        state,
        JoinGameRequest {
            code: code.into(),
            profile: profile(nickname),
        },
    )
    .await
    .expect("join game")
}

pub fn profile(nickname: &str) -> PlayerProfileRequest {
    PlayerProfileRequest {
        nickname: Some(nickname.into()),
        role: None,
    }
}

/// Listen to a room the way a connected client would.
pub fn listen(state: &SharedState, game_id: Uuid) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.rooms().join(
        game_id,
        Uuid::new_v4(),
        RoomMember {
            player_id: Uuid::new_v4(),
            name: "observer".into(),
            tx,
        },
    );
    rx
}

/// Drain every queued frame as `(event, data)` pairs.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<(String, serde_json::Value)> {
    let mut frames = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            frames.push((
                value["event"].as_str().unwrap_or_default().to_owned(),
                value["data"].clone(),
            ));
        }
    }
    frames
}

pub fn count_events(frames: &[(String, serde_json::Value)], event: &str) -> usize {
    frames.iter().filter(|(name, _)| name == event).count()
}
