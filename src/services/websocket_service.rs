use std::time::SystemTime;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        format_system_time,
        ws::{
            ChatEvent, ClientMessage, PlayerConnectedEvent, PositionEvent, PuzzleSelectedEvent,
            RelayEvent, RoomJoinedEvent,
        },
    },
    error::ServiceError,
    services::{
        credentials::CredentialError, events, progress_service, roster_service, session_service,
    },
    state::{ConnectionId, RoomMember, SharedState},
};

const MAX_CHAT_CHARS: usize = 500;

/// Internal error type for realtime event handling.
///
/// Relay failures are dropped silently; only `room:join` reports them back to
/// the client as a `system:error`.
#[derive(Debug, Error)]
enum RealtimeError {
    /// No credential on the event and the connection never joined a room.
    #[error("event carries no credential and the connection has not joined a room")]
    Anonymous,
    /// The credential failed verification.
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// The payload is unusable.
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
    /// Error from the record store or a service.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

impl RealtimeError {
    fn client_code(&self) -> &'static str {
        match self {
            RealtimeError::Anonymous
            | RealtimeError::Credential(_)
            | RealtimeError::Service(ServiceError::Unauthorized(_) | ServiceError::Forbidden(_)) => {
                "unauthorized"
            }
            RealtimeError::Service(ServiceError::NotFound(_)) => "not_found",
            RealtimeError::Service(ServiceError::Degraded | ServiceError::Unavailable(_)) => {
                "unavailable"
            }
            RealtimeError::InvalidPayload(_) | RealtimeError::Service(_) => "error",
        }
    }
}

#[derive(Debug, Clone)]
struct Participant {
    game_id: Uuid,
    player_id: Uuid,
    name: String,
}

/// Per-connection realtime state.
pub struct ConnectionContext {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
    joined: Option<Participant>,
}

impl ConnectionContext {
    /// Fresh connection pushing frames through `tx`.
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            joined: None,
        }
    }

    /// Identifier used for room membership.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Game whose room this connection joined, if any.
    pub fn joined_game(&self) -> Option<Uuid> {
        self.joined.as_ref().map(|participant| participant.game_id)
    }

    /// Leave the current room, if any.
    pub fn leave_room(&mut self, state: &SharedState) {
        if let Some(participant) = self.joined.take() {
            state.rooms().leave(participant.game_id, self.id);
        }
    }
}

/// Handle the full lifecycle of a realtime client connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut connection = ConnectionContext::new(outbound_tx.clone());
    info!(connection = %connection.id, "realtime client connected");
    if !events::send_hello(&outbound_tx) {
        finalize(writer_task, outbound_tx).await;
        return;
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(message) => handle_client_message(&state, &mut connection, message).await,
                Err(err) => {
                    debug!(connection = %connection.id, error = %err, "failed to parse realtime message");
                    events::send_error(&outbound_tx, "invalid_message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection = %connection.id, error = %err, "websocket error");
                break;
            }
        }
    }

    connection.leave_room(&state);
    info!(connection = %connection.id, "realtime client disconnected");
    drop(connection);

    finalize(writer_task, outbound_tx).await;
}

/// Apply one inbound realtime message on behalf of `connection`.
pub async fn handle_client_message(
    state: &SharedState,
    connection: &mut ConnectionContext,
    message: ClientMessage,
) {
    let outcome = match message {
        ClientMessage::RoomJoin { credential } => {
            if let Err(err) = join_room(state, connection, credential.as_deref()).await {
                debug!(connection = %connection.id, error = %err, "room join rejected");
                events::send_error(&connection.tx, err.client_code());
            }
            return;
        }
        ClientMessage::ChatMessage { credential, text } => {
            relay_chat(state, connection, credential.as_deref(), &text).await
        }
        ClientMessage::PuzzleState {
            credential,
            payload,
        } => relay_puzzle_state(state, connection, credential.as_deref(), payload).await,
        ClientMessage::GameStateUpdate {
            credential,
            payload,
        } => {
            relay_opaque(
                state,
                connection,
                credential.as_deref(),
                events::EVENT_GAME_STATE_UPDATE,
                payload,
            )
            .await
        }
        ClientMessage::PuzzleSelect {
            credential,
            puzzle_id,
        } => relay_puzzle_select(state, connection, credential.as_deref(), puzzle_id).await,
        ClientMessage::PositionUpdate { credential, x, y } => {
            relay_position(state, connection, credential.as_deref(), x, y).await
        }
        ClientMessage::StateRequest { credential } => {
            answer_state_request(state, connection, credential.as_deref()).await
        }
    };

    if let Err(err) = outcome {
        debug!(connection = %connection.id, error = %err, "dropping realtime event");
    }
}

/// Authenticate, enter the game room and resynchronize the client.
async fn join_room(
    state: &SharedState,
    connection: &mut ConnectionContext,
    token: Option<&str>,
) -> Result<(), RealtimeError> {
    let credential = state.credentials().authenticate(token)?;
    let store = state.require_game_store().await?;
    let player = roster_service::require_player(store.as_ref(), &credential).await?;

    connection.leave_room(state);
    state.rooms().join(
        credential.game_id,
        connection.id,
        RoomMember {
            player_id: player.id,
            name: player.nickname.clone(),
            tx: connection.tx.clone(),
        },
    );
    connection.joined = Some(Participant {
        game_id: credential.game_id,
        player_id: player.id,
        name: player.nickname.clone(),
    });

    // The snapshot is read after joining so no event falls between the two.
    let snapshot = async {
        let game = session_service::load_game(store.as_ref(), credential.game_id).await?;
        let roster = roster_service::load_roster(store.as_ref(), game.id).await?;
        let game_state = progress_service::state_snapshot(store.as_ref(), &game).await?;
        Ok::<_, ServiceError>(RoomJoinedEvent {
            game_id: game.id,
            roster,
            game_state,
        })
    }
    .await;
    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(err) => {
            connection.leave_room(state);
            return Err(err.into());
        }
    };

    events::send_room_joined(&connection.tx, &snapshot);
    events::broadcast_player_connected(
        state,
        credential.game_id,
        connection.id,
        PlayerConnectedEvent {
            player_id: player.id,
            name: player.nickname,
        },
    );
    info!(connection = %connection.id, game_id = %credential.game_id, player_id = %player.id, "joined room");
    Ok(())
}

/// Identify the author of a relay event.
///
/// An explicit credential wins; without one the identity established by
/// `room:join` is used.
async fn resolve_sender(
    state: &SharedState,
    connection: &ConnectionContext,
    token: Option<&str>,
) -> Result<Participant, RealtimeError> {
    let Some(token) = token else {
        return connection.joined.clone().ok_or(RealtimeError::Anonymous);
    };

    let credential = state.credentials().authenticate(Some(token))?;
    if let Some(joined) = connection.joined.as_ref().filter(|joined| {
        joined.player_id == credential.player_id && joined.game_id == credential.game_id
    }) {
        return Ok(joined.clone());
    }

    let store = state.require_game_store().await?;
    let player = roster_service::require_player(store.as_ref(), &credential).await?;
    Ok(Participant {
        game_id: credential.game_id,
        player_id: player.id,
        name: player.nickname,
    })
}

async fn relay_chat(
    state: &SharedState,
    connection: &ConnectionContext,
    token: Option<&str>,
    text: &str,
) -> Result<(), RealtimeError> {
    let sender = resolve_sender(state, connection, token).await?;
    let text: String = text.trim().chars().take(MAX_CHAT_CHARS).collect();
    if text.is_empty() {
        return Err(RealtimeError::InvalidPayload("empty chat message"));
    }

    events::broadcast_chat(
        state,
        sender.game_id,
        ChatEvent {
            sender: sender.name,
            sender_id: sender.player_id,
            text,
            timestamp: format_system_time(SystemTime::now()),
        },
    );
    Ok(())
}

async fn relay_puzzle_state(
    state: &SharedState,
    connection: &ConnectionContext,
    token: Option<&str>,
    payload: serde_json::Value,
) -> Result<(), RealtimeError> {
    let sender = resolve_sender(state, connection, token).await?;
    let game_id = sender.game_id;
    events::relay_payload(
        state,
        game_id,
        events::EVENT_PUZZLE_STATE,
        connection.id,
        RelayEvent {
            from: sender.player_id,
            name: sender.name,
            payload: payload.clone(),
        },
    );

    // Kept for late joiners; losing it only costs a visual resync.
    if let Some(store) = state.game_store().await {
        if let Err(err) = store.set_puzzle_state(game_id, payload).await {
            warn!(%game_id, error = %err, "failed to persist puzzle state");
        }
    }
    Ok(())
}

async fn relay_opaque(
    state: &SharedState,
    connection: &ConnectionContext,
    token: Option<&str>,
    event: &'static str,
    payload: serde_json::Value,
) -> Result<(), RealtimeError> {
    let sender = resolve_sender(state, connection, token).await?;
    events::relay_payload(
        state,
        sender.game_id,
        event,
        connection.id,
        RelayEvent {
            from: sender.player_id,
            name: sender.name,
            payload,
        },
    );
    Ok(())
}

async fn relay_puzzle_select(
    state: &SharedState,
    connection: &ConnectionContext,
    token: Option<&str>,
    puzzle_id: String,
) -> Result<(), RealtimeError> {
    let sender = resolve_sender(state, connection, token).await?;
    events::relay_puzzle_selected(
        state,
        sender.game_id,
        connection.id,
        PuzzleSelectedEvent {
            player_id: sender.player_id,
            name: sender.name,
            puzzle_id,
        },
    );
    Ok(())
}

async fn relay_position(
    state: &SharedState,
    connection: &ConnectionContext,
    token: Option<&str>,
    x: f64,
    y: f64,
) -> Result<(), RealtimeError> {
    if !x.is_finite() || !y.is_finite() {
        return Err(RealtimeError::InvalidPayload("non-finite position"));
    }
    let sender = resolve_sender(state, connection, token).await?;
    events::relay_position(
        state,
        sender.game_id,
        connection.id,
        PositionEvent {
            player_id: sender.player_id,
            name: sender.name,
            x,
            y,
        },
    );
    Ok(())
}

async fn answer_state_request(
    state: &SharedState,
    connection: &ConnectionContext,
    token: Option<&str>,
) -> Result<(), RealtimeError> {
    let sender = resolve_sender(state, connection, token).await?;
    let store = state.require_game_store().await?;
    let game = session_service::load_game(store.as_ref(), sender.game_id).await?;
    let snapshot = progress_service::state_snapshot(store.as_ref(), &game).await?;
    events::send_state_response(&connection.tx, &snapshot);
    Ok(())
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
