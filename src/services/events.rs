use axum::extract::ws::Message;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        game::PlayerView,
        ws::{
            ChatEvent, GameCompletedEvent, GameStartedEvent, GameStateSnapshot,
            PlayerConnectedEvent, PlayerJoinedEvent, PlayersUpdateEvent, PositionEvent,
            PuzzleSelectedEvent, PuzzleSolvedEvent, RelayEvent, RoomJoinedEvent, ServerEvent,
            SystemMessage,
        },
    },
    state::{ConnectionId, SharedState, lifecycle::FinishReason},
};

pub const EVENT_SYSTEM_HELLO: &str = "system:hello";
pub const EVENT_SYSTEM_ERROR: &str = "system:error";
pub const EVENT_ROOM_JOINED: &str = "room:joined";
pub const EVENT_PLAYER_CONNECTED: &str = "player:connected";
pub const EVENT_PLAYER_JOINED: &str = "player:joined";
pub const EVENT_PLAYERS_UPDATE: &str = "players:update";
pub const EVENT_CHAT: &str = "chat:msg";
pub const EVENT_PUZZLE_STATE: &str = "puzzle:state";
pub const EVENT_GAME_STATE_UPDATE: &str = "game:state:update";
pub const EVENT_PUZZLE_SELECT: &str = "player:enigme:select";
pub const EVENT_POSITION_UPDATE: &str = "player:position:update";
pub const EVENT_PUZZLE_SOLVED: &str = "puzzle:solved";
pub const EVENT_GAME_COMPLETED: &str = "game:completed";
pub const EVENT_GAME_STARTED: &str = "game:started";
pub const EVENT_GAME_STATE_RESPONSE: &str = "game:state:response";

/// Announce a new player to the room.
pub fn broadcast_player_joined(state: &SharedState, game_id: Uuid, player: PlayerView) {
    let payload = PlayerJoinedEvent { player };
    send_room_event(state, game_id, EVENT_PLAYER_JOINED, &payload, None);
}

/// Push the full roster after a readiness change.
pub fn broadcast_players_update(state: &SharedState, game_id: Uuid, roster: Vec<PlayerView>) {
    let payload = PlayersUpdateEvent { roster };
    send_room_event(state, game_id, EVENT_PLAYERS_UPDATE, &payload, None);
}

/// Tell the rest of the room that a player (re)connected.
pub fn broadcast_player_connected(
    state: &SharedState,
    game_id: Uuid,
    joiner: ConnectionId,
    payload: PlayerConnectedEvent,
) {
    send_room_event(state, game_id, EVENT_PLAYER_CONNECTED, &payload, Some(joiner));
}

/// Announce the start of the session clock.
pub fn broadcast_game_started(state: &SharedState, game_id: Uuid, ends_at: String) {
    let payload = GameStartedEvent { ends_at };
    send_room_event(state, game_id, EVENT_GAME_STARTED, &payload, None);
}

/// Announce the winner of a puzzle.
pub fn broadcast_puzzle_solved(state: &SharedState, game_id: Uuid, payload: PuzzleSolvedEvent) {
    send_room_event(state, game_id, EVENT_PUZZLE_SOLVED, &payload, None);
}

/// Announce the end of the game.
pub fn broadcast_game_completed(
    state: &SharedState,
    game_id: Uuid,
    completed_ids: Vec<String>,
    reason: FinishReason,
) {
    let payload = GameCompletedEvent {
        completed_ids,
        reason,
    };
    send_room_event(state, game_id, EVENT_GAME_COMPLETED, &payload, None);
}

/// Chat lines go to the whole room, sender included.
pub fn broadcast_chat(state: &SharedState, game_id: Uuid, payload: ChatEvent) {
    send_room_event(state, game_id, EVENT_CHAT, &payload, None);
}

/// Relay an opaque payload (`puzzle:state`, `game:state:update`) to the other members.
pub fn relay_payload(
    state: &SharedState,
    game_id: Uuid,
    event: &'static str,
    sender: ConnectionId,
    payload: RelayEvent,
) {
    send_room_event(state, game_id, event, &payload, Some(sender));
}

/// Relay the puzzle a player selected to the other members.
pub fn relay_puzzle_selected(
    state: &SharedState,
    game_id: Uuid,
    sender: ConnectionId,
    payload: PuzzleSelectedEvent,
) {
    send_room_event(state, game_id, EVENT_PUZZLE_SELECT, &payload, Some(sender));
}

/// Relay a pointer position to the other members.
pub fn relay_position(
    state: &SharedState,
    game_id: Uuid,
    sender: ConnectionId,
    payload: PositionEvent,
) {
    send_room_event(state, game_id, EVENT_POSITION_UPDATE, &payload, Some(sender));
}

/// Greet a freshly opened connection.
pub fn send_hello(tx: &mpsc::UnboundedSender<Message>) -> bool {
    let payload = SystemMessage {
        msg: "connected".into(),
    };
    send_direct(tx, EVENT_SYSTEM_HELLO, &payload)
}

/// Report a rejected frame to its sender only.
pub fn send_error(tx: &mpsc::UnboundedSender<Message>, msg: &str) -> bool {
    let payload = SystemMessage { msg: msg.into() };
    send_direct(tx, EVENT_SYSTEM_ERROR, &payload)
}

/// Resynchronize a connection that joined a room.
pub fn send_room_joined(tx: &mpsc::UnboundedSender<Message>, payload: &RoomJoinedEvent) -> bool {
    send_direct(tx, EVENT_ROOM_JOINED, payload)
}

/// Answer a `game:state:request`.
pub fn send_state_response(
    tx: &mpsc::UnboundedSender<Message>,
    payload: &GameStateSnapshot,
) -> bool {
    send_direct(tx, EVENT_GAME_STATE_RESPONSE, payload)
}

/// Serialize a payload and push it onto one connection's writer.
///
/// Returns `false` when the writer is gone. Serialization failures are logged
/// and reported as delivered since retrying cannot help.
fn send_direct(
    tx: &mpsc::UnboundedSender<Message>,
    event: &'static str,
    payload: &impl Serialize,
) -> bool {
    match ServerEvent::json(event, payload) {
        Ok(event) => tx.send(event.to_message()).is_ok(),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize websocket payload");
            true
        }
    }
}

fn send_room_event(
    state: &SharedState,
    game_id: Uuid,
    event: &'static str,
    payload: &impl Serialize,
    exclude: Option<ConnectionId>,
) {
    match ServerEvent::json(event, payload) {
        Ok(event) => {
            state.rooms().broadcast(game_id, &event, exclude);
        }
        Err(err) => warn!(event, %game_id, error = %err, "failed to serialize room payload"),
    }
}
