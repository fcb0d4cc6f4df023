//! Realtime frames exchanged over `/ws`.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": {...}}` in both
//! directions.

use axum::extract::ws::{Message, Utf8Bytes};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::game::PlayerView,
    state::lifecycle::{FinishReason, GameStatus},
};

#[derive(Clone, Debug)]
/// Serialized server frame, shared by every room member it is sent to.
pub struct ServerEvent {
    pub event: &'static str,
    frame: Utf8Bytes,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    event: &'a str,
    data: &'a T,
}

impl ServerEvent {
    /// Serialise `payload` into an `{event, data}` envelope.
    pub fn json<T: Serialize>(event: &'static str, payload: &T) -> serde_json::Result<Self> {
        let frame = serde_json::to_string(&Envelope {
            event,
            data: payload,
        })?;
        Ok(Self {
            event,
            frame: frame.into(),
        })
    }

    /// Encoded envelope.
    pub fn frame(&self) -> &str {
        self.frame.as_str()
    }

    /// WebSocket text message carrying the envelope.
    pub fn to_message(&self) -> Message {
        Message::Text(self.frame.clone())
    }
}

/// Messages accepted from realtime clients.
///
/// Credentials travel in each payload as `credential` (or `token`); relay
/// events may omit it once the connection joined a room.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "room:join")]
    RoomJoin {
        #[serde(default, alias = "token")]
        credential: Option<String>,
    },
    #[serde(rename = "chat:msg")]
    ChatMessage {
        #[serde(default, alias = "token")]
        credential: Option<String>,
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "puzzle:state")]
    PuzzleState {
        #[serde(default, alias = "token")]
        credential: Option<String>,
        #[serde(default)]
        payload: serde_json::Value,
    },
    #[serde(rename = "game:state:update")]
    GameStateUpdate {
        #[serde(default, alias = "token")]
        credential: Option<String>,
        #[serde(default)]
        payload: serde_json::Value,
    },
    #[serde(rename = "player:enigme:select")]
    PuzzleSelect {
        #[serde(default, alias = "token")]
        credential: Option<String>,
        #[serde(alias = "enigmeId")]
        puzzle_id: String,
    },
    #[serde(rename = "player:position:update")]
    PositionUpdate {
        #[serde(default, alias = "token")]
        credential: Option<String>,
        x: f64,
        y: f64,
    },
    #[serde(rename = "game:state:request")]
    StateRequest {
        #[serde(default, alias = "token")]
        credential: Option<String>,
    },
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Credential carried by the message, if any.
    pub fn credential(&self) -> Option<&str> {
        match self {
            ClientMessage::RoomJoin { credential }
            | ClientMessage::ChatMessage { credential, .. }
            | ClientMessage::PuzzleState { credential, .. }
            | ClientMessage::GameStateUpdate { credential, .. }
            | ClientMessage::PuzzleSelect { credential, .. }
            | ClientMessage::PositionUpdate { credential, .. }
            | ClientMessage::StateRequest { credential } => credential.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent on connect and as a reply to invalid frames.
pub struct SystemMessage {
    pub msg: String,
}

/// Authoritative view of a game sent to (re)joining clients.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    pub phase: GameStatus,
    pub completed_ids: Vec<String>,
    pub current_puzzle_index: u32,
    pub current_puzzle_slug: Option<String>,
    pub ends_at: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub puzzle_state: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Reply to a successful `room:join`.
pub struct RoomJoinedEvent {
    pub game_id: Uuid,
    pub roster: Vec<PlayerView>,
    pub game_state: GameStateSnapshot,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Presence of a player who (re)joined the room.
pub struct PlayerConnectedEvent {
    pub player_id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// A new player entered the game.
pub struct PlayerJoinedEvent {
    pub player: PlayerView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Full roster after a readiness change.
pub struct PlayersUpdateEvent {
    pub roster: Vec<PlayerView>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Chat line broadcast to the whole room.
pub struct ChatEvent {
    pub sender: String,
    pub sender_id: Uuid,
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Ephemeral payload relayed to the other members of the room.
pub struct RelayEvent {
    pub from: Uuid,
    pub name: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Puzzle a player is looking at.
pub struct PuzzleSelectedEvent {
    pub player_id: Uuid,
    pub name: String,
    pub puzzle_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Pointer position of a player.
pub struct PositionEvent {
    pub player_id: Uuid,
    pub name: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// A puzzle received its completion.
pub struct PuzzleSolvedEvent {
    pub solver_name: String,
    pub solver_id: Uuid,
    pub puzzle_slug: String,
    pub points: i64,
    pub completed_ids: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// The game finished.
pub struct GameCompletedEvent {
    pub completed_ids: Vec<String>,
    pub reason: FinishReason,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// The session clock started.
pub struct GameStartedEvent {
    pub ends_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_events_are_wrapped_in_an_envelope() {
        let event = ServerEvent::json(
            "game:started",
            &GameStartedEvent {
                ends_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(event.frame()).unwrap();
        assert_eq!(value["event"], "game:started");
        assert_eq!(value["data"]["endsAt"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn client_messages_accept_token_alias() {
        let message = ClientMessage::from_json_str(
            r#"{"event": "room:join", "data": {"token": "abc"}}"#,
        )
        .unwrap();
        assert_eq!(message.credential(), Some("abc"));

        let message = ClientMessage::from_json_str(
            r#"{"event": "player:enigme:select", "data": {"credential": "t", "puzzleId": "p1"}}"#,
        )
        .unwrap();
        assert!(matches!(
            message,
            ClientMessage::PuzzleSelect { ref puzzle_id, .. } if puzzle_id == "p1"
        ));
    }

    #[test]
    fn relay_events_may_omit_the_credential() {
        let message = ClientMessage::from_json_str(
            r#"{"event": "chat:msg", "data": {"text": "hello"}}"#,
        )
        .unwrap();
        assert_eq!(message.credential(), None);
    }

    #[test]
    fn unknown_events_are_rejected() {
        assert!(ClientMessage::from_json_str(r#"{"event": "admin:reset", "data": {}}"#).is_err());
    }
}
