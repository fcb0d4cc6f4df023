use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{GameEntity, PlayerEntity, RuntimeStateEntity},
    dto::{format_system_time, validation::validate_join_code},
    state::lifecycle::GameStatus,
};

const DEFAULT_NICKNAME: &str = "Agent";
/// Role given to the player who creates a game.
pub const CREATOR_ROLE: &str = "curator";
/// Role given to players joining an existing game.
pub const JOINER_ROLE: &str = "analyst";

/// Optional display name and role supplied when entering a game.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct PlayerProfileRequest {
    #[validate(length(min = 1, max = 100))]
    pub nickname: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub role: Option<String>,
}

impl PlayerProfileRequest {
    /// Nickname, defaulting to `Agent`.
    pub fn nickname(&self) -> String {
        resolve(self.nickname.as_deref(), DEFAULT_NICKNAME)
    }

    /// Role, defaulting to `default_role`.
    pub fn role_or(&self, default_role: &str) -> String {
        resolve(self.role.as_deref(), default_role)
    }
}

fn resolve(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
        .to_owned()
}

/// Payload used to join a game by its code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinGameRequest {
    #[validate(custom(function = "validate_join_code"))]
    pub code: String,
    #[serde(flatten)]
    #[validate(nested)]
    pub profile: PlayerProfileRequest,
}

/// Readiness toggle of the calling player.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReadyRequest {
    pub ready: bool,
}

/// Returned when a player enters a game.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub code: String,
    /// Credential to present as `Authorization: Bearer` and in realtime events.
    pub player_token: String,
    /// Set by `join-random`: whether a new game had to be created.
    pub created: Option<bool>,
}

/// Returned when the session clock starts.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartGameResponse {
    pub ok: bool,
    pub ends_at: String,
}

/// Generic acknowledgement.
#[derive(Debug, Serialize, ToSchema)]
pub struct OkResponse {
    pub ok: bool,
}

/// Public projection of a game.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub id: Uuid,
    pub code: String,
    pub status: GameStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ends_at: Option<String>,
    pub current_puzzle_index: u32,
    pub hints_left: u32,
    pub seed: u32,
    pub player_count: u32,
}

impl From<GameEntity> for GameView {
    fn from(game: GameEntity) -> Self {
        Self {
            id: game.id,
            code: game.code,
            status: game.status,
            created_at: format_system_time(game.created_at),
            started_at: game.started_at.map(format_system_time),
            ends_at: game.ends_at.map(format_system_time),
            current_puzzle_index: game.current_puzzle_index,
            hints_left: game.hints_left,
            seed: game.seed,
            player_count: game.player_count,
        }
    }
}

/// Runtime state of the current puzzle.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStateView {
    pub current_puzzle_slug: String,
    pub attempts: u32,
    pub solved: bool,
    #[schema(value_type = Option<Object>)]
    pub puzzle_state: Option<serde_json::Value>,
}

impl From<RuntimeStateEntity> for RuntimeStateView {
    fn from(state: RuntimeStateEntity) -> Self {
        Self {
            current_puzzle_slug: state.current_puzzle_slug,
            attempts: state.attempts,
            solved: state.solved,
            puzzle_state: state.puzzle_state,
        }
    }
}

/// Roster entry of a player.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PlayerView {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    /// Presence flag, read as readiness in the lobby.
    pub ready: bool,
    pub score: i64,
}

impl From<PlayerEntity> for PlayerView {
    fn from(player: PlayerEntity) -> Self {
        Self {
            id: player.id,
            name: player.nickname,
            role: player.role,
            ready: player.is_connected,
            score: player.score_total,
        }
    }
}

/// Players of a game ordered by join time.
#[derive(Debug, Serialize, ToSchema)]
pub struct RosterResponse {
    pub players: Vec<PlayerView>,
}

/// Read-only snapshot of a game.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameSnapshotResponse {
    pub game: GameView,
    pub state: Option<RuntimeStateView>,
    pub roster: Vec<PlayerView>,
}

/// Puzzles credited so far, ordered by completion time.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPuzzlesResponse {
    pub game_id: Uuid,
    pub completed_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_defaults_apply_to_missing_or_blank_values() {
        let profile = PlayerProfileRequest {
            nickname: Some("   ".into()),
            role: None,
        };
        assert_eq!(profile.nickname(), "Agent");
        assert_eq!(profile.role_or(JOINER_ROLE), "analyst");
    }

    #[test]
    fn profile_length_limits_are_enforced() {
        let too_long = PlayerProfileRequest {
            nickname: Some("x".repeat(101)),
            role: Some("curator".into()),
        };
        assert!(too_long.validate().is_err());

        let empty_role = PlayerProfileRequest {
            nickname: None,
            role: Some(String::new()),
        };
        assert!(empty_role.validate().is_err());
        assert!(PlayerProfileRequest::default().validate().is_ok());
    }

    #[test]
    fn join_request_validates_code_and_profile() {
        let request: JoinGameRequest =
            serde_json::from_str(r#"{"code": "ab12cd", "nickname": "Ada"}"#).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.profile.nickname(), "Ada");

        let request: JoinGameRequest = serde_json::from_str(r#"{"code": "AB-1"}"#).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn session_response_omits_unset_created_flag() {
        let response = SessionResponse {
            game_id: Uuid::nil(),
            player_id: Uuid::nil(),
            code: "ABC123".into(),
            player_token: "token".into(),
            created: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("created").is_none());
        assert_eq!(json["playerToken"], "token");
    }
}
