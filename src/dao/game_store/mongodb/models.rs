use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::{
    dao::models::{
        GameEntity, PlayerEntity, PlayerPuzzleProgressEntity, PuzzleCompletionEntity,
        RuntimeStateEntity,
    },
    state::lifecycle::GameStatus,
};

pub const GAME_COLLECTION: &str = "games";
pub const PLAYER_COLLECTION: &str = "players";
pub const RUNTIME_COLLECTION: &str = "runtime_state";
pub const PROGRESS_COLLECTION: &str = "player_progress";
pub const COMPLETION_COLLECTION: &str = "completions";

fn parse_id(collection: &'static str, value: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(value).map_err(|err| MongoDaoError::Decode {
        collection,
        message: format!("invalid uuid `{value}`: {err}"),
    })
}

pub fn doc_id(id: impl ToString) -> Document {
    doc! {"_id": id.to_string()}
}

/// Key shared by the per-player progress and completion documents.
pub fn puzzle_key(owner: Uuid, slug: &str) -> String {
    format!("{owner}:{slug}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub code: String,
    /// Copy of `code` kept only while the game is not abandoned; carries the
    /// sparse unique index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_code: Option<String>,
    pub status: GameStatus,
    pub created_at: DateTime,
    pub started_at: Option<DateTime>,
    pub ends_at: Option<DateTime>,
    pub current_puzzle_index: u32,
    pub hints_left: u32,
    pub seed: u32,
    #[serde(default)]
    pub player_count: u32,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        let active_code = (value.status != GameStatus::Abandoned).then(|| value.code.clone());
        Self {
            id: value.id.to_string(),
            code: value.code,
            active_code,
            status: value.status,
            created_at: DateTime::from_system_time(value.created_at),
            started_at: value.started_at.map(DateTime::from_system_time),
            ends_at: value.ends_at.map(DateTime::from_system_time),
            current_puzzle_index: value.current_puzzle_index,
            hints_left: value.hints_left,
            seed: value.seed,
            player_count: value.player_count,
        }
    }
}

impl TryFrom<MongoGameDocument> for GameEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoGameDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(GAME_COLLECTION, &value.id)?,
            code: value.code,
            status: value.status,
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            ends_at: value.ends_at.map(DateTime::to_system_time),
            current_puzzle_index: value.current_puzzle_index,
            hints_left: value.hints_left,
            seed: value.seed,
            player_count: value.player_count,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub game_id: String,
    pub nickname: String,
    pub role: String,
    pub joined_at: DateTime,
    pub is_connected: bool,
    #[serde(default)]
    pub score_total: i64,
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_id: value.game_id.to_string(),
            nickname: value.nickname,
            role: value.role,
            joined_at: DateTime::from_system_time(value.joined_at),
            is_connected: value.is_connected,
            score_total: value.score_total,
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPlayerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(PLAYER_COLLECTION, &value.id)?,
            game_id: parse_id(PLAYER_COLLECTION, &value.game_id)?,
            nickname: value.nickname,
            role: value.role,
            joined_at: value.joined_at.to_system_time(),
            is_connected: value.is_connected,
            score_total: value.score_total,
        })
    }
}

/// Runtime state keyed by the game id. The puzzle state blob is stored as its
/// JSON text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRuntimeDocument {
    #[serde(rename = "_id")]
    pub game_id: String,
    pub current_puzzle_slug: String,
    pub attempts: u32,
    pub solved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puzzle_state: Option<String>,
}

impl TryFrom<RuntimeStateEntity> for MongoRuntimeDocument {
    type Error = MongoDaoError;

    fn try_from(value: RuntimeStateEntity) -> MongoResult<Self> {
        let puzzle_state = value
            .puzzle_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| MongoDaoError::Encode {
                collection: RUNTIME_COLLECTION,
                source,
            })?;
        Ok(Self {
            game_id: value.game_id.to_string(),
            current_puzzle_slug: value.current_puzzle_slug,
            attempts: value.attempts,
            solved: value.solved,
            puzzle_state,
        })
    }
}

impl TryFrom<MongoRuntimeDocument> for RuntimeStateEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRuntimeDocument) -> MongoResult<Self> {
        let puzzle_state = value
            .puzzle_state
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| MongoDaoError::Decode {
                collection: RUNTIME_COLLECTION,
                message: format!("invalid puzzle state: {err}"),
            })?;
        Ok(Self {
            game_id: parse_id(RUNTIME_COLLECTION, &value.game_id)?,
            current_puzzle_slug: value.current_puzzle_slug,
            attempts: value.attempts,
            solved: value.solved,
            puzzle_state,
        })
    }
}

/// Per-player progress keyed by `{player_id}:{slug}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoProgressDocument {
    #[serde(rename = "_id")]
    pub key: String,
    pub player_id: String,
    pub game_id: String,
    pub puzzle_slug: String,
    pub attempts: u32,
    pub solved: bool,
    pub score_awarded: i64,
    pub updated_at: DateTime,
}

impl TryFrom<MongoProgressDocument> for PlayerPuzzleProgressEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoProgressDocument) -> MongoResult<Self> {
        Ok(Self {
            player_id: parse_id(PROGRESS_COLLECTION, &value.player_id)?,
            game_id: parse_id(PROGRESS_COLLECTION, &value.game_id)?,
            puzzle_slug: value.puzzle_slug,
            attempts: value.attempts,
            solved: value.solved,
            score_awarded: value.score_awarded,
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

/// Completion ledger entry keyed by `{game_id}:{slug}`; the primary key makes
/// the claim insert-or-fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCompletionDocument {
    #[serde(rename = "_id")]
    pub key: String,
    pub game_id: String,
    pub puzzle_slug: String,
    pub completed_by: String,
    pub completed_at: DateTime,
}

impl From<PuzzleCompletionEntity> for MongoCompletionDocument {
    fn from(value: PuzzleCompletionEntity) -> Self {
        Self {
            key: puzzle_key(value.game_id, &value.puzzle_slug),
            game_id: value.game_id.to_string(),
            puzzle_slug: value.puzzle_slug,
            completed_by: value.completed_by.to_string(),
            completed_at: DateTime::from_system_time(value.completed_at),
        }
    }
}

impl TryFrom<MongoCompletionDocument> for PuzzleCompletionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoCompletionDocument) -> MongoResult<Self> {
        Ok(Self {
            game_id: parse_id(COMPLETION_COLLECTION, &value.game_id)?,
            puzzle_slug: value.puzzle_slug,
            completed_by: parse_id(COMPLETION_COLLECTION, &value.completed_by)?,
            completed_at: value.completed_at.to_system_time(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandoned_games_do_not_hold_their_code() {
        let mut game = GameEntity::new("ABC123".into(), 7, 3);
        let document = MongoGameDocument::from(game.clone());
        assert_eq!(document.active_code.as_deref(), Some("ABC123"));

        game.status = GameStatus::Abandoned;
        let document = MongoGameDocument::from(game);
        assert!(document.active_code.is_none());
    }

    #[test]
    fn corrupted_ids_are_reported_with_their_collection() {
        let document = MongoCompletionDocument {
            key: "x:p1".into(),
            game_id: "not-a-uuid".into(),
            puzzle_slug: "p1".into(),
            completed_by: Uuid::new_v4().to_string(),
            completed_at: DateTime::now(),
        };
        let err = PuzzleCompletionEntity::try_from(document).unwrap_err();
        assert!(matches!(
            err,
            MongoDaoError::Decode {
                collection: COMPLETION_COLLECTION,
                ..
            }
        ));
    }

    #[test]
    fn puzzle_state_survives_json_text_storage() {
        let mut state = RuntimeStateEntity::starting_at(Uuid::new_v4(), "p1");
        state.puzzle_state = Some(serde_json::json!({"rotation": 90}));
        let document = MongoRuntimeDocument::try_from(state.clone()).unwrap();
        assert_eq!(RuntimeStateEntity::try_from(document).unwrap(), state);
    }
}
