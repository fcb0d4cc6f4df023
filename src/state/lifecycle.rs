use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle status of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// Players are gathering; puzzles are not playable yet.
    Waiting,
    /// The timed session is in progress.
    Running,
    /// Every puzzle was solved or the session expired.
    Finished,
    /// The game was given up before finishing.
    Abandoned,
}

/// Indicates why a running game moved to [`GameStatus::Finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The last outstanding puzzle received its completion.
    PuzzlesCompleted,
    /// The session reached its `endsAt` deadline.
    Expired,
}

/// Events that can be applied to a game status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// A player starts the session.
    Start,
    /// The session is over.
    Finish(FinishReason),
    /// The session is given up.
    Abandon,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The status the game was in when the invalid event was received.
    pub from: GameStatus,
    /// The event that cannot be applied from this status.
    pub event: GameEvent,
}

impl GameStatus {
    /// Whether players may still join the game.
    pub fn is_open(self) -> bool {
        matches!(self, GameStatus::Waiting | GameStatus::Running)
    }

    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Running => "running",
            GameStatus::Finished => "finished",
            GameStatus::Abandoned => "abandoned",
        }
    }

    /// Compute the status reached by applying `event`.
    ///
    /// Only `waiting -> running -> finished` and `-> abandoned` from a
    /// non-finished status are accepted, so a game never goes backwards.
    pub fn apply(self, event: GameEvent) -> Result<GameStatus, InvalidTransition> {
        let next = match (self, event) {
            (GameStatus::Waiting, GameEvent::Start) => GameStatus::Running,
            (GameStatus::Running, GameEvent::Finish(_)) => GameStatus::Finished,
            (GameStatus::Waiting | GameStatus::Running, GameEvent::Abandon) => {
                GameStatus::Abandoned
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
