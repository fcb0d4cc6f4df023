use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::Validate;

/// Answer submitted for a puzzle.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub attempt: String,
}

/// Result of an answer submission.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerResponse {
    /// Whether the answer was correct.
    pub ok: bool,
    /// Whether the caller holds the credit for the puzzle.
    pub accepted: bool,
    /// Correct answer, but another player already holds the credit.
    pub already_solved_by_other: bool,
    pub points_awarded: i64,
    pub message: Option<String>,
}
