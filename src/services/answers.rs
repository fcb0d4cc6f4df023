//! Answer checking against the configured puzzle table and dynamic solutions.

use std::collections::HashMap;

use crate::config::{AppConfig, normalize_answer};

/// Lookup for puzzle solutions that live outside the static answer table.
pub trait AnswerSource: Send + Sync {
    /// Solution text stored under `reference`, if any.
    fn dynamic_solution(&self, reference: &str) -> Option<String>;
}

/// Answer source serving the `solutions` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredSolutions {
    solutions: HashMap<String, String>,
}

impl ConfiguredSolutions {
    /// Capture the dynamic solutions of `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            solutions: config.solutions().clone(),
        }
    }
}

impl AnswerSource for ConfiguredSolutions {
    fn dynamic_solution(&self, reference: &str) -> Option<String> {
        self.solutions.get(reference).cloned()
    }
}

/// Whether `attempt` solves `slug`. Unknown slugs never match.
pub fn is_correct_answer(
    config: &AppConfig,
    answers: &dyn AnswerSource,
    slug: &str,
    attempt: &str,
) -> bool {
    let Some(puzzle) = config.puzzle(slug) else {
        return false;
    };
    let attempt = normalize_answer(attempt);
    if attempt.is_empty() {
        return false;
    }
    if puzzle.accepts(&attempt) {
        return true;
    }

    puzzle
        .dynamic_answer()
        .and_then(|reference| answers.dynamic_solution(reference))
        .is_some_and(|solution| normalize_answer(&solution) == attempt)
}
