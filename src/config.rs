//! Application-level configuration loading: puzzle table, scoring and session limits.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MANOIR_BACK_CONFIG_PATH";

const DEFAULT_PUZZLE_POINTS: i64 = 400;
const DEFAULT_MAX_PLAYERS: u32 = 4;
const DEFAULT_SESSION_MINUTES: u64 = 45;
const DEFAULT_HINTS_BUDGET: u32 = 3;
const DEFAULT_CODE_LENGTH: usize = 6;
const DEFAULT_CODE_ATTEMPTS: u32 = 8;
const DEFAULT_STALE_WAITING_MINUTES: u64 = 120;
const DEFAULT_FINISHED_RETENTION_MINUTES: u64 = 24 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Reference of the built-in dynamic solution for the poem puzzle.
const POEM_SOLUTION_REF: &str = "poem";

/// Normalize free-text answers the same way for configured and submitted values.
pub fn normalize_answer(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Accepted answers for one puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuzzleDefinition {
    answers: Vec<String>,
    dynamic_answer: Option<String>,
}

impl PuzzleDefinition {
    /// Build a definition; answers are normalized on the way in.
    pub fn new<I, S>(answers: I, dynamic_answer: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            answers: answers
                .into_iter()
                .map(|answer| normalize_answer(answer.as_ref()))
                .collect(),
            dynamic_answer,
        }
    }

    /// Whether `normalized` is one of the static answers.
    pub fn accepts(&self, normalized: &str) -> bool {
        self.answers.iter().any(|answer| answer == normalized)
    }

    /// Reference to look up in the answer source, if any.
    pub fn dynamic_answer(&self) -> Option<&str> {
        self.dynamic_answer.as_deref()
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    puzzles: IndexMap<String, PuzzleDefinition>,
    solutions: HashMap<String, String>,
    /// Points credited to the first solver of a puzzle.
    pub puzzle_points: i64,
    /// Player capacity of a game.
    pub max_players: u32,
    /// Length of a timed session.
    pub session_duration: Duration,
    /// Hints granted to a new game.
    pub hints_budget: u32,
    /// Number of characters in a join code.
    pub code_length: usize,
    /// Join code generations tried before giving up.
    pub code_attempts: u32,
    /// Age after which a waiting game is abandoned and purged.
    pub stale_waiting_after: Duration,
    /// Time a finished game is kept, counted from its deadline, before purge.
    pub finished_retention: Duration,
    /// Period of the expiry sweeper.
    pub sweep_interval: Duration,
    /// Whether running games past `endsAt` are finished by the sweeper.
    pub expire_running_games: bool,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the built-in puzzle table.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        puzzles = app_config.puzzles.len(),
                        "loaded puzzle table from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document; absent keys keep their default value.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Ordered puzzle slugs.
    pub fn puzzle_slugs(&self) -> impl Iterator<Item = &str> {
        self.puzzles.keys().map(String::as_str)
    }

    /// Number of configured puzzles.
    pub fn puzzle_count(&self) -> usize {
        self.puzzles.len()
    }

    /// Definition of the puzzle identified by `slug`.
    pub fn puzzle(&self, slug: &str) -> Option<&PuzzleDefinition> {
        self.puzzles.get(slug)
    }

    /// First puzzle of the session.
    pub fn first_puzzle(&self) -> Option<&str> {
        self.puzzle_slugs().next()
    }

    /// First configured puzzle not contained in `completed`.
    pub fn next_open_puzzle<S: AsRef<str>>(&self, completed: &[S]) -> Option<&str> {
        self.puzzle_slugs()
            .find(|slug| !completed.iter().any(|done| done.as_ref() == *slug))
    }

    /// Whether every configured puzzle appears in `completed`.
    pub fn all_completed<S: AsRef<str>>(&self, completed: &[S]) -> bool {
        self.next_open_puzzle(completed).is_none()
    }

    /// Dynamic solutions keyed by reference.
    pub fn solutions(&self) -> &HashMap<String, String> {
        &self.solutions
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    puzzles: Option<IndexMap<String, RawPuzzle>>,
    solutions: Option<HashMap<String, String>>,
    puzzle_points: Option<i64>,
    max_players: Option<u32>,
    session_minutes: Option<u64>,
    hints_budget: Option<u32>,
    code_length: Option<usize>,
    code_attempts: Option<u32>,
    stale_waiting_minutes: Option<u64>,
    finished_retention_minutes: Option<u64>,
    sweep_interval_secs: Option<u64>,
    expire_running_games: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of a single puzzle entry inside the configuration file.
struct RawPuzzle {
    #[serde(default)]
    answers: Vec<String>,
    dynamic_answer: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let puzzles = value
            .puzzles
            .map(|puzzles| {
                puzzles
                    .into_iter()
                    .map(|(slug, raw)| (slug, PuzzleDefinition::new(raw.answers, raw.dynamic_answer)))
                    .collect()
            })
            .unwrap_or_else(default_puzzles);
        let solutions = value.solutions.unwrap_or_else(default_solutions);

        Self {
            puzzles,
            solutions,
            puzzle_points: value.puzzle_points.unwrap_or(DEFAULT_PUZZLE_POINTS),
            max_players: value.max_players.unwrap_or(DEFAULT_MAX_PLAYERS).max(1),
            session_duration: minutes(value.session_minutes.unwrap_or(DEFAULT_SESSION_MINUTES)),
            hints_budget: value.hints_budget.unwrap_or(DEFAULT_HINTS_BUDGET),
            code_length: value.code_length.unwrap_or(DEFAULT_CODE_LENGTH).clamp(4, 16),
            code_attempts: value.code_attempts.unwrap_or(DEFAULT_CODE_ATTEMPTS).max(1),
            stale_waiting_after: minutes(
                value
                    .stale_waiting_minutes
                    .unwrap_or(DEFAULT_STALE_WAITING_MINUTES),
            ),
            finished_retention: minutes(
                value
                    .finished_retention_minutes
                    .unwrap_or(DEFAULT_FINISHED_RETENTION_MINUTES),
            ),
            sweep_interval: Duration::from_secs(
                value
                    .sweep_interval_secs
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                    .max(1),
            ),
            expire_running_games: value.expire_running_games.unwrap_or(true),
        }
    }
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in puzzle table shipped with the binary.
fn default_puzzles() -> IndexMap<String, PuzzleDefinition> {
    IndexMap::from([
        (
            "puzzle-nantes-1".to_owned(),
            PuzzleDefinition::new(["reconstruit", "ok"], None),
        ),
        (
            "lumiere-nantes-2".to_owned(),
            PuzzleDefinition::new(["lumiere", "clair-obscur"], None),
        ),
        (
            "son-elephant-3".to_owned(),
            PuzzleDefinition::new(["elephant", "grand-elephant"], None),
        ),
        (
            "timeline-nantes-4".to_owned(),
            PuzzleDefinition::new(["1860 1894 1900 1955 2007"], None),
        ),
        (
            "poetique-nantes-5".to_owned(),
            PuzzleDefinition::new(
                ["memoire de nantes", "anneaux de burel"],
                Some(POEM_SOLUTION_REF.to_owned()),
            ),
        ),
    ])
}

fn default_solutions() -> HashMap<String, String> {
    HashMap::from([(POEM_SOLUTION_REF.to_owned(), "musée oublié".to_owned())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ship_the_five_puzzles_in_order() {
        let config = AppConfig::default();
        let slugs: Vec<&str> = config.puzzle_slugs().collect();
        assert_eq!(
            slugs,
            [
                "puzzle-nantes-1",
                "lumiere-nantes-2",
                "son-elephant-3",
                "timeline-nantes-4",
                "poetique-nantes-5"
            ]
        );
        assert_eq!(config.puzzle_points, 400);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.session_duration, Duration::from_secs(45 * 60));
        assert_eq!(config.finished_retention, Duration::from_secs(24 * 60 * 60));
        assert_eq!(
            config.puzzle("poetique-nantes-5").and_then(PuzzleDefinition::dynamic_answer),
            Some("poem")
        );
    }

    #[test]
    fn partial_documents_keep_remaining_defaults() {
        let config = AppConfig::from_json(
            r#"{"puzzles": {"b": {"answers": [" Yes "]}, "a": {"answers": ["no"]}}, "maxPlayers": 2}"#,
        )
        .unwrap();
        assert_eq!(config.puzzle_slugs().collect::<Vec<_>>(), ["b", "a"]);
        assert!(config.puzzle("b").unwrap().accepts("yes"));
        assert_eq!(config.max_players, 2);
        assert_eq!(config.puzzle_points, 400);
        assert_eq!(config.code_length, 6);
    }

    #[test]
    fn next_open_puzzle_skips_completed_ones() {
        let config = AppConfig::default();
        assert_eq!(config.next_open_puzzle::<&str>(&[]), Some("puzzle-nantes-1"));
        assert_eq!(
            config.next_open_puzzle(&["puzzle-nantes-1", "son-elephant-3"]),
            Some("lumiere-nantes-2")
        );
        let all: Vec<&str> = config.puzzle_slugs().collect();
        assert!(config.all_completed(&all));
        assert!(!config.all_completed(&all[..4]));
    }

    #[test]
    fn answers_are_normalized() {
        assert_eq!(normalize_answer("  Clair-Obscur \n"), "clair-obscur");
        let definition = PuzzleDefinition::new(["Mémoire de Nantes"], None);
        assert!(definition.accepts("mémoire de nantes"));
    }

    #[test]
    fn huge_durations_saturate() {
        let config = AppConfig::from_json(r#"{"finishedRetentionMinutes": 18446744073709551615}"#)
            .unwrap();
        assert_eq!(config.finished_retention, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn invalid_documents_are_rejected() {
        assert!(AppConfig::from_json("{\"puzzlePoints\": \"many\"}").is_err());
    }
}
