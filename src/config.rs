//! Runtime settings shared read-only by every run.

use std::path::PathBuf;

use anyhow::Result;

use crate::functions::SelectionPolicy;

/// Default chat model; empty means "let the oracle pick".
const DEFAULT_CHAT_MODEL: &str = "";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Settings for one process, constructed once at startup and handed to the
/// [`crate::Workflow`].
///
/// Distances (`radius_default`, the `_distance` attached to records) are in
/// the native unit of the store's coordinate reference system. Filter
/// geometries must be supplied in that same CRS; nothing here converts.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Model used for chat completions.
    pub chat_model: String,
    /// Model used for embeddings; also decides the embedding size variant.
    pub embedding_model: String,
    /// How similarity hits are cut down to the final function list.
    pub function_policy: SelectionPolicy,
    /// Neighbours requested from the similarity search before the policy runs.
    pub function_candidates: usize,
    /// K used when the oracle cannot tell how many nearest records are wanted.
    pub nearest_default: usize,
    /// Radius used when the oracle cannot tell the search radius.
    pub radius_default: f64,
    /// Maximum number of records shown to the oracle when rendering the answer.
    pub answer_record_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            function_policy: SelectionPolicy::default(),
            function_candidates: 10,
            nearest_default: 10,
            radius_default: 500.0,
            answer_record_limit: 20,
        }
    }
}

impl Settings {
    /// Creates settings from environment variables, using defaults when unset.
    ///
    /// # Environment Variables
    ///
    /// - `OLLAMA_MODEL` (default empty): chat model
    /// - `OLLAMA_EMBEDDING_MODEL` (default `nomic-embed-text`)
    /// - `AXP_FUNCTION_POLICY` (default `top_k:5`): `top_k:<n>`, `threshold:<t>` or `relative:<delta>`
    /// - `AXP_FUNCTION_CANDIDATES` (usize, default 10)
    /// - `AXP_NEAREST_DEFAULT` (usize, default 10)
    /// - `AXP_RADIUS_DEFAULT` (f64, default 500)
    /// - `AXP_ANSWER_RECORD_LIMIT` (usize, default 20)
    ///
    /// Unparsable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let chat_model = std::env::var("OLLAMA_MODEL").unwrap_or(defaults.chat_model);

        let embedding_model = std::env::var("OLLAMA_EMBEDDING_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(defaults.embedding_model);

        let function_policy = std::env::var("AXP_FUNCTION_POLICY")
            .ok()
            .and_then(|s| SelectionPolicy::parse(&s))
            .unwrap_or(defaults.function_policy);

        Self {
            chat_model,
            embedding_model,
            function_policy,
            function_candidates: env_or("AXP_FUNCTION_CANDIDATES", defaults.function_candidates),
            nearest_default: env_or("AXP_NEAREST_DEFAULT", defaults.nearest_default),
            radius_default: env_or("AXP_RADIUS_DEFAULT", defaults.radius_default),
            answer_record_limit: env_or("AXP_ANSWER_RECORD_LIMIT", defaults.answer_record_limit),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Where the record store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Neo4j HTTP endpoint with credentials.
    Neo4j {
        uri: String,
        username: String,
        password: String,
        database: String,
    },
    /// SQLite database file.
    Sqlite(PathBuf),
}

impl StoreLocation {
    /// Reads the store location from `AXP_STORE` and the `NEO4J_*` variables.
    ///
    /// An `http://` or `https://` value selects Neo4j; anything else is a
    /// SQLite path. Without `AXP_STORE` the SQLite file defaults to
    /// `{data_dir}/axploration/buildings.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn from_env() -> Result<Self> {
        match std::env::var("AXP_STORE") {
            Ok(value) if !value.trim().is_empty() => Ok(Self::parse(value.trim())),
            _ => Ok(Self::Sqlite(default_database_path()?)),
        }
    }

    fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            Self::Neo4j {
                uri: value.to_string(),
                username: std::env::var("NEO4J_USERNAME").unwrap_or_else(|_| "neo4j".to_string()),
                password: std::env::var("NEO4J_PASSWORD").unwrap_or_default(),
                database: std::env::var("NEO4J_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),
            }
        } else {
            Self::Sqlite(PathBuf::from(value))
        }
    }
}

/// Gets the cross-platform default database path.
///
/// Returns `{data_dir}/axploration/buildings.db` where `data_dir` is:
/// - Linux: `~/.local/share`
/// - macOS: `~/Library/Application Support`
/// - Windows: `C:\Users\<user>\AppData\Roaming`
///
/// # Errors
///
/// Returns an error if the data directory cannot be determined.
pub fn default_database_path() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Failed to determine data directory"))?;

    Ok(data_dir.join("axploration").join("buildings.db"))
}
