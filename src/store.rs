//! Record store module.
//!
//! The workflow only sees the [`RecordStore`] trait: a query string in the
//! store's native language goes in, JSON rows come out. Two backends are
//! provided, SQLite (SQL) and Neo4j over its HTTP endpoint (Cypher).

mod neo4j;
mod sqlite;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::functions::{EmbeddingVariant, FunctionEntry};

pub use neo4j::Neo4jHttpStore;
pub use sqlite::SqliteRecordStore;

/// Errors that can occur when talking to the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network-related errors (connection refused, DNS, timeouts)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// HTTP errors with status code
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// The store rejected the query
    #[error("{code}: {message}")]
    Query { code: String, message: String },

    /// The embedding index (or the column backing it) does not exist
    #[error("No such vector index: {0}")]
    IndexNotFound(String),

    /// SQLite driver errors
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl StoreError {
    /// Query code used for statements that do not parse.
    pub const SYNTAX_ERROR: &'static str = "SyntaxError";
    /// Query code used for references to unknown labels or tables.
    pub const UNKNOWN_LABEL: &'static str = "UnknownLabel";

    pub fn is_syntax_error(&self) -> bool {
        match self {
            Self::Query { code, message } => {
                code.contains(Self::SYNTAX_ERROR) || message.contains(Self::SYNTAX_ERROR)
            }
            _ => false,
        }
    }

    pub fn is_unknown_label(&self) -> bool {
        match self {
            Self::Query { code, message } => {
                code.contains(Self::UNKNOWN_LABEL)
                    || (message.contains("Unknown") && message.to_lowercase().contains("label"))
            }
            _ => false,
        }
    }
}

/// Native query language of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryDialect {
    Cypher,
    Sql,
}

impl std::fmt::Display for QueryDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cypher => write!(f, "Cypher"),
            Self::Sql => write!(f, "SQLite SQL"),
        }
    }
}

/// Trait for record store operations.
///
/// Implementations must be safe to share between concurrent runs.
pub trait RecordStore: Send + Sync {
    /// Runs `query` and returns the result rows as JSON objects.
    fn execute(&self, query: &str) -> Result<Vec<Value>, StoreError>;

    /// Finds catalog functions closest to `embedding`, best first.
    ///
    /// # Errors
    ///
    /// `StoreError::IndexNotFound` when the embeddings for `variant` are not
    /// available.
    fn similarity_search(
        &self,
        embedding: &[f32],
        variant: EmbeddingVariant,
        top_k: usize,
    ) -> Result<Vec<FunctionEntry>, StoreError>;

    /// Looks up catalog entries by code. Unknown codes are left out.
    fn lookup_functions(&self, codes: &[i64]) -> Result<Vec<FunctionEntry>, StoreError>;

    /// Checks that the store answers a trivial query.
    fn verify_connection(&self) -> Result<(), StoreError>;

    /// Short human-readable location, for logs and the doctor report.
    fn describe(&self) -> String;

    /// Language the oracle must write queries in.
    fn dialect(&self) -> QueryDialect {
        QueryDialect::Cypher
    }
}

/// Reads a catalog entry from a `code`/`name`/`description`/`score` row.
///
/// Codes stored as text are accepted as long as they are numeric.
pub(crate) fn entry_from_row(row: &Map<String, Value>) -> Option<FunctionEntry> {
    let code = match row.get("code")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let text = |key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Some(FunctionEntry {
        code,
        name: text("name"),
        description: text("description"),
        similarity_score: row.get("score").and_then(Value::as_f64),
    })
}

/// Keeps catalog entries in the order of `codes`.
pub(crate) fn order_by_codes(codes: &[i64], mut entries: Vec<FunctionEntry>) -> Vec<FunctionEntry> {
    entries.sort_by_key(|e| codes.iter().position(|c| *c == e.code).unwrap_or(usize::MAX));
    entries
}
