//! SQLite-backed record store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row, params_from_iter};
use serde_json::{Map, Number, Value};

use super::{QueryDialect, RecordStore, StoreError, entry_from_row, order_by_codes};
use crate::functions::{EmbeddingVariant, FunctionEntry};

/// Record store over a single SQLite connection.
///
/// The connection sits behind a mutex so one store can serve concurrent
/// runs. The store never creates tables: the building data and the
/// `functions` catalog are provisioned by the import tooling.
///
/// TEXT cells holding a JSON array or object are decoded, so an aggregate
/// such as `json_group_array(json_object(...)) AS buildings` comes back in the
/// wrapped shape.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteRecordStore {
    /// Opens an existing database file.
    ///
    /// # Errors
    ///
    /// Fails if the file does not exist or cannot be opened read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Wraps an already open connection, e.g. an in-memory fixture.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            path: None,
        }
    }

    /// Returns the locked connection.
    ///
    /// Useful for seeding fixtures in tests.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_rows(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Map<String, Value>>, StoreError> {
        let conn = self.connection();
        let mut stmt = conn.prepare(sql).map_err(classify)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt
            .query_map(params, |row| row_to_object(row, &columns))
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        Ok(rows)
    }
}

impl RecordStore for SqliteRecordStore {
    fn execute(&self, query: &str) -> Result<Vec<Value>, StoreError> {
        let rows = self.query_rows(query, [])?;
        Ok(rows.into_iter().map(Value::Object).collect())
    }

    fn similarity_search(
        &self,
        embedding: &[f32],
        variant: EmbeddingVariant,
        top_k: usize,
    ) -> Result<Vec<FunctionEntry>, StoreError> {
        let column = variant.column();
        let sql = format!(
            "SELECT code, name, description, {column} AS embedding FROM functions WHERE {column} IS NOT NULL"
        );

        let rows = self.query_rows(&sql, []).map_err(|e| match e {
            StoreError::Query { ref message, .. } | StoreError::Sqlite(rusqlite::Error::SqliteFailure(_, Some(ref message)))
                if message.contains("no such table") || message.contains("no such column") =>
            {
                StoreError::IndexNotFound(format!("functions.{}", column))
            }
            other => other,
        })?;

        let mut scored: Vec<FunctionEntry> = rows
            .iter()
            .filter_map(|row| {
                let candidate = embedding_of(row.get("embedding")?)?;
                let score = cosine_similarity(embedding, &candidate)?;
                let mut entry = entry_from_row(row)?;
                entry.similarity_score = Some(score);
                Some(entry)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity_score
                .unwrap_or(f64::MIN)
                .total_cmp(&a.similarity_score.unwrap_or(f64::MIN))
        });
        scored.truncate(top_k);

        Ok(scored)
    }

    fn lookup_functions(&self, codes: &[i64]) -> Result<Vec<FunctionEntry>, StoreError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; codes.len()].join(", ");
        let sql = format!(
            "SELECT code, name, description FROM functions WHERE code IN ({})",
            placeholders
        );
        let rows = self.query_rows(&sql, params_from_iter(codes.iter()))?;
        let entries = rows.iter().filter_map(entry_from_row).collect();

        Ok(order_by_codes(codes, entries))
    }

    fn verify_connection(&self) -> Result<(), StoreError> {
        self.connection()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite:{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }

    fn dialect(&self) -> QueryDialect {
        QueryDialect::Sql
    }
}

/// Maps driver errors to query errors the workflow can classify.
fn classify(error: rusqlite::Error) -> StoreError {
    let message = match &error {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
        _ => return StoreError::Sqlite(error),
    };

    if message.contains("syntax error") || message.contains("incomplete input") {
        StoreError::Query {
            code: StoreError::SYNTAX_ERROR.to_string(),
            message,
        }
    } else if message.contains("no such table") {
        StoreError::Query {
            code: StoreError::UNKNOWN_LABEL.to_string(),
            message,
        }
    } else {
        StoreError::Sqlite(error)
    }
}

fn row_to_object(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Map<String, Value>> {
    let mut object = Map::new();
    for (idx, name) in columns.iter().enumerate() {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            ValueRef::Text(bytes) => text_value(&String::from_utf8_lossy(bytes)),
            ValueRef::Blob(_) => Value::Null,
        };
        object.insert(name.clone(), value);
    }
    Ok(object)
}

/// Decodes JSON arrays and objects stored as text; other text stays a string.
fn text_value(text: &str) -> Value {
    let trimmed = text.trim_start();
    if (trimmed.starts_with('[') || trimmed.starts_with('{'))
        && let Ok(value) = serde_json::from_str::<Value>(text)
    {
        return value;
    }
    Value::String(text.to_string())
}

fn embedding_of(value: &Value) -> Option<Vec<f32>> {
    let values = match value {
        Value::Array(items) => items,
        _ => return None,
    };
    let embedding: Vec<f32> = values
        .iter()
        .filter_map(Value::as_f64)
        .map(|v| v as f32)
        .collect();
    (!embedding.is_empty() && embedding.len() == values.len()).then_some(embedding)
}

/// Cosine similarity, `None` for mismatched or zero-length vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (f64::from(*x), f64::from(*y));
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
