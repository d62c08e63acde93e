//! Neo4j record store over the HTTP transactional endpoint.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{RecordStore, StoreError, entry_from_row, order_by_codes};
use crate::functions::{EmbeddingVariant, FunctionEntry};

const SIMILARITY_QUERY: &str = "CALL db.index.vector.queryNodes($index_name, $top_k, $embedding) \
     YIELD node, score \
     RETURN node.code AS code, node.name AS name, node.description AS description, score \
     ORDER BY score DESC";

const LOOKUP_QUERY: &str = "MATCH (f:Functions) WHERE f.code IN $codes \
     RETURN f.code AS code, f.name AS name, f.description AS description";

/// Cypher record store speaking to `/db/{database}/tx/commit`.
///
/// The blocking `reqwest` client pools connections and can be shared by
/// concurrent runs.
pub struct Neo4jHttpStore {
    client: reqwest::blocking::Client,
    endpoint: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: String,
    message: String,
}

impl Neo4jHttpStore {
    /// Creates a store for `database` on the server at `uri`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidUrl` for an unparsable `uri`.
    pub fn new(
        uri: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        database: &str,
    ) -> Result<Self, StoreError> {
        reqwest::Url::parse(uri).map_err(|e| StoreError::InvalidUrl(format!("{}: {}", uri, e)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(StoreError::Network)?;

        Ok(Self {
            client,
            endpoint: commit_endpoint(uri, database),
            username: username.into(),
            password: password.into(),
        })
    }

    fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Map<String, Value>>, StoreError> {
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .map_err(StoreError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Http {
                status: status.as_u16(),
            });
        }

        let text = response.text().map_err(StoreError::Network)?;
        parse_commit_response(&text)
    }
}

fn commit_endpoint(uri: &str, database: &str) -> String {
    format!("{}/db/{}/tx/commit", uri.trim_end_matches('/'), database)
}

/// Turns a commit response into row objects, or the first server error.
fn parse_commit_response(text: &str) -> Result<Vec<Map<String, Value>>, StoreError> {
    let response: CommitResponse = serde_json::from_str(text)?;

    if let Some(error) = response.errors.into_iter().next() {
        let lowered = error.message.to_lowercase();
        if lowered.contains("no such vector") || lowered.contains("vector schema index") {
            return Err(StoreError::IndexNotFound(error.message));
        }
        return Err(StoreError::Query {
            code: error.code,
            message: error.message,
        });
    }

    Ok(response
        .results
        .into_iter()
        .flat_map(|result| {
            let columns = result.columns;
            result.data.into_iter().map(move |data| {
                columns
                    .iter()
                    .cloned()
                    .zip(data.row)
                    .collect::<Map<String, Value>>()
            })
        })
        .collect())
}

impl RecordStore for Neo4jHttpStore {
    fn execute(&self, query: &str) -> Result<Vec<Value>, StoreError> {
        let rows = self.run(query, json!({}))?;
        Ok(rows.into_iter().map(Value::Object).collect())
    }

    fn similarity_search(
        &self,
        embedding: &[f32],
        variant: EmbeddingVariant,
        top_k: usize,
    ) -> Result<Vec<FunctionEntry>, StoreError> {
        let rows = self.run(
            SIMILARITY_QUERY,
            json!({
                "index_name": variant.index_name(),
                "top_k": top_k,
                "embedding": embedding,
            }),
        )?;
        Ok(rows.iter().filter_map(entry_from_row).collect())
    }

    fn lookup_functions(&self, codes: &[i64]) -> Result<Vec<FunctionEntry>, StoreError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.run(LOOKUP_QUERY, json!({ "codes": codes }))?;
        let entries = rows.iter().filter_map(entry_from_row).collect();
        Ok(order_by_codes(codes, entries))
    }

    fn verify_connection(&self) -> Result<(), StoreError> {
        self.run("RETURN 1", json!({})).map(|_| ())
    }

    fn describe(&self) -> String {
        format!("neo4j:{}", self.endpoint)
    }
}
