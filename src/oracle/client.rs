//! Ollama HTTP client implementation of the decision oracle.
//!
//! This module provides `OllamaClient` for making synchronous HTTP requests to the Ollama API,
//! along with the oracle trait, error types and builder patterns for configuration.

use std::thread;
use std::time::Duration;

use thiserror::Error;

use super::message::{ChatMessage, ResponseFormat};

/// Errors that can occur when talking to the decision oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Network-related errors (connection failures, DNS resolution, etc.)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Request or response timeout errors
    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    /// HTTP errors with status code
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Oracle-specific errors (unexpected reply shape, refusal, ...)
    #[error("Oracle API error: {message}")]
    Api { message: String },

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The oracle does not offer the requested capability
    #[error("Unsupported oracle capability: {0}")]
    Unsupported(&'static str),
}

impl OracleError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else {
            Self::Network(error)
        }
    }
}

/// Trait for decision oracle operations.
///
/// This trait enables mocking in unit tests and keeps the workflow independent
/// of any particular model server.
pub trait OracleClientTrait: Send + Sync {
    /// Sends a role-tagged message sequence and returns the reply text.
    ///
    /// With [`ResponseFormat::Json`] the reply is expected to hold one JSON
    /// object; use [`super::chat_json`] to parse it.
    fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> Result<String, OracleError>;

    /// Embeds `text` with the given embedding model.
    ///
    /// The default implementation reports the capability as unsupported, which
    /// callers treat like any other oracle failure.
    fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>, OracleError> {
        Err(OracleError::Unsupported("embeddings"))
    }
}

/// Builder for constructing `OllamaClient` instances.
///
/// # Examples
///
/// ```
/// use axploration::oracle::OllamaClientBuilder;
///
/// let client = OllamaClientBuilder::new()
///     .base_url("http://localhost:11434")
///     .build()
///     .expect("Failed to create client");
/// ```
#[derive(Debug, Default)]
pub struct OllamaClientBuilder {
    base_url: Option<String>,
    model: Option<String>,
}

impl OllamaClientBuilder {
    /// Creates a new `OllamaClientBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL for the Ollama API.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the default chat model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builds the `OllamaClient` with the configured settings.
    ///
    /// # Environment Variables
    ///
    /// If `base_url()` was not called, this method will check the `OLLAMA_HOST`
    /// environment variable. If not set, it defaults to `http://localhost:11434`.
    ///
    /// If `model()` was not called, this method will check the `OLLAMA_MODEL`
    /// environment variable. If not set, it defaults to an empty string.
    ///
    /// # Errors
    ///
    /// Returns `OracleError::InvalidUrl` for an unparsable base URL.
    pub fn build(self) -> Result<OllamaClient, OracleError> {
        let base_url = if let Some(url) = self.base_url {
            url
        } else {
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost:11434".to_string())
        };

        let model = if let Some(m) = self.model {
            m
        } else {
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| String::new())
        };

        reqwest::Url::parse(&base_url)
            .map_err(|e| OracleError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(OracleError::Network)?;

        Ok(OllamaClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

/// Synchronous HTTP client for the Ollama API.
///
/// It should be constructed using `OllamaClientBuilder`. The underlying
/// `reqwest` client pools connections and is safe to share between runs.
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the default chat model configured for this client.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Lists available models from the Ollama API, sorted by size (largest first).
    pub fn list_models(&self) -> Result<Vec<String>, OracleError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(OracleError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(OracleError::Http {
                status: response.status().as_u16(),
            });
        }

        let json: serde_json::Value = response.json().map_err(OracleError::Network)?;

        let mut models: Vec<(String, u64)> = json
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|model| {
                        let name = model.get("name").and_then(|n| n.as_str())?;
                        let size = model.get("size").and_then(|s| s.as_u64()).unwrap_or(0);
                        Some((name.to_string(), size))
                    })
                    .collect()
            })
            .unwrap_or_default();

        models.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(models.into_iter().map(|(name, _)| name).collect())
    }

    /// Posts `body` to `endpoint` with retries and returns the JSON reply.
    fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, OracleError> {
        let url = format!("{}{}", self.base_url, endpoint);

        retry_with_backoff(|| {
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .map_err(OracleError::from_reqwest)?;

            let status = response.status();
            if !status.is_success() {
                // 4xx stops here, 5xx is retried by `should_retry`
                return Err(OracleError::Http {
                    status: status.as_u16(),
                });
            }

            response.json().map_err(OracleError::from_reqwest)
        })
    }
}

impl OracleClientTrait for OllamaClient {
    fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> Result<String, OracleError> {
        let model = if model.is_empty() { &self.model } else { model };
        let body = chat_request_body(model, messages, format);

        let json = self.post_json("/api/chat", &body)?;

        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| OracleError::Api {
                message: "Missing 'message.content' field in API response".to_string(),
            })
    }

    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, OracleError> {
        let body = serde_json::json!({
            "model": model,
            "prompt": text,
        });

        let json = self.post_json("/api/embeddings", &body)?;

        let values = json
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| OracleError::Api {
                message: "Missing 'embedding' field in API response".to_string(),
            })?;

        let embedding: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        if embedding.is_empty() {
            return Err(OracleError::Api {
                message: format!("Model '{}' returned an empty embedding", model),
            });
        }

        Ok(embedding)
    }
}

/// Builds the `/api/chat` request body.
fn chat_request_body(
    model: &str,
    messages: &[ChatMessage],
    format: ResponseFormat,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": false,
        "options": { "temperature": 0.0 },
    });
    if format == ResponseFormat::Json {
        body["format"] = serde_json::Value::String("json".to_string());
    }
    body
}

/// Retries an operation with exponential backoff.
///
/// This function will retry the operation up to 3 times with delays of 1s, 2s, and 4s.
/// It only retries on transient errors (HTTP 5xx, network errors and timeouts),
/// not on client errors (HTTP 4xx).
pub fn retry_with_backoff<F, T>(mut f: F) -> Result<T, OracleError>
where
    F: FnMut() -> Result<T, OracleError>,
{
    const MAX_RETRIES: usize = 3;
    const DELAYS: [u64; MAX_RETRIES] = [1, 2, 4]; // seconds

    let mut last_error = match f() {
        Ok(result) => return Ok(result),
        Err(e) => {
            if !should_retry(&e) {
                return Err(e);
            }
            e
        }
    };

    for &delay_secs in &DELAYS {
        tracing::debug!(error = %last_error, delay_secs, "retrying oracle request");
        thread::sleep(Duration::from_secs(delay_secs));

        match f() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }
                last_error = e;
            }
        }
    }

    Err(last_error)
}

/// Determines if an error should be retried.
///
/// Returns `true` for transient errors (HTTP 5xx, network errors, timeouts).
fn should_retry(error: &OracleError) -> bool {
    match error {
        OracleError::Network(_) => true,
        OracleError::Timeout(_) => true,
        OracleError::Http { status } => (500..600).contains(status),
        OracleError::Serialization(_) => false,
        OracleError::Api { .. } => false,
        OracleError::InvalidUrl(_) => false,
        OracleError::Unsupported(_) => false,
    }
}
