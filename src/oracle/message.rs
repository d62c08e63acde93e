//! Role-tagged messages and JSON reply handling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::client::{OracleClientTrait, OracleError};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the message sequence sent to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Shape the caller expects back from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Free text.
    Text,
    /// A single JSON object.
    Json,
}

/// Sends `messages` and parses the reply as a JSON object.
///
/// Missing keys are the caller's business: every call site reads the object
/// with its own documented defaults.
///
/// # Errors
///
/// Returns the client's error, or `OracleError::Api` when the reply holds no
/// JSON object.
pub fn chat_json(
    client: &dyn OracleClientTrait,
    model: &str,
    messages: &[ChatMessage],
) -> Result<Map<String, Value>, OracleError> {
    let response = client.chat(model, messages, ResponseFormat::Json)?;

    let json_str = extract_json(&response).ok_or_else(|| OracleError::Api {
        message: "Failed to extract JSON from oracle response".to_string(),
    })?;

    match serde_json::from_str::<Value>(&json_str).map_err(OracleError::Serialization)? {
        Value::Object(map) => Ok(map),
        _ => Err(OracleError::Api {
            message: "Expected JSON object".to_string(),
        }),
    }
}

/// Extracts JSON from a model response, handling various output formats.
///
/// Handles:
/// - Clean JSON response (no wrapping)
/// - Markdown code block wrapping (```json ... ```)
/// - Explanatory text before/after JSON
pub fn extract_json(response: &str) -> Option<String> {
    let trimmed = response.trim();

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;

    if start <= end {
        Some(trimmed[start..=end].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOracle(&'static str);

    impl OracleClientTrait for FixedOracle {
        fn chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _format: ResponseFormat,
        ) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("be terse")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "be terse");
    }

    #[test]
    fn extract_json_handles_markdown() {
        let response = "Sure:\n```json\n{\"mode\": \"radius\", \"value\": 300}\n```\nDone.";
        let json = extract_json(response).unwrap();
        assert_eq!(json, "{\"mode\": \"radius\", \"value\": 300}");
    }

    #[test]
    fn extract_json_returns_none_without_braces() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("} backwards {").is_none());
    }

    #[test]
    fn chat_json_parses_object() {
        let oracle = FixedOracle(r#"{"attributes": ["floors_above"], "needs_building_function": true}"#);
        let map = chat_json(&oracle, "m", &[ChatMessage::user("q")]).unwrap();
        assert_eq!(map["needs_building_function"], Value::Bool(true));
    }

    #[test]
    fn chat_json_rejects_non_json_reply() {
        let oracle = FixedOracle("I cannot answer that.");
        let result = chat_json(&oracle, "m", &[ChatMessage::user("q")]);
        assert!(matches!(result, Err(OracleError::Api { .. })));
    }

    #[test]
    fn chat_json_reports_malformed_json() {
        let oracle = FixedOracle("{mode: nearest}");
        let result = chat_json(&oracle, "m", &[ChatMessage::user("q")]);
        assert!(matches!(result, Err(OracleError::Serialization(_))));
    }
}
