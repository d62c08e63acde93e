//! Decision oracle client module.
//!
//! This module provides the oracle trait the workflow talks to, an Ollama-backed
//! HTTP implementation with retry logic and timeouts, and helpers for
//! pulling structured JSON out of free-form replies.

mod client;
mod message;

pub use client::{OllamaClient, OllamaClientBuilder, OracleClientTrait, OracleError, retry_with_backoff};
pub use message::{ChatMessage, ResponseFormat, Role, chat_json, extract_json};
