//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for the generative text service
//! (Ollama, OpenAI-compatible endpoints). The planner, the plan critic, the
//! step evaluator, the reasoning worker and the synthesizer all talk to it
//! through the [`LLMProvider`] trait, and all of them interpret the returned
//! text with [`parse_structured_response`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LLMConfig;
use sdk::errors::EngineError;

pub mod ollama;
pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Text returned by a provider together with the tokens it cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    pub tokens_used: u64,
}

impl Generation {
    pub fn new(content: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            content: content.into(),
            tokens_used,
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Generate a completion for the conversation.
    ///
    /// # Returns
    /// * `Ok(Generation)` - raw text plus reported (or estimated) token usage
    /// * `Err(LLMError)` - if the request fails
    async fn generate(&self, messages: &[Message]) -> Result<Generation>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Build the provider named by `llm.default_provider`.
pub fn provider_from_config(
    config: &LLMConfig,
) -> std::result::Result<Arc<dyn LLMProvider>, EngineError> {
    match config.default_provider.as_str() {
        "ollama" => Ok(Arc::new(ollama::OllamaProvider::new(
            config.ollama.base_url.clone(),
            config.ollama.model.clone(),
        ))),
        "openai" => Ok(Arc::new(openai::OpenAIProvider::new(config.openai.clone()))),
        other => Err(EngineError::Config(format!(
            "Unknown LLM provider '{}'",
            other
        ))),
    }
}

/// Run one generation bounded by `limit`. Expiry maps to [`LLMError::Timeout`].
pub async fn generate_with_timeout(
    provider: &dyn LLMProvider,
    messages: &[Message],
    limit: Duration,
) -> Result<Generation> {
    tokio::time::timeout(limit, provider.generate(messages))
        .await
        .map_err(|_| LLMError::Timeout)?
}

/// Rough token estimate used when a provider reports no usage: 4 chars per token.
pub fn estimate_tokens(messages: &[Message], completion: &str) -> u64 {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum::<usize>() + completion.len();
    (chars / 4) as u64
}

/// Parse free-form generative output into JSON.
///
/// Handles the formats providers actually produce:
/// 1. Raw JSON (the entire content parses)
/// 2. Fenced JSON, with or without prose around the fence
/// 3. JSON embedded in prose: the first balanced array or object
pub fn parse_structured_response(content: &str) -> Result<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Ok(value);
        }
    }

    let first_open = trimmed.find(['[', '{']);
    if let Some(pos) = first_open {
        if let Some(json_str) = extract_balanced_json(&trimmed[pos..]) {
            if let Ok(value) = serde_json::from_str::<Value>(json_str) {
                return Ok(value);
            }
        }
    }

    Err(LLMError::ParseError(format!(
        "no JSON found in response ({} chars)",
        trimmed.len()
    )))
}

/// Accept either a bare array or an object wrapping one under any of `keys`.
pub fn unwrap_list(value: Value, keys: &[&str]) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in keys {
                if let Some(Value::Array(items)) = map.remove(*key) {
                    return Ok(items);
                }
            }
            // A single wrapper key holding an array, whatever its name
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => Ok(items),
                _ => Err(LLMError::ParseError(
                    "expected a list or an object wrapping one".to_string(),
                )),
            }
        }
        _ => Err(LLMError::ParseError(
            "expected a list or an object wrapping one".to_string(),
        )),
    }
}

/// Accept an object, unwrapping a single-element array if that is what came back.
pub fn unwrap_object(value: Value) -> Result<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(mut items) if items.len() == 1 => match items.remove(0) {
            Value::Object(map) => Ok(map),
            _ => Err(LLMError::ParseError("expected an object".to_string())),
        },
        _ => Err(LLMError::ParseError("expected an object".to_string())),
    }
}

/// Accept an object carrying every `required` key.
///
/// Single-key wrappers such as `{"verdict": {...}}` are unwrapped first. An
/// object that never shows the required keys is a parse error, so callers
/// treat a reply in the wrong shape the same as an unreadable one.
pub fn unwrap_record(value: Value, required: &[&str]) -> Result<serde_json::Map<String, Value>> {
    let mut map = unwrap_object(value)?;
    for _ in 0..MAX_WRAPPER_DEPTH {
        if required.iter().all(|key| map.contains_key(*key)) {
            return Ok(map);
        }
        if map.len() != 1 {
            break;
        }
        match map.into_iter().next().map(|(_, inner)| unwrap_object(inner)) {
            Some(Ok(inner)) => map = inner,
            _ => return Err(missing_keys(required)),
        }
    }

    if required.iter().all(|key| map.contains_key(*key)) {
        Ok(map)
    } else {
        Err(missing_keys(required))
    }
}

const MAX_WRAPPER_DEPTH: usize = 3;

fn missing_keys(required: &[&str]) -> LLMError {
    LLMError::ParseError(format!(
        "expected an object with fields: {}",
        required.join(", ")
    ))
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON array or object starting at position 0 of `s`.
///
/// Tracks `[`/`{` depth, respecting string literals, to find the matching
/// close bracket.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') && !s.starts_with('[') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
