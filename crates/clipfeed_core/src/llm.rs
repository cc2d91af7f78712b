//! crates/clipfeed_core/src/llm.rs
//!
//! Request and response modeling for schema-constrained LLM calls, the error
//! taxonomy shared by every language-model adapter, and the retry policy for
//! transport failures.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::schema::{schema_for, schema_name, GenerationMode};

//=========================================================================================
// Configuration and Request Types
//=========================================================================================

/// Immutable configuration for every request sent to the language model.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
}

/// One prompt-generation call: user prompt, optional system prompt and the
/// JSON Schema the reply must follow.
#[derive(Clone, Debug)]
pub struct LlmRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub schema: &'static str,
    pub schema_name: &'static str,
}

impl LlmRequest {
    /// Builds a request whose response format is the registry schema for `mode`.
    pub fn for_mode(mode: GenerationMode, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            schema: schema_for(mode),
            schema_name: schema_name(mode),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// A decoded reply together with the raw payload it was decoded from.
#[derive(Debug, Clone)]
pub struct LlmResponse<T> {
    pub value: T,
    pub raw: String,
}

//=========================================================================================
// Error Taxonomy
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("Missing or invalid API credential")]
    InvalidCredential,
    #[error("Failed to encode the request: {0}")]
    RequestEncoding(String),
    #[error("Failed to decode the response: {0}")]
    ResponseDecoding(String),
    #[error("The API returned an error: {0}")]
    Api(String),
    #[error("System or transport error: {0}")]
    System(String),
}

impl LlmError {
    /// Only transport-level failures are worth retrying. Decoding, credential
    /// and API-semantic errors would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::System(_))
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Decodes a raw JSON payload into `T`.
///
/// A malformed payload is always a `ResponseDecoding` failure carrying the
/// parser's diagnostic, never a default value.
pub fn decode<T: DeserializeOwned>(raw: &str) -> LlmResult<LlmResponse<T>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LlmError::ResponseDecoding(
            "the model returned an empty payload".to_string(),
        ));
    }
    let value = serde_json::from_str(trimmed).map_err(|e| {
        LlmError::ResponseDecoding(format!("{} (payload: {})", e, preview(trimmed)))
    })?;
    Ok(LlmResponse {
        value,
        raw: raw.to_string(),
    })
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 120;
    if raw.chars().count() <= LIMIT {
        raw.to_string()
    } else {
        format!("{}...", raw.chars().take(LIMIT).collect::<String>())
    }
}

//=========================================================================================
// Retry Policy
//=========================================================================================

/// Exponential backoff for retryable language-model failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculate the next backoff delay, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}
