//! Provider contract shapes for Ensemble.
//!
//! These types model the data exchanged with language-model backends:
//! generation requests and results, streaming events, model listings, and
//! provider errors. Concrete backend clients live outside the engine; they
//! plug in by implementing `ensemble-core`'s `LlmProvider` trait over these
//! shapes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Provider identity and configuration
// ---------------------------------------------------------------------------

/// Type of language-model backend. Closed set; dispatch happens through a
/// registry keyed by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    ClaudeCode,
    GeminiSdk,
    Openai,
    Openrouter,
    Ollama,
    LmStudio,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderType::ClaudeCode => "claude_code",
            ProviderType::GeminiSdk => "gemini_sdk",
            ProviderType::Openai => "openai",
            ProviderType::Openrouter => "openrouter",
            ProviderType::Ollama => "ollama",
            ProviderType::LmStudio => "lm_studio",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude_code" => Ok(ProviderType::ClaudeCode),
            "gemini_sdk" => Ok(ProviderType::GeminiSdk),
            "openai" => Ok(ProviderType::Openai),
            "openrouter" => Ok(ProviderType::Openrouter),
            "ollama" => Ok(ProviderType::Ollama),
            "lm_studio" => Ok(ProviderType::LmStudio),
            other => Err(format!("invalid provider type: '{other}'")),
        }
    }
}

/// How a phase talks to its backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    /// Override for local or self-hosted backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_context_length() -> u32 {
    8192
}

// ---------------------------------------------------------------------------
// Generation request/response
// ---------------------------------------------------------------------------

/// A single generation request sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Build a plain prompt-only request.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Full response from a non-streaming generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    pub content: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub model_used: String,
    pub finish_reason: String,
}

impl GenerationResult {
    pub fn total_tokens(&self) -> u64 {
        self.tokens_input + self.tokens_output
    }
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_input: u64,
    pub tokens_output: u64,
}

/// Events emitted during a streaming generation.
///
/// The stream is finite, non-restartable, and ends with `Done` (or an error).
/// Dropping the stream early releases the underlying connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of generated text.
    TextDelta { text: String },
    /// Token usage, typically reported once near the end of the stream.
    Usage(Usage),
    /// The stream has completed.
    Done,
}

/// Metadata for a model a provider can serve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub model_name: String,
    pub context_length: u32,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_vision: bool,
    /// USD per 1k input tokens.
    #[serde(default)]
    pub cost_input_per_1k: f64,
    /// USD per 1k output tokens.
    #[serde(default)]
    pub cost_output_per_1k: f64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from provider operations. These never escape the phase runner;
/// they become `failed` phase executions with the message preserved.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("no provider registered for type '{0}'")]
    UnknownProvider(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
