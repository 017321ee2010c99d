//! LLM provider abstraction.
//!
//! Every agent talks to a model through [`LlmProvider`]. Backends:
//!
//! ```text
//!   build_provider(config)
//!        │
//!        ▼
//!   RetryingProvider ──► OfflineProvider   (deterministic, no network)
//!        │           └─► OpenAiProvider    (OpenAI-compatible HTTP API)
//!        ▼
//!   transient errors retried with exponential backoff,
//!   terminal errors surfaced immediately
//! ```

pub mod offline;
pub mod openai;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use offline::OfflineProvider;
pub use openai::OpenAiProvider;
pub use retry::{RetryPolicy, RetryingProvider};

/// Sampling parameters for a single generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    /// Optional system prompt prepended to the conversation.
    pub system_prompt: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

impl GenerateParams {
    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Provider failure, split into transient (retryable) and terminal classes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited | Self::Server { .. }
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "provider_timeout",
            Self::Network(_) => "provider_network",
            Self::RateLimited => "provider_rate_limited",
            Self::Server { .. } => "provider_server",
            Self::Auth(_) => "provider_auth",
            Self::InvalidRequest(_) => "provider_invalid_request",
            Self::MalformedResponse(_) => "provider_malformed_response",
            Self::Unavailable(_) => "provider_unavailable",
            Self::RetriesExhausted { .. } => "provider_retries_exhausted",
        }
    }

    /// Classify an HTTP status code returned by a provider endpoint.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth(body),
            429 => Self::RateLimited,
            500..=599 => Self::Server { status, body },
            _ => Self::InvalidRequest(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// Uniform interface over LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name used in logs and reports.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str, params: &GenerateParams)
        -> Result<String, ProviderError>;

    /// Embed `text` into a dense vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Shared reference to a provider.
pub type SharedProvider = Arc<dyn LlmProvider>;

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Deterministic local provider, no network access.
    Offline,
    /// Any server implementing the OpenAI chat/embeddings API.
    OpenaiCompatible,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::OpenaiCompatible => write!(f, "openai_compatible"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offline" | "stub" => Ok(Self::Offline),
            "openai" | "openai_compatible" | "openai-compatible" => Ok(Self::OpenaiCompatible),
            other => Err(format!("unknown provider kind: {}", other)),
        }
    }
}

/// Provider construction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Base URL of the OpenAI-compatible endpoint (without `/chat/completions`).
    pub base_url: String,
    /// Chat model name.
    pub model: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// HTTP request timeout in milliseconds.
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Offline,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_ms: 120_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Build the configured backend wrapped in a [`RetryingProvider`].
pub fn build_provider(config: &ProviderConfig) -> Result<SharedProvider, ProviderError> {
    let inner: SharedProvider = match config.kind {
        ProviderKind::Offline => Arc::new(OfflineProvider::new("offline")),
        ProviderKind::OpenaiCompatible => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                ProviderError::Auth(format!(
                    "environment variable {} is not set",
                    config.api_key_env
                ))
            })?;
            Arc::new(OpenAiProvider::new(config, api_key)?)
        }
    };
    tracing::debug!(provider = inner.name(), kind = %config.kind, "Provider constructed");
    Ok(Arc::new(RetryingProvider::new(inner, config.retry.clone())))
}
