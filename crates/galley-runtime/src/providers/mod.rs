//! The model boundary.
//!
//! Nodes only ever hold an [`LlmProvider`]. Which backend sits behind it is
//! decided once, from a [`ProviderSpec`], through the [`ProviderRegistry`].
//! Credentials are wrapped by [`secrets`] and never reach logs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "upstage")]
mod upstage;

pub use factory::{ProviderFactory, ProviderRegistry, ProviderSpec};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "upstage")]
pub use upstage::{UpstageProvider, UpstageProviderFactory, UPSTAGE_API_KEY_ENV};

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    ParseError(String),

    #[error("credentials rejected")]
    AuthError,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transport trouble, throttling and server errors are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            ProviderError::ParseError(_)
            | ProviderError::AuthError
            | ProviderError::NotConfigured(_) => false,
        }
    }
}

/// Model parameters shared by every call in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,

    /// Per attempt; retries get a fresh timeout
    #[serde(with = "crate::config::duration")]
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "solar-pro2".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// One turn of an OpenAI-style chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Raw model reply. `content` is untrusted text, JSON or not.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,

    /// Model that actually answered, used for cost estimation
    pub model: String,
    pub stop_reason: Option<String>,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    async fn health_check(&self) -> bool;

    /// Short name for logs.
    fn name(&self) -> &str;

    /// Rough prompt size used for budget checks before a call.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // ~2 chars per token keeps Hangul estimates conservative
        u32::try_from(text.chars().count() / 2).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    #[async_trait]
    impl LlmProvider for Silent {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Err(ProviderError::NotConfigured("silent".into()))
        }

        async fn health_check(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "silent"
        }
    }

    #[test]
    fn test_message_roles() {
        let roles: Vec<_> = [
            ChatMessage::system("Return JSON only."),
            ChatMessage::user("[\"A.\"]"),
            ChatMessage::assistant("{}"),
        ]
        .into_iter()
        .map(|m| m.role)
        .collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }

    #[test]
    fn test_estimate_counts_characters() {
        // Five Hangul syllables: 15 bytes, 5 chars.
        assert_eq!(Silent.estimate_tokens("철수는밥을"), 2);
        assert_eq!(Silent.estimate_tokens(""), 0);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::ApiError {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!ProviderError::ApiError {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!ProviderError::AuthError.is_retryable());
    }

    #[test]
    fn test_completion_config_from_yaml() {
        let config: CompletionConfig =
            serde_yaml::from_str("model: solar-mini\ntimeout: 30s\n").unwrap();
        assert_eq!(config.model, "solar-mini");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(TokenUsage { prompt_tokens: 100, completion_tokens: 50 }.total(), 150);
    }
}
