//! Upstage Solar provider over the OpenAI-compatible chat completions API.
//!
//! Requires the `upstage` feature.

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the Upstage API key.
pub const UPSTAGE_API_KEY_ENV: &str = "UPSTAGE_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.upstage.ai/v1";
const CREDENTIAL_NAME: &str = "Upstage API key";

pub struct UpstageProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for UpstageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstageProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl UpstageProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let credential = ApiCredential::new(api_key, CredentialSource::Programmatic, CREDENTIAL_NAME)?;
        Self::with_credential(credential, DEFAULT_BASE_URL)
    }

    /// Read `UPSTAGE_API_KEY` from the environment.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(UPSTAGE_API_KEY_ENV, CREDENTIAL_NAME)?;
        Self::with_credential(credential, DEFAULT_BASE_URL)
    }

    /// Build from provider config, falling back to `UPSTAGE_API_KEY`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            UPSTAGE_API_KEY_ENV,
            CREDENTIAL_NAME,
        )?;
        let base_url = config["base_url"].as_str().unwrap_or(DEFAULT_BASE_URL);
        Self::with_credential(credential, base_url)
    }

    fn with_credential(credential: ApiCredential, base_url: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;
        Ok(Self {
            credential,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for UpstageProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        let usage = body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: body.model.unwrap_or_else(|| config.model.clone()),
            stop_reason: choice.finish_reason,
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.expose().is_empty()
    }

    fn name(&self) -> &str {
        "upstage"
    }
}

/// Creates [`UpstageProvider`]s.
///
/// ```json
/// { "api_key": "up_...", "base_url": "https://api.upstage.ai/v1" }
/// ```
///
/// Both fields are optional; the key falls back to `UPSTAGE_API_KEY`.
pub struct UpstageProviderFactory;

impl ProviderFactory for UpstageProviderFactory {
    fn kind(&self) -> &'static str {
        "upstage"
    }

    fn build(&self, options: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.check(options)?;
        Ok(Arc::new(UpstageProvider::from_config(options)?))
    }

    fn check(&self, options: &JsonValue) -> Result<(), ProviderError> {
        if let Some(url) = options["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        ApiCredential::from_config_or_env(options, "api_key", UPSTAGE_API_KEY_ENV, CREDENTIAL_NAME)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_key_rejected() {
        assert!(UpstageProvider::new("your_upstage_api_key_here").is_err());
    }

    #[test]
    fn test_from_config() {
        let config = serde_json::json!({
            "api_key": "up_test",
            "base_url": "https://solar.example.com/v1/"
        });
        let provider = UpstageProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url, "https://solar.example.com/v1");
        assert_eq!(provider.credential.source(), CredentialSource::Config);
    }

    #[test]
    fn test_key_not_in_debug_output() {
        let provider = UpstageProvider::new("up_secret_123").unwrap();
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("up_secret_123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_factory_rejects_bad_url() {
        let config = serde_json::json!({ "api_key": "up_test", "base_url": "ftp://x" });
        assert!(UpstageProviderFactory.check(&config).is_err());
    }

    #[test]
    fn test_request_shape() {
        let messages = vec![ChatMessage::system("json only"), ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "solar-pro2",
            messages: &messages,
            max_tokens: 256,
            temperature: 0.2,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "solar-pro2");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
    }
}
