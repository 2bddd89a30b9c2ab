//! Runtime configuration.
//!
//! Everything tunable about a review run lives in [`RuntimeConfig`]. It is
//! normally loaded from YAML; durations are written the humantime way
//! (`30s`, `1m 30s`, `250ms`).
//!
//! ```yaml
//! provider:
//!   kind: upstage
//!   options:
//!     base_url: https://api.upstage.ai/v1
//! completion:
//!   model: solar-pro2
//!   temperature: 0.2
//! node_timeout: 2m
//! chunking:
//!   chunk_threshold: 50
//!   chunk_size: 50
//! retry:
//!   max_attempts: 3
//! budgets:
//!   global_max_tokens: 400000
//! ```

use std::path::Path;
use std::time::Duration;

use galley_core::EvaluatorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluators::chunk_deadline;
use crate::providers::{CompletionConfig, ProviderSpec};

/// Errors while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Serde helpers for humantime durations.
pub mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

/// Top-level runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Backend used by [`ReviewPipeline::from_config`](crate::ReviewPipeline::from_config)
    pub provider: ProviderSpec,

    /// Model parameters for every completion
    pub completion: CompletionConfig,

    /// Upper bound for a single non-evaluator node
    #[serde(with = "duration")]
    pub node_timeout: Duration,

    /// Upper bound for one evaluator node, across all of its chunks
    #[serde(with = "duration")]
    pub evaluator_timeout: Duration,

    /// Nodes allowed to run at the same time
    pub max_concurrency: usize,

    pub chunking: ChunkingConfig,

    /// Evaluators used when a request's selection is empty or unusable
    pub default_evaluators: Vec<EvaluatorKind>,

    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub budgets: BudgetConfig,
    pub cache: CacheConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSpec::default(),
            completion: CompletionConfig::default(),
            node_timeout: Duration::from_secs(120),
            evaluator_timeout: Duration::from_secs(300),
            max_concurrency: 8,
            chunking: ChunkingConfig::default(),
            default_evaluators: EvaluatorKind::ALL.to_vec(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            budgets: BudgetConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency", "must be at least 1"));
        }
        if self.chunking.chunk_size == 0 {
            return Err(invalid("chunking.chunk_size", "must be at least 1"));
        }
        if self.chunking.chunk_concurrency == 0 {
            return Err(invalid("chunking.chunk_concurrency", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(invalid("retry.min_delay", "must not exceed retry.max_delay"));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(invalid(
                "completion.temperature",
                format!("{} is outside 0.0..=2.0", self.completion.temperature),
            ));
        }
        if self.node_timeout.is_zero() || self.evaluator_timeout.is_zero() {
            return Err(invalid("node_timeout", "timeouts must be positive"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if self.default_evaluators.is_empty() {
            return Err(invalid("default_evaluators", "must name at least one evaluator"));
        }
        let window = self.retry_window();
        if window > chunk_deadline(self.evaluator_timeout) {
            return Err(invalid(
                "evaluator_timeout",
                format!(
                    "{} leaves no room for one call with retries ({})",
                    humantime::format_duration(self.evaluator_timeout),
                    humantime::format_duration(window)
                ),
            ));
        }
        Ok(())
    }

    /// Longest one provider call can take: every attempt timing out, with
    /// the longest backoff between attempts (doubled when jittered).
    pub fn retry_window(&self) -> Duration {
        let attempts = u32::try_from(self.retry.max_attempts).unwrap_or(u32::MAX);
        let delay = if self.retry.jitter {
            self.retry.max_delay.saturating_mul(2)
        } else {
            self.retry.max_delay
        };
        self.completion
            .timeout
            .saturating_mul(attempts)
            .saturating_add(delay.saturating_mul(attempts.saturating_sub(1)))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// When and how evaluators split long manuscripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Sentence count above which an evaluator chunks
    pub chunk_threshold: usize,

    /// Sentences per chunk
    pub chunk_size: usize,

    /// Chunks of one evaluator in flight at once
    pub chunk_concurrency: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: 50,
            chunk_size: 50,
            chunk_concurrency: 4,
        }
    }
}

/// Backoff for retryable provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: usize,

    #[serde(with = "duration")]
    pub min_delay: Duration,

    #[serde(with = "duration")]
    pub max_delay: Duration,

    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

/// Circuit breaker settings, applied per evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call
    #[serde(with = "duration")]
    pub recovery_timeout: Duration,

    /// Successes in half-open needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Token ceilings for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub global_max_tokens: u32,
    pub per_evaluator_max_tokens: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            global_max_tokens: 400_000,
            per_evaluator_max_tokens: 80_000,
        }
    }
}

/// In-memory cache of parsed evaluator chunk results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,

    #[serde(with = "duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.completion.model, "solar-pro2");
        assert_eq!(config.chunking.chunk_threshold, 50);
        assert_eq!(config.default_evaluators.len(), 7);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
node_timeout: 45s
max_concurrency: 2
chunking:
  chunk_size: 20
default_evaluators: [tone, logic]
retry:
  min_delay: 100ms
  max_delay: 2s
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.node_timeout, Duration::from_secs(45));
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.chunking.chunk_size, 20);
        assert_eq!(config.chunking.chunk_threshold, 50);
        assert_eq!(
            config.default_evaluators,
            vec![EvaluatorKind::Tone, EvaluatorKind::Logic]
        );
        assert_eq!(config.retry.min_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_provider_spec_from_yaml() {
        let yaml = "provider:\n  kind: upstage\n  options:\n    base_url: http://localhost:8080\n";
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.provider.kind, "upstage");
        assert_eq!(config.provider.options["base_url"], "http://localhost:8080");
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let err = RuntimeConfig::from_yaml("chunking:\n  chunk_size: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "chunking.chunk_size",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_bad_duration() {
        let err = RuntimeConfig::from_yaml("node_timeout: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_rejects_inverted_retry_delays() {
        let yaml = "retry:\n  min_delay: 10s\n  max_delay: 1s\n";
        assert!(RuntimeConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_empty_default_evaluators() {
        let err = RuntimeConfig::from_yaml("default_evaluators: []\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "default_evaluators",
                ..
            }
        ));
    }

    #[test]
    fn test_evaluator_timeout_must_cover_retries() {
        let config = RuntimeConfig::default();
        // 3 x 60s attempts plus two jittered 8s backoffs.
        assert_eq!(config.retry_window(), Duration::from_secs(212));

        let yaml = "evaluator_timeout: 5s\ncompletion:\n  timeout: 2h\nretry:\n  max_attempts: 1\n";
        let err = RuntimeConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "evaluator_timeout",
                ..
            }
        ));

        let yaml = "evaluator_timeout: 5s\ncompletion:\n  timeout: 4s\nretry:\n  max_attempts: 1\n";
        assert!(RuntimeConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::from_yaml_file("/nonexistent/galley.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/galley.yaml"));
    }
}
