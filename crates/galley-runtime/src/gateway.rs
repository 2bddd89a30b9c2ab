//! Guarded access to the provider.
//!
//! Every model call in a run goes through one [`ProviderGateway`], which
//! applies, in order: the evaluator's circuit, the token budget, a per-attempt
//! timeout and backoff on retryable errors. Usage is recorded on success.

use std::sync::Arc;

use backon::Retryable;
use thiserror::Error;
use tracing::{debug, warn};

use galley_core::EvaluatorKind;

use crate::config::RetryConfig;
use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
};
use crate::resilience::{backoff, BudgetTracker, CircuitBreaker, LlmUsage};

#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("circuit open for {0}")]
    CircuitOpen(EvaluatorKind),

    #[error("token budget exhausted: need ~{needed}, {remaining} left")]
    BudgetExhausted { needed: u32, remaining: u32 },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub struct ProviderGateway {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    budget: BudgetTracker,
}

impl ProviderGateway {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        completion: CompletionConfig,
        retry: RetryConfig,
        breaker: Arc<CircuitBreaker>,
        budget: BudgetTracker,
    ) -> Self {
        Self {
            provider,
            completion,
            retry,
            breaker,
            budget,
        }
    }

    pub fn model(&self) -> &str {
        &self.completion.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one completion on behalf of `kind` (or of a non-evaluator node).
    pub async fn complete(
        &self,
        kind: Option<EvaluatorKind>,
        messages: Vec<ChatMessage>,
    ) -> Result<CompletionResponse, GatewayError> {
        if let Some(kind) = kind {
            if self.breaker.is_open(kind) {
                warn!(evaluator = %kind, "Circuit open, skipping provider call");
                return Err(GatewayError::CircuitOpen(kind));
            }
        }

        let prompt_chars: String = messages.iter().map(|m| m.content.as_str()).collect();
        let needed = self
            .provider
            .estimate_tokens(&prompt_chars)
            .saturating_add(self.completion.max_tokens);
        if !self.budget.can_afford(kind, needed) {
            let remaining = match kind {
                Some(kind) => self.budget.remaining_for(kind).min(self.budget.remaining_global()),
                None => self.budget.remaining_global(),
            };
            warn!(evaluator = ?kind, needed, remaining, "Token budget exhausted");
            return Err(GatewayError::BudgetExhausted { needed, remaining });
        }

        let timeout = self.completion.timeout;
        let attempt = || {
            let messages = messages.clone();
            async move {
                match tokio::time::timeout(timeout, self.provider.complete(messages, &self.completion))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(timeout)),
                }
            }
        };

        let result = attempt
            .retry(backoff(&self.retry))
            .when(ProviderError::is_retryable)
            .notify(|err, delay| {
                warn!(evaluator = ?kind, error = %err, ?delay, "Retrying provider call");
            })
            .await;

        match result {
            Ok(response) => {
                debug!(
                    evaluator = ?kind,
                    tokens = response.usage.total(),
                    "Provider call completed"
                );
                if let Some(kind) = kind {
                    self.breaker.record_success(kind);
                }
                self.budget.record_usage(kind, &response.usage, &response.model);
                Ok(response)
            }
            Err(err) => {
                if let Some(kind) = kind {
                    self.breaker.record_failure(kind);
                }
                Err(GatewayError::Provider(err))
            }
        }
    }

    pub fn record_cache_hit(&self) {
        self.budget.record_cache_hit();
    }

    pub fn usage(&self) -> LlmUsage {
        self.budget.usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RetryConfig};
    use crate::providers::TokenUsage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails `failures` times with `error`, then answers.
    struct Flaky {
        failures: u32,
        error: ProviderError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for Flaky {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            Ok(CompletionResponse {
                content: "{}".into(),
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                },
                model: "solar-pro2".into(),
                stop_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn gateway(provider: Arc<Flaky>, budget: BudgetTracker) -> ProviderGateway {
        ProviderGateway::new(
            provider,
            CompletionConfig {
                max_tokens: 100,
                ..Default::default()
            },
            RetryConfig {
                max_attempts: 3,
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
            },
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 1,
            })),
            budget,
        )
    }

    fn flaky(failures: u32, error: ProviderError) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            error,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let provider = flaky(2, ProviderError::HttpError("reset".into()));
        let gw = gateway(provider.clone(), BudgetTracker::default());

        let response = gw
            .complete(Some(EvaluatorKind::Tone), vec![ChatMessage::user("hi")])
            .await
            .unwrap();

        assert_eq!(response.content, "{}");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(gw.usage().llm_calls, 1);
        assert_eq!(gw.usage().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried_and_opens_circuit() {
        let provider = flaky(5, ProviderError::AuthError);
        let gw = gateway(provider.clone(), BudgetTracker::default());

        let err = gw
            .complete(Some(EvaluatorKind::Logic), vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Provider(ProviderError::AuthError)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let err = gw
            .complete(Some(EvaluatorKind::Logic), vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen(EvaluatorKind::Logic)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_checked_before_call() {
        let provider = flaky(0, ProviderError::AuthError);
        let gw = gateway(provider.clone(), BudgetTracker::new(50, 50));

        let err = gw
            .complete(None, vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BudgetExhausted { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
