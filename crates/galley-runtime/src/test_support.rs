//! Scripted provider shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::gateway::ProviderGateway;
use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use crate::resilience::{BudgetTracker, CircuitBreaker};

/// Answers calls with the scripted replies in order, then fails.
pub struct Scripted {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for Scripted {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("script exhausted".into()))?;
        Ok(CompletionResponse {
            content: reply,
            usage: TokenUsage {
                prompt_tokens: 20,
                completion_tokens: 10,
            },
            model: "solar-pro2".into(),
            stop_reason: None,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A gateway over a [`Scripted`] provider plus a call counter.
pub fn scripted_gateway(replies: &[&str]) -> (Arc<ProviderGateway>, impl Fn() -> usize) {
    let provider = Arc::new(Scripted {
        replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        calls: AtomicUsize::new(0),
    });
    let gateway = ProviderGateway::new(
        provider.clone(),
        CompletionConfig::default(),
        RetryConfig {
            max_attempts: 1,
            ..Default::default()
        },
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        BudgetTracker::default(),
    );
    (Arc::new(gateway), move || provider.calls.load(Ordering::SeqCst))
}
