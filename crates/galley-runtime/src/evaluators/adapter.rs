use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use galley_core::{EvaluatorKind, EvaluatorOutput, LogEntry, ReviewState, StateKey, StatePatch};

use super::chunking::{chunk_deadline, merge_chunks, plan_chunks, ChunkResult};
use super::parse::parse_evaluator_response;
use crate::cache::{ChunkKey, EvaluationCache};
use crate::config::ChunkingConfig;
use crate::gateway::ProviderGateway;
use crate::graph::{Node, NodeError};
use crate::prompts;

/// Graph node wrapping one evaluator.
pub struct EvaluatorNode {
    kind: EvaluatorKind,
    gateway: Arc<ProviderGateway>,
    cache: Option<Arc<EvaluationCache>>,
    chunking: ChunkingConfig,
    timeout: Duration,
}

impl EvaluatorNode {
    pub fn new(
        kind: EvaluatorKind,
        gateway: Arc<ProviderGateway>,
        chunking: ChunkingConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            kind,
            gateway,
            cache: None,
            chunking,
            timeout,
        }
    }

    pub fn with_cache(mut self, cache: Arc<EvaluationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn kind(&self) -> EvaluatorKind {
        self.kind
    }

    /// Evaluate the whole sentence table. Never fails.
    ///
    /// Chunks share one deadline inside the node timeout; a chunk still
    /// running at the deadline degrades alone and the rest are merged.
    pub async fn evaluate(&self, state: &ReviewState) -> EvaluatorOutput {
        let texts: Vec<&str> = state.sentences().iter().map(|s| s.text.as_str()).collect();
        if texts.is_empty() {
            return EvaluatorOutput {
                note: Some("no sentences to evaluate".to_string()),
                ..Default::default()
            };
        }

        let persona = state
            .reader_persona
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok());
        let summary = state.global_summary.as_deref();

        let chunks = plan_chunks(texts.len(), &self.chunking);
        if chunks.len() > 1 {
            debug!(evaluator = %self.kind, chunks = chunks.len(), "Chunking manuscript");
        }

        let budget = chunk_deadline(self.timeout);
        let deadline = Instant::now() + budget;

        let texts = &texts;
        let persona = persona.as_deref();
        let results: Vec<ChunkResult> = stream::iter(chunks)
            .map(|range| async move {
                let chunk = self.evaluate_chunk(&texts[range.clone()], summary, persona, state);
                let output = match tokio::time::timeout_at(deadline, chunk).await {
                    Ok(output) => output,
                    Err(_) => {
                        warn!(
                            evaluator = %self.kind,
                            start = range.start,
                            "Chunk missed the evaluator deadline"
                        );
                        EvaluatorOutput::degraded(format!(
                            "chunk timed out after {}",
                            humantime::format_duration(budget)
                        ))
                    }
                };
                ChunkResult {
                    start: range.start,
                    end: range.end,
                    output,
                }
            })
            .buffer_unordered(self.chunking.chunk_concurrency.max(1))
            .collect()
            .await;

        merge_chunks(results)
    }

    async fn evaluate_chunk(
        &self,
        sentences: &[&str],
        summary: Option<&str>,
        persona_key: Option<&str>,
        state: &ReviewState,
    ) -> EvaluatorOutput {
        let key = ChunkKey::new(
            self.kind,
            self.gateway.model(),
            &prompts::render_sentences(sentences),
            &[summary, persona_key],
        );

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                debug!(evaluator = %self.kind, "Chunk served from cache");
                self.gateway.record_cache_hit();
                return hit;
            }
        }

        let messages = prompts::evaluator_messages(
            self.kind,
            sentences,
            summary,
            state.reader_persona.as_ref(),
        );

        let response = match self.gateway.complete(Some(self.kind), messages).await {
            Ok(response) => response,
            Err(err) => {
                warn!(evaluator = %self.kind, error = %err, "Evaluator call failed");
                return EvaluatorOutput::degraded(err.to_string());
            }
        };

        match parse_evaluator_response(&response.content) {
            Ok(output) => {
                if let Some(cache) = &self.cache {
                    cache.insert(key, output.clone()).await;
                }
                output
            }
            Err(err) => {
                warn!(evaluator = %self.kind, error = %err, "Evaluator response unusable");
                EvaluatorOutput::degraded(format!("parse failed: {}", err))
            }
        }
    }
}

#[async_trait]
impl Node for EvaluatorNode {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::Evaluation(self.kind), StateKey::Logs]
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        let output = self.evaluate(&state).await;
        let (node, agent) = (self.kind.as_str(), self.kind.agent_label());

        let log = match &output.error {
            Some(error) => LogEntry::warning(node, agent, format!("evaluation degraded: {}", error)),
            None => {
                info!(evaluator = %self.kind, issues = output.issues.len(), "Evaluation finished");
                LogEntry::info(node, agent, format!("{} issue(s) found", output.issues.len()))
            }
        };

        Ok(StatePatch {
            evaluation: Some((self.kind, output)),
            ..StatePatch::new().log(log)
        })
    }
}
