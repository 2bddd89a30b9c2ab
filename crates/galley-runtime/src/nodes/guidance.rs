//! Author-facing outputs: the rewrite guide and the final report.
//!
//! Both are free-form JSON owned by the prompt. A failed call still writes
//! an object, `{"error": "..."}`, so consumers never see a missing key.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use galley_core::{EvaluatorKind, LogEntry, RawIssue, ReviewState, StateKey, StatePatch};

use super::names;
use crate::evaluators::extract_json_object;
use crate::gateway::ProviderGateway;
use crate::graph::{Node, NodeError};
use crate::prompts;
use crate::providers::ChatMessage;

async fn complete_json(
    gateway: &ProviderGateway,
    node: &'static str,
    messages: Vec<ChatMessage>,
) -> (JsonValue, LogEntry) {
    let result = match gateway.complete(None, messages).await {
        Ok(response) => extract_json_object(&response.content).map_err(|e| e.to_string()),
        Err(err) => Err(err.to_string()),
    };

    match result {
        Ok(value) => (value, LogEntry::info(node, "writer", "generated")),
        Err(error) => {
            warn!(node, error = %error, "Generation failed");
            let log = LogEntry::warning(node, "writer", format!("generation failed: {}", error));
            (json!({ "error": error }), log)
        }
    }
}

/// Runs only when the aggregate decided `rewrite`.
pub struct RewriteNode {
    gateway: Arc<ProviderGateway>,
}

impl RewriteNode {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for RewriteNode {
    fn name(&self) -> &str {
        names::REWRITE
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::RewriteGuidelines, StateKey::Logs]
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        let aggregate = state
            .aggregate
            .as_ref()
            .ok_or(NodeError::MissingInput("aggregate"))?;

        let issues: Vec<(EvaluatorKind, &[RawIssue])> = state
            .evaluations
            .iter()
            .filter(|(_, output)| !output.issues.is_empty())
            .map(|(kind, output)| (*kind, output.issues.as_slice()))
            .collect();

        let messages = prompts::rewrite_messages(aggregate, &issues);
        let (guidelines, log) = complete_json(&self.gateway, names::REWRITE, messages).await;

        Ok(StatePatch {
            rewrite_guidelines: Some(guidelines),
            ..StatePatch::new().log(log)
        })
    }
}

pub struct ReportNode {
    gateway: Arc<ProviderGateway>,
}

impl ReportNode {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for ReportNode {
    fn name(&self) -> &str {
        names::REPORT
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::FinalReport, StateKey::Logs]
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        let aggregate = state
            .aggregate
            .as_ref()
            .ok_or(NodeError::MissingInput("aggregate"))?;

        let messages = prompts::report_messages(
            aggregate,
            state.persona_feedback.as_ref(),
            state.rewrite_guidelines.as_ref(),
        );
        let (report, log) = complete_json(&self.gateway, names::REPORT, messages).await;

        Ok(StatePatch {
            final_report: Some(report),
            ..StatePatch::new().log(log)
        })
    }
}
