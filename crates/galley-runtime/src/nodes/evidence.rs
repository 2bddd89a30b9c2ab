use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use galley_core::{
    normalize_issues, EvidenceLocator, LogEntry, ReviewState, StateKey, StatePatch,
};

use super::names;
use crate::graph::{Node, NodeError};

/// Anchors every evaluator's quotes onto document spans.
pub struct EvidenceNode;

#[async_trait]
impl Node for EvidenceNode {
    fn name(&self) -> &str {
        names::EVIDENCE
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::Evidence, StateKey::Logs]
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        let locator = EvidenceLocator::from_sentences(state.sentences());
        let evidence = normalize_issues(&state.evaluations, &locator);

        let raw: usize = state.evaluations.values().map(|o| o.issues.len()).sum();
        debug!(
            raw,
            kept = evidence.issues.len(),
            highlights = evidence.highlights.len(),
            "Evidence normalized"
        );
        let log = LogEntry::info(
            names::EVIDENCE,
            "locator",
            format!(
                "{} of {} issue(s) located, {} highlight(s)",
                evidence.issues.len(),
                raw,
                evidence.highlights.len()
            ),
        );

        Ok(StatePatch {
            evidence: Some(evidence),
            ..StatePatch::new().log(log)
        })
    }
}
