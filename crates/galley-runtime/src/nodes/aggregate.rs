use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use galley_core::{Aggregator, IssueLists, LogEntry, ReviewState, StateKey, StatePatch};

use super::names;
use crate::graph::{Node, NodeError};

/// The fan-in join: decides between pass and rewrite.
///
/// Missing or degraded evaluations count as empty issue lists.
pub struct AggregateNode {
    aggregator: Aggregator,
}

impl AggregateNode {
    pub fn new() -> Self {
        Self {
            aggregator: Aggregator::new(),
        }
    }
}

impl Default for AggregateNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for AggregateNode {
    fn name(&self) -> &str {
        names::AGGREGATE
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::Aggregate, StateKey::Logs]
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        let result = self.aggregator.aggregate(
            &IssueLists::from_outputs(&state.evaluations),
            state.persona_feedback.as_ref(),
            state.reader_persona.as_ref(),
        );

        info!(
            decision = ?result.decision,
            primary = ?result.primary_issue,
            "Aggregation finished"
        );
        let log = LogEntry::info(names::AGGREGATE, "aggregator", result.summary.clone());

        Ok(StatePatch {
            aggregate: Some(result),
            ..StatePatch::new().log(log)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galley_core::{Decision, EvaluatorKind, EvaluatorOutput, ProblemType, RawIssue};

    #[tokio::test]
    async fn test_degraded_evaluator_counts_as_empty() {
        let mut state = ReviewState::new("text");
        state
            .evaluations
            .insert(EvaluatorKind::HateBias, EvaluatorOutput::degraded("timeout"));
        state.evaluations.insert(
            EvaluatorKind::GenreCliche,
            EvaluatorOutput {
                issues: vec![RawIssue::default()],
                ..Default::default()
            },
        );

        let patch = AggregateNode::new().run(Arc::new(state)).await.unwrap();
        let aggregate = patch.aggregate.unwrap();

        assert_eq!(aggregate.decision, Decision::Pass);
        assert_eq!(aggregate.primary_issue, Some(ProblemType::Cliche));
    }
}
