use std::sync::Arc;

use async_trait::async_trait;

use galley_core::{LogEntry, QaScores, ReviewState, StateKey, StatePatch};

use super::names;
use crate::graph::{Node, NodeError};

/// Terminal node: per-evaluator scores, issue counts and degraded flags.
pub struct QaScoresNode;

#[async_trait]
impl Node for QaScoresNode {
    fn name(&self) -> &str {
        names::QA_SCORES
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::QaScores, StateKey::Logs]
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        let scores = QaScores::from_outputs(&state.evaluations);
        let message = match scores.mean() {
            Some(mean) => format!("mean evaluator score {:.1}", mean),
            None => "no evaluator reported a score".to_string(),
        };

        Ok(StatePatch {
            qa_scores: Some(scores),
            ..StatePatch::new().log(LogEntry::info(names::QA_SCORES, "qa", message))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galley_core::{EvaluatorKind, EvaluatorOutput};

    #[tokio::test]
    async fn test_scores_collected() {
        let mut state = ReviewState::new("x");
        state.evaluations.insert(
            EvaluatorKind::Tone,
            EvaluatorOutput {
                score: Some(80),
                ..Default::default()
            },
        );
        state
            .evaluations
            .insert(EvaluatorKind::Logic, EvaluatorOutput::degraded("timeout"));

        let patch = QaScoresNode.run(Arc::new(state)).await.unwrap();
        let scores = patch.qa_scores.unwrap();

        assert_eq!(scores.scores[&EvaluatorKind::Tone].score, Some(80));
        assert!(scores.scores[&EvaluatorKind::Logic].degraded);
        assert_eq!(patch.logs[0].message, "mean evaluator score 80.0");
    }
}
