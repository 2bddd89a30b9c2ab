use std::sync::Arc;

use async_trait::async_trait;

use galley_core::{segment, LogEntry, ReviewState, StateKey, StatePatch};

use super::names;
use crate::graph::{Node, NodeError};

/// Builds the sentence table every later node addresses.
pub struct SplitNode;

#[async_trait]
impl Node for SplitNode {
    fn name(&self) -> &str {
        names::SPLIT
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::Sentences, StateKey::Logs]
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        let sentences = segment(&state.original_text);
        let log = LogEntry::info(
            names::SPLIT,
            "segmenter",
            format!("split into {} sentence(s)", sentences.len()),
        );

        Ok(StatePatch {
            sentences: Some(sentences),
            ..StatePatch::new().log(log)
        })
    }
}
