//! Reader persona: who is reading, and where they got lost.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use galley_core::{LogEntry, PersonaFeedback, ReaderPersona, ReviewState, StateKey, StatePatch};

use super::names;
use crate::evaluators::extract_json_object;
use crate::gateway::ProviderGateway;
use crate::graph::{Node, NodeError};
use crate::prompts;

const EXCERPT_CHARS: usize = 1500;

/// Read a persona from either `{"persona": {...}}` or a bare object.
pub fn parse_persona(value: &JsonValue) -> Option<ReaderPersona> {
    let inner = match value.get("persona") {
        Some(nested) if nested.is_object() => nested,
        _ => value,
    };
    if !inner.is_object() {
        return None;
    }
    serde_json::from_value(inner.clone()).ok()
}

/// Read feedback from either `{"persona_feedback": {...}}` or a bare object.
pub fn parse_persona_feedback(value: &JsonValue) -> Option<PersonaFeedback> {
    let inner = match value.get("persona_feedback") {
        Some(nested) if nested.is_object() => nested,
        _ => value,
    };
    if !inner.is_object() {
        return None;
    }
    serde_json::from_value(inner.clone()).ok()
}

/// Entry node. Derives the target reader from the request context.
///
/// Without context there is nothing to derive from, so the default persona
/// is written and the model is not called.
pub struct ReaderPersonaNode {
    gateway: Arc<ProviderGateway>,
}

impl ReaderPersonaNode {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self { gateway }
    }

    async fn derive(&self, state: &ReviewState) -> Result<ReaderPersona, String> {
        let excerpt: String = state.original_text.chars().take(EXCERPT_CHARS).collect();
        let messages = prompts::reader_persona_messages(state.context.as_ref(), &excerpt);

        let response = self
            .gateway
            .complete(None, messages)
            .await
            .map_err(|e| e.to_string())?;
        let value = extract_json_object(&response.content).map_err(|e| e.to_string())?;
        parse_persona(&value).ok_or_else(|| "reply has no persona object".to_string())
    }
}

#[async_trait]
impl Node for ReaderPersonaNode {
    fn name(&self) -> &str {
        names::READER_PERSONA
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::ReaderPersona, StateKey::Logs]
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        let (persona, log) = if state.context.is_none() {
            let log = LogEntry::info(
                names::READER_PERSONA,
                "persona",
                "no context supplied, using default reader",
            );
            (ReaderPersona::default(), log)
        } else {
            match self.derive(&state).await {
                Ok(persona) => {
                    info!(persona = %persona.name, "Reader persona derived");
                    let log = LogEntry::info(
                        names::READER_PERSONA,
                        "persona",
                        format!("reader persona: {}", persona.name),
                    );
                    (persona, log)
                }
                Err(error) => {
                    warn!(error = %error, "Persona derivation failed, using default reader");
                    let log = LogEntry::warning(
                        names::READER_PERSONA,
                        "persona",
                        format!("persona derivation failed: {}", error),
                    );
                    (ReaderPersona::default(), log)
                }
            }
        };

        Ok(StatePatch {
            reader_persona: Some(persona),
            ..StatePatch::new().log(log)
        })
    }
}

/// The persona's first read: confusions and missing background.
pub struct PersonaFeedbackNode {
    gateway: Arc<ProviderGateway>,
}

impl PersonaFeedbackNode {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self { gateway }
    }

    async fn read(&self, state: &ReviewState) -> Result<PersonaFeedback, String> {
        let texts: Vec<&str> = state.sentences().iter().map(|s| s.text.as_str()).collect();
        let messages =
            prompts::persona_feedback_messages(state.reader_persona.as_ref(), &texts);

        let response = self
            .gateway
            .complete(None, messages)
            .await
            .map_err(|e| e.to_string())?;
        let value = extract_json_object(&response.content).map_err(|e| e.to_string())?;
        parse_persona_feedback(&value).ok_or_else(|| "reply has no feedback object".to_string())
    }
}

#[async_trait]
impl Node for PersonaFeedbackNode {
    fn name(&self) -> &str {
        names::PERSONA_FEEDBACK
    }

    fn writes(&self) -> Vec<StateKey> {
        vec![StateKey::PersonaFeedback, StateKey::Logs]
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
        if state.sentences().is_empty() {
            return Ok(StatePatch {
                persona_feedback: Some(PersonaFeedback::default()),
                ..StatePatch::new()
            });
        }

        let (feedback, log) = match self.read(&state).await {
            Ok(feedback) => {
                let log = LogEntry::info(
                    names::PERSONA_FEEDBACK,
                    "persona",
                    format!(
                        "{} confusion(s), {} missing context item(s)",
                        feedback.confusions.len(),
                        feedback.missing_context.len()
                    ),
                );
                (feedback, log)
            }
            Err(error) => {
                warn!(error = %error, "Persona feedback failed");
                let log = LogEntry::warning(
                    names::PERSONA_FEEDBACK,
                    "persona",
                    format!("persona feedback failed: {}", error),
                );
                (PersonaFeedback::default(), log)
            }
        };

        Ok(StatePatch {
            persona_feedback: Some(feedback),
            ..StatePatch::new().log(log)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scripted_gateway;
    use galley_core::segment;
    use serde_json::json;

    #[test]
    fn test_parse_persona_nested_or_flat() {
        let nested = json!({"persona": {"name": "teen fan", "expectations": ["pace"]}});
        let flat = json!({"name": "editor", "role": "publisher"});

        assert_eq!(parse_persona(&nested).unwrap().name, "teen fan");
        assert_eq!(parse_persona(&flat).unwrap().role.as_deref(), Some("publisher"));
        assert!(parse_persona(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_parse_feedback_nested() {
        let value = json!({"persona_feedback": {"confusions": [{"sentence_index": 2}], "missing_context": []}});
        let feedback = parse_persona_feedback(&value).unwrap();
        assert_eq!(feedback.confusions.len(), 1);
        assert!(feedback.missing_context.is_empty());
    }

    #[tokio::test]
    async fn test_no_context_means_no_call() {
        let (gateway, calls) = scripted_gateway(&[]);
        let node = ReaderPersonaNode::new(gateway);

        let patch = node.run(Arc::new(ReviewState::new("text"))).await.unwrap();

        assert_eq!(patch.reader_persona, Some(ReaderPersona::default()));
        assert_eq!(calls(), 0);
    }

    #[tokio::test]
    async fn test_persona_from_context() {
        let (gateway, calls) =
            scripted_gateway(&[r#"{"persona": {"name": "mystery reader"}}"#]);
        let node = ReaderPersonaNode::new(gateway);
        let state = ReviewState::new("text").with_context(Some(json!({"genre": "mystery"})));

        let patch = node.run(Arc::new(state)).await.unwrap();

        assert_eq!(patch.reader_persona.unwrap().name, "mystery reader");
        assert_eq!(calls(), 1);
    }

    #[tokio::test]
    async fn test_bad_persona_reply_falls_back() {
        let (gateway, _) = scripted_gateway(&["no json here"]);
        let node = ReaderPersonaNode::new(gateway);
        let state = ReviewState::new("text").with_context(Some(json!({"genre": "sf"})));

        let patch = node.run(Arc::new(state)).await.unwrap();

        assert_eq!(patch.reader_persona, Some(ReaderPersona::default()));
        assert_eq!(patch.logs[0].level, galley_core::LogLevel::Warning);
    }

    #[tokio::test]
    async fn test_feedback_parsed() {
        let (gateway, _) = scripted_gateway(&[
            r#"{"persona_feedback": {"confusions": [{"sentence_index": 0}], "missing_context": ["who is Mara"]}}"#,
        ]);
        let node = PersonaFeedbackNode::new(gateway);
        let mut state = ReviewState::new("Mara left.");
        state.sentences = Some(segment("Mara left."));

        let patch = node.run(Arc::new(state)).await.unwrap();
        let feedback = patch.persona_feedback.unwrap();

        assert_eq!(feedback.confusions.len(), 1);
        assert_eq!(feedback.missing_context.len(), 1);
    }
}
