//! Prompts for every model-backed node.
//!
//! Each prompt is a shared JSON-only system message plus a task message.
//! Sentences are always rendered as a JSON array whose positions are the
//! `sentence_index` values the model must report, so chunk prompts carry
//! chunk-local indices.

use galley_core::{AggregateResult, EvaluatorKind, PersonaFeedback, RawIssue, ReaderPersona};
use serde_json::Value as JsonValue;

use crate::providers::ChatMessage;

/// System message shared by every call.
pub const JSON_ONLY_SYSTEM_PROMPT: &str = "\
You are a JSON output engine.
Output exactly one valid JSON object and nothing else.
No explanations, no markdown, no code fences, no comments.
Use ASCII double quotes only.";

const ISSUE_SCHEMA: &str = r#"{
  "score": 0,
  "issues": [
    {
      "issue_type": "short category",
      "severity": "low | medium | high",
      "sentence_index": 0,
      "char_start": 0,
      "char_end": 0,
      "quote": "exact text copied from that sentence",
      "reason": "why a reader would stumble here",
      "confidence": 0.0
    }
  ],
  "note": "one-line overall remark"
}"#;

const TENSION_SCHEMA: &str = r#"{
  "score": 0,
  "curve": [
    { "stage": "section of the plot", "tension": "increase | maintain | decrease", "reason": "..." }
  ],
  "issues": [
    {
      "issue_type": "tension_drop | climax_missing | tension_overload | stagnation",
      "severity": "low | medium | high",
      "sentence_index": 0,
      "char_start": 0,
      "char_end": 0,
      "quote": "exact text copied from that sentence",
      "reason": "...",
      "confidence": 0.0
    }
  ],
  "note": "..."
}"#;

/// What each evaluator looks for.
pub fn evaluator_focus(kind: EvaluatorKind) -> &'static str {
    match kind {
        EvaluatorKind::Tone => {
            "You analyse tone and narration. Flag places where voice or emotional register \
             shifts without cause, or where a character speaks against their established setting. \
             Do not judge logic and do not rewrite anything."
        }
        EvaluatorKind::Logic => {
            "You analyse causality. Flag events that happen without sufficient cause, \
             contradictions with earlier facts, and motivations the text never establishes."
        }
        EvaluatorKind::Trauma => {
            "You review potentially traumatic content: self-harm, abuse, graphic violence. \
             Flag depictions that are gratuitous, unframed or likely to harm vulnerable readers."
        }
        EvaluatorKind::HateBias => {
            "You review hate and bias. Flag demeaning generalisations, slurs and stereotypes \
             about protected groups that the narrative does not critically frame."
        }
        EvaluatorKind::GenreCliche => {
            "You review genre cliches. Flag stock phrases, predictable tropes and stale images. \
             These findings are for craft reference only."
        }
        EvaluatorKind::Spelling => {
            "You proofread. Flag spelling, spacing and punctuation mistakes. \
             Put the corrected form in a \"suggestion\" field."
        }
        EvaluatorKind::TensionCurve => {
            "You analyse narrative tension. Classify how tension moves through the plot \
             (increase, maintain, decrease) and flag structural anomalies."
        }
    }
}

/// Render sentences as the JSON array the model indexes into.
pub fn render_sentences(sentences: &[&str]) -> String {
    serde_json::to_string(sentences).unwrap_or_else(|_| "[]".to_string())
}

fn persona_block(persona: Option<&ReaderPersona>) -> String {
    match persona {
        Some(p) => format!(
            "[Reader persona]\n- name: {}\n- role: {}\n- knowledge level: {}\n- expectations: {}\nEvaluate as if this reader is reading.\n",
            p.name,
            p.role.as_deref().unwrap_or("unknown"),
            p.knowledge_level.as_deref().unwrap_or("unknown"),
            if p.expectations.is_empty() {
                "none stated".to_string()
            } else {
                p.expectations.join(", ")
            },
        ),
        None => String::new(),
    }
}

/// Messages for one evaluator call over one block of sentences.
pub fn evaluator_messages(
    kind: EvaluatorKind,
    sentences: &[&str],
    summary: Option<&str>,
    persona: Option<&ReaderPersona>,
) -> Vec<ChatMessage> {
    let schema = match kind {
        EvaluatorKind::TensionCurve => TENSION_SCHEMA,
        _ => ISSUE_SCHEMA,
    };

    let prompt = format!(
        "{focus}\n\n\
         [Context summary, reference only]\n{summary}\n\n\
         {persona}\n\
         [Sentences: JSON array, the position is sentence_index]\n{sentences}\n\n\
         Rules:\n\
         - quote must be copied verbatim from the sentence at sentence_index\n\
         - char_start and char_end are character offsets inside that sentence\n\
         - score is 0-100, higher is better\n\
         - return an empty issues array if nothing qualifies\n\n\
         Output JSON:\n{schema}",
        focus = evaluator_focus(kind),
        summary = summary.unwrap_or("not provided"),
        persona = persona_block(persona),
        sentences = render_sentences(sentences),
        schema = schema,
    );

    vec![
        ChatMessage::system(JSON_ONLY_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

/// Messages for deriving a reader persona from the request context.
pub fn reader_persona_messages(context: Option<&JsonValue>, excerpt: &str) -> Vec<ChatMessage> {
    let context = context
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    let prompt = format!(
        "Derive the most likely target reader for this manuscript.\n\n\
         [Author context]\n{context}\n\n\
         [Opening of the manuscript]\n{excerpt}\n\n\
         Output JSON:\n\
         {{\"persona\": {{\"name\": \"...\", \"role\": \"...\", \"knowledge_level\": \"beginner | intermediate | expert\", \"expectations\": [\"...\"]}}}}"
    );
    vec![
        ChatMessage::system(JSON_ONLY_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

/// Messages for the persona's first-read confusion report.
pub fn persona_feedback_messages(
    persona: Option<&ReaderPersona>,
    sentences: &[&str],
) -> Vec<ChatMessage> {
    let prompt = format!(
        "{persona}\n\
         Read the manuscript as this reader. Report where you got lost and what \
         background you were missing. Do not judge quality.\n\n\
         [Sentences: JSON array, the position is sentence_index]\n{sentences}\n\n\
         Output JSON:\n\
         {{\"persona_feedback\": {{\"confusions\": [{{\"sentence_index\": 0, \"description\": \"...\"}}], \
         \"missing_context\": [\"...\"], \"questions_to_author\": [\"...\"]}}}}",
        persona = persona_block(persona),
        sentences = render_sentences(sentences),
    );
    vec![
        ChatMessage::system(JSON_ONLY_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

fn issue_digest(issues: &[RawIssue]) -> String {
    let digest: Vec<JsonValue> = issues
        .iter()
        .map(|issue| {
            serde_json::json!({
                "issue_type": issue.issue_type,
                "quote": issue.quote,
                "reason": issue.reason,
            })
        })
        .collect();
    JsonValue::Array(digest).to_string()
}

/// Messages for the rewrite guide. The model never sees the decision logic,
/// only its result.
pub fn rewrite_messages(
    aggregate: &AggregateResult,
    issues: &[(EvaluatorKind, &[RawIssue])],
) -> Vec<ChatMessage> {
    let listed: Vec<String> = issues
        .iter()
        .map(|(kind, list)| format!("- {}: {}", kind, issue_digest(list)))
        .collect();

    let prompt = format!(
        "Write a rewrite guide for the author.\n\
         Never write replacement sentences. No scores or grades. Explain what to fix and why.\n\n\
         Decision: {decision:?}\nPrimary issue: {primary}\nSummary: {summary}\n\
         reader_confusion_detected: {confusion}\nreader_context_gap: {gap}\n\n\
         Priority: hate > trauma > logic > tone > cliche\n\n\
         Issues:\n{listed}\n\n\
         Output JSON:\n\
         {{\"rewrite_type\": \"assist\", \"priority\": \"...\", \
         \"guidelines\": [{{\"category\": \"...\", \"reason\": \"...\", \"focus\": \"...\"}}], \"note\": \"...\"}}",
        decision = aggregate.decision,
        primary = aggregate
            .primary_issue
            .map(|p| p.as_str())
            .unwrap_or("none"),
        summary = aggregate.summary,
        confusion = aggregate.reader_confusion_detected,
        gap = aggregate.reader_context_gap,
        listed = listed.join("\n"),
    );
    vec![
        ChatMessage::system(JSON_ONLY_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

/// Messages for the final reader-facing report.
pub fn report_messages(
    aggregate: &AggregateResult,
    feedback: Option<&PersonaFeedback>,
    guidelines: Option<&JsonValue>,
) -> Vec<ChatMessage> {
    let prompt = format!(
        "Write the final review report for the author.\n\
         Stay factual and grounded in the findings below; do not invent new issues.\n\n\
         [Aggregate]\n{aggregate}\n\n\
         [Reader feedback]\n{feedback}\n\n\
         [Rewrite guide]\n{guidelines}\n\n\
         Output JSON:\n\
         {{\"headline\": \"...\", \"strengths\": [\"...\"], \"concerns\": [\"...\"], \"next_steps\": [\"...\"]}}",
        aggregate = serde_json::to_string(aggregate).unwrap_or_default(),
        feedback = feedback
            .and_then(|f| serde_json::to_string(f).ok())
            .unwrap_or_else(|| "none".to_string()),
        guidelines = guidelines
            .map(|g| g.to_string())
            .unwrap_or_else(|| "none (decision was pass)".to_string()),
    );
    vec![
        ChatMessage::system(JSON_ONLY_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}
