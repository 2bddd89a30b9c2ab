//! Defensive parsing of evaluator replies.
//!
//! Models wrap JSON in prose or code fences, drift field types and forget
//! keys. The reply goes through three gates: pull out the outermost `{...}`
//! block, check the envelope against the embedded schema, then fold each
//! issue leniently into a [`RawIssue`]. Only the first two gates can fail.

use std::sync::OnceLock;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use thiserror::Error;

use galley_core::{EvaluatorOutput, RawIssue};

const ENVELOPE_SCHEMA_JSON: &str =
    include_str!("../../../../schema/evaluator_response.schema.json");

static ENVELOPE_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

lazy_static! {
    static ref JSON_BLOCK: Regex = Regex::new(r"\{[\s\S]*\}").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("response did not contain a JSON block")]
    NoJsonBlock,

    #[error("JSON decode failed: {0}")]
    InvalidJson(String),

    #[error("unexpected response shape: {}", .0.join("; "))]
    Envelope(Vec<String>),

    #[error("envelope schema unavailable: {0}")]
    Schema(String),
}

fn envelope_validator() -> Result<&'static jsonschema::Validator, ParseError> {
    let compiled = ENVELOPE_SCHEMA.get_or_init(|| {
        let schema: JsonValue = serde_json::from_str(ENVELOPE_SCHEMA_JSON)
            .map_err(|e| format!("invalid schema JSON: {}", e))?;
        jsonschema::options()
            .build(&schema)
            .map_err(|e| format!("failed to compile schema: {}", e))
    });

    compiled
        .as_ref()
        .map_err(|e| ParseError::Schema(e.clone()))
}

/// Extract and decode the outermost `{...}` block of `text`.
pub fn extract_json_object(text: &str) -> Result<JsonValue, ParseError> {
    let block = JSON_BLOCK
        .find(text)
        .ok_or(ParseError::NoJsonBlock)?
        .as_str();
    serde_json::from_str(block).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

fn validate_envelope(value: &JsonValue) -> Result<(), ParseError> {
    let errors: Vec<String> = envelope_validator()?
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ParseError::Envelope(errors))
    }
}

fn parse_score(value: Option<&JsonValue>) -> Option<u8> {
    let score = match value? {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if score.is_finite() {
        Some(score.clamp(0.0, 100.0).round() as u8)
    } else {
        None
    }
}

fn issue_array(envelope: &JsonValue, key: &str) -> Vec<RawIssue> {
    envelope[key]
        .as_array()
        .map(|values| RawIssue::from_values(values))
        .unwrap_or_default()
}

/// Parse one evaluator reply into an output with chunk-local hints.
///
/// Tension `anomalies` are appended after `issues`; a `curve` is kept
/// verbatim under `details`.
pub fn parse_evaluator_response(text: &str) -> Result<EvaluatorOutput, ParseError> {
    let envelope = extract_json_object(text)?;
    validate_envelope(&envelope)?;

    let mut issues = issue_array(&envelope, "issues");
    issues.extend(issue_array(&envelope, "anomalies"));

    let details = envelope
        .get("curve")
        .filter(|curve| !curve.is_null())
        .map(|curve| serde_json::json!({ "curve": curve }));

    Ok(EvaluatorOutput {
        issues,
        note: envelope["note"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        error: None,
        score: parse_score(envelope.get("score")),
        chunks_failed: 0,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let output = parse_evaluator_response(
            r#"{"score": 82, "issues": [{"quote": "bang", "sentence_index": 1}], "note": "ok"}"#,
        )
        .unwrap();
        assert_eq!(output.score, Some(82));
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].sentence_index_hint, Some(1));
        assert_eq!(output.note.as_deref(), Some("ok"));
        assert!(!output.is_degraded());
    }

    #[test]
    fn test_json_wrapped_in_prose_and_fences() {
        let text = "Sure! Here you go:\n```json\n{\"issues\": []}\n```\nAnything else?";
        let output = parse_evaluator_response(text).unwrap();
        assert!(output.issues.is_empty());
        assert_eq!(output.score, None);
    }

    #[test]
    fn test_no_json_block() {
        assert_eq!(
            parse_evaluator_response("I cannot help with that."),
            Err(ParseError::NoJsonBlock)
        );
    }

    #[test]
    fn test_broken_json() {
        let err = parse_evaluator_response(r#"{"issues": [ {"quote": "x" ]}"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn test_envelope_rejects_non_array_issues() {
        let err = parse_evaluator_response(r#"{"issues": "none"}"#).unwrap_err();
        assert!(matches!(err, ParseError::Envelope(_)));
    }

    #[test]
    fn test_tension_anomalies_folded_in() {
        let text = r#"{
            "curve": [{"stage": "opening", "tension": "increase"}],
            "issues": [{"issue_type": "stagnation", "quote": "waited", "sentence_index": "2"}],
            "anomalies": [{"location": "middle", "issue": "tension_drop", "description": "flat"}]
        }"#;
        let output = parse_evaluator_response(text).unwrap();

        assert_eq!(output.issues.len(), 2);
        assert_eq!(output.issues[0].sentence_index_hint, Some(2));
        assert_eq!(output.issues[1].issue_type.as_deref(), Some("tension_drop"));
        assert_eq!(output.issues[1].reason, "flat");
        assert_eq!(output.issues[1].location_text.as_deref(), Some("middle"));
        assert_eq!(
            output.details.unwrap()["curve"][0]["tension"],
            "increase"
        );
    }

    #[test]
    fn test_score_coercion() {
        assert_eq!(parse_score(Some(&serde_json::json!("77"))), Some(77));
        assert_eq!(parse_score(Some(&serde_json::json!(140))), Some(100));
        assert_eq!(parse_score(Some(&serde_json::json!(-3))), Some(0));
        assert_eq!(parse_score(Some(&serde_json::json!(null))), None);
    }
}
