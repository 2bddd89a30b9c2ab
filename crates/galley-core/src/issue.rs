//! Raw evaluator issues.
//!
//! Evaluators describe the same thing in drifting shapes: the location may
//! be an object, a bare number or prose; indices arrive as integers, floats
//! or digit strings; the quote may be called `quote`, `original` or
//! `evidence`. Everything is folded into one canonical [`RawIssue`] here, so
//! the aggregator and the evidence locator only ever see one shape.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::Severity;

/// A canonical, still untrusted issue reported by an evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawIssue {
    pub issue_type: Option<String>,
    pub severity: Option<Severity>,

    /// Text the evaluator claims to quote from the manuscript
    #[serde(default)]
    pub quote: String,

    pub sentence_index_hint: Option<usize>,
    pub char_start_hint: Option<usize>,
    pub char_end_hint: Option<usize>,
    pub confidence: Option<f64>,

    #[serde(default)]
    pub reason: String,

    pub suggestion: Option<String>,

    /// Free-form location prose ("second paragraph"), kept for reports
    pub location_text: Option<String>,
}

impl RawIssue {
    /// Parse one issue object. Non-objects yield `None`.
    pub fn from_value(value: &JsonValue) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let wire: WireIssue = serde_json::from_value(value.clone()).ok()?;
        Some(wire.into_raw())
    }

    /// Parse every object in a JSON array, skipping anything else.
    pub fn from_values(values: &[JsonValue]) -> Vec<Self> {
        values.iter().filter_map(Self::from_value).collect()
    }

    /// Shift the sentence hint by a chunk's start offset.
    ///
    /// A hint that would overflow is dropped; the locator falls back to
    /// searching for the quote.
    pub fn offset_sentence_hint(&mut self, offset: usize) {
        self.sentence_index_hint = self
            .sentence_index_hint
            .and_then(|index| index.checked_add(offset));
    }
}

/// A scalar whose type the evaluator may have gotten wrong.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(i64),
    Float(f64),
    Text(String),
    Other(JsonValue),
}

impl Loose {
    fn as_index(&self) -> Option<usize> {
        match self {
            Loose::Int(i) => usize::try_from(*i).ok(),
            Loose::Float(f) if f.fract() == 0.0 && *f >= 0.0 => Some(*f as usize),
            Loose::Text(s) => {
                let s = s.trim();
                if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                    s.parse().ok()
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Loose::Int(i) => Some(*i as f64),
            Loose::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        let text = match self {
            Loose::Text(s) => s.clone(),
            Loose::Int(i) => i.to_string(),
            Loose::Float(f) => f.to_string(),
            Loose::Other(JsonValue::Null) => return None,
            Loose::Other(JsonValue::Bool(false)) => return None,
            Loose::Other(v) => v.to_string(),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct WireSpan {
    sentence_index: Option<Loose>,
    char_start: Option<Loose>,
    char_end: Option<Loose>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireLocation {
    Structured(WireSpan),
    Index(i64),
    Other(JsonValue),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireIssue {
    issue_type: Option<Loose>,
    #[serde(rename = "type")]
    type_: Option<Loose>,
    error_type: Option<Loose>,
    trigger_type: Option<Loose>,
    bias_type: Option<Loose>,
    issue: Option<Loose>,

    severity: Option<Loose>,

    quote: Option<Loose>,
    original: Option<Loose>,
    evidence: Option<Loose>,

    reason: Option<Loose>,
    description: Option<Loose>,
    problem: Option<Loose>,
    reader_impact: Option<Loose>,
    pattern: Option<Loose>,

    suggestion: Option<Loose>,
    confidence: Option<Loose>,

    sentence_index: Option<Loose>,
    char_start: Option<Loose>,
    char_end: Option<Loose>,
    location: Option<WireLocation>,
}

/// First alias that carries usable text.
fn first_text(candidates: &[&Option<Loose>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|candidate| match candidate {
            Some(loose) => loose.as_text(),
            None => None,
        })
        .next()
}

fn index_of(field: &Option<Loose>) -> Option<usize> {
    field.as_ref().and_then(Loose::as_index)
}

impl WireIssue {
    fn into_raw(self) -> RawIssue {
        let issue_type = first_text(&[
            &self.issue_type,
            &self.type_,
            &self.error_type,
            &self.trigger_type,
            &self.bias_type,
            &self.issue,
        ]);
        let quote = first_text(&[&self.quote, &self.original, &self.evidence]).unwrap_or_default();
        let reason = first_text(&[
            &self.reason,
            &self.description,
            &self.problem,
            &self.reader_impact,
            &self.pattern,
        ])
        .unwrap_or_default();

        let severity = self
            .severity
            .as_ref()
            .and_then(Loose::as_text)
            .and_then(|s| Severity::parse_lenient(&s));

        // A structured location wins over the top-level fields.
        let (mut sentence, mut start, mut end, mut location_text) = (None, None, None, None);
        match &self.location {
            Some(WireLocation::Structured(span)) => {
                sentence = index_of(&span.sentence_index);
                start = index_of(&span.char_start);
                end = index_of(&span.char_end);
            }
            Some(WireLocation::Index(i)) => sentence = usize::try_from(*i).ok(),
            Some(WireLocation::Other(JsonValue::String(s))) if !s.trim().is_empty() => {
                location_text = Some(s.clone());
            }
            _ => {}
        }

        RawIssue {
            issue_type,
            severity,
            quote,
            sentence_index_hint: sentence.or_else(|| index_of(&self.sentence_index)),
            char_start_hint: start.or_else(|| index_of(&self.char_start)),
            char_end_hint: end.or_else(|| index_of(&self.char_end)),
            confidence: self.confidence.as_ref().and_then(Loose::as_number),
            reason,
            suggestion: self.suggestion.as_ref().and_then(Loose::as_text),
            location_text,
        }
    }
}
