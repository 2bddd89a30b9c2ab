//! Evidence anchoring.
//!
//! Evaluators point at the manuscript with untrusted hints: a sentence
//! index that may be stale, character offsets that may be off by a few, a
//! quote that may carry markdown. This module turns those hints into
//! verified document spans, and spans into UI highlights.

mod locator;
mod normalizer;

pub use locator::{strip_markup, DocSpan, EvidenceLocator, Resolution, HINT_WINDOW_MARGIN};
pub use normalizer::normalize_issues;

use serde::{Deserialize, Serialize};

use crate::types::Severity;

/// A verified position of a quote in the source text.
///
/// `char_*` are relative to the sentence, `doc_*` to the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLocation {
    pub sentence_index: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub doc_start: usize,
    pub doc_end: usize,
}

/// An evaluator issue after anchoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedIssue {
    /// `{agent}-{NNNN}`, numbered by position in the normalized list
    pub id: String,
    pub agent: String,
    pub issue_type: String,
    pub severity: Severity,
    pub confidence: Option<f64>,

    /// `None` when the sentence is known but has no document offsets
    pub location: Option<IssueLocation>,

    pub quote: String,
    pub reason: String,
    pub suggestion: Option<String>,
}

impl NormalizedIssue {
    /// UI projection of a located issue.
    pub fn highlight(&self) -> Option<Highlight> {
        let location = self.location?;
        let reason = if self.reason.trim().is_empty() {
            self.issue_type.clone()
        } else {
            self.reason.clone()
        };
        Some(Highlight {
            agent: self.agent.clone(),
            severity: self.severity,
            doc_start: location.doc_start,
            doc_end: location.doc_end,
            label: self.issue_type.clone(),
            reason,
        })
    }
}

/// A span to highlight in the rendered manuscript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub agent: String,
    pub severity: Severity,
    pub doc_start: usize,
    pub doc_end: usize,
    pub label: String,
    pub reason: String,
}

/// Normalized issues plus the highlights derived from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvidence {
    pub issues: Vec<NormalizedIssue>,
    pub highlights: Vec<Highlight>,
}

impl NormalizedEvidence {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}
