//! # galley-core
//!
//! Deterministic core of the Galley manuscript review engine.
//!
//! This crate owns everything that does not talk to a model:
//! - Splitting a manuscript into an addressable sentence table
//! - Folding drifting evaluator payloads into one issue shape
//! - Anchoring evaluator evidence onto verified document spans
//! - Deciding between `pass` and `rewrite`
//! - The per-run state and its merge policy
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No LLM calls**: Evaluator logic lives outside this crate
//! 3. **Character offsets**: Every span counts characters, not bytes
//! 4. **Never mislocated**: Evidence that cannot be anchored is dropped
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use galley_core::{assess, Decision, EvaluatorKind, EvaluatorOutput, RawIssue};
//!
//! let mut outputs = BTreeMap::new();
//! outputs.insert(
//!     EvaluatorKind::Tone,
//!     EvaluatorOutput {
//!         issues: vec![RawIssue { quote: "shouted".into(), ..Default::default() }],
//!         ..Default::default()
//!     },
//! );
//!
//! let assessment = assess("She whispered. He shouted.", &outputs, None, None);
//! assert_eq!(assessment.aggregate.decision, Decision::Rewrite);
//! assert_eq!(assessment.evidence.highlights[0].doc_start, 18);
//! ```

pub mod aggregator;
pub mod evidence;
pub mod issue;
pub mod segmenter;
pub mod state;
pub mod text;
pub mod types;

// Re-export main types at crate root
pub use aggregator::{AggregateResult, Aggregator, IssueLists};
pub use evidence::{
    normalize_issues, DocSpan, EvidenceLocator, Highlight, IssueLocation, NormalizedEvidence,
    NormalizedIssue, Resolution,
};
pub use issue::RawIssue;
pub use segmenter::segment;
pub use state::{
    EvaluatorOutput, EvaluatorScore, LogEntry, LogLevel, MergeStrategy, QaScores, ReviewState,
    StateKey, StatePatch,
};
pub use types::{
    Decision, EvaluatorKind, PersonaFeedback, ProblemType, ReaderPersona, Sentence, Severity,
    UnknownEvaluator,
};

use std::collections::BTreeMap;

/// Everything the deterministic stages derive from one manuscript.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub sentences: Vec<Sentence>,
    pub evidence: NormalizedEvidence,
    pub aggregate: AggregateResult,
}

/// Segment, anchor and aggregate in one call.
///
/// # Arguments
///
/// * `text` - The manuscript
/// * `outputs` - Evaluator outputs with sentence hints in global coordinates
/// * `feedback` - Optional reader persona signals
/// * `persona` - Optional reader persona the evaluators assumed
pub fn assess(
    text: &str,
    outputs: &BTreeMap<EvaluatorKind, EvaluatorOutput>,
    feedback: Option<&PersonaFeedback>,
    persona: Option<&ReaderPersona>,
) -> Assessment {
    let sentences = segment(text);
    let locator = EvidenceLocator::from_sentences(&sentences);
    let evidence = normalize_issues(outputs, &locator);
    let aggregate = Aggregator::new().aggregate(&IssueLists::from_outputs(outputs), feedback, persona);

    Assessment {
        sentences,
        evidence,
        aggregate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assess_cliche_only() {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            EvaluatorKind::GenreCliche,
            EvaluatorOutput {
                issues: vec![RawIssue {
                    quote: "dark and stormy night".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let assessment = assess("It was a dark and stormy night.", &outputs, None, None);

        assert_eq!(assessment.aggregate.decision, Decision::Pass);
        assert_eq!(assessment.aggregate.primary_issue, Some(ProblemType::Cliche));
        assert_eq!(assessment.evidence.issues[0].severity, Severity::Low);
        assert_eq!(assessment.evidence.highlights[0].doc_start, 9);
    }

    #[test]
    fn test_assess_empty_text() {
        let assessment = assess("   ", &BTreeMap::new(), None, None);
        assert!(assessment.sentences.is_empty());
        assert!(assessment.evidence.is_empty());
        assert_eq!(assessment.aggregate.decision, Decision::Pass);
    }
}
