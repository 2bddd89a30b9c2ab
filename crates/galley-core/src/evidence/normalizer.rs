//! Conversion of evaluator outputs into normalized issues and highlights.

use std::collections::BTreeMap;

use super::{EvidenceLocator, NormalizedEvidence, NormalizedIssue, Resolution};
use crate::issue::RawIssue;
use crate::state::EvaluatorOutput;
use crate::text::char_slice;
use crate::types::EvaluatorKind;

const UNSPECIFIED_TYPE: &str = "unspecified";

/// Normalize every evaluator's issues against the sentence table.
///
/// Outputs are visited in evaluator declaration order, which fixes issue
/// ids. Unlocatable issues are dropped.
pub fn normalize_issues(
    outputs: &BTreeMap<EvaluatorKind, EvaluatorOutput>,
    locator: &EvidenceLocator,
) -> NormalizedEvidence {
    let mut issues: Vec<NormalizedIssue> = Vec::new();
    let mut dropped = 0usize;

    for (kind, output) in outputs {
        for raw in &output.issues {
            match normalize_one(*kind, raw, locator, issues.len()) {
                Some(issue) => issues.push(issue),
                None => dropped += 1,
            }
        }
    }

    if dropped > 0 {
        tracing::debug!(dropped, kept = issues.len(), "Dropped unlocatable issues");
    }

    let highlights = issues.iter().filter_map(NormalizedIssue::highlight).collect();
    NormalizedEvidence { issues, highlights }
}

fn normalize_one(
    kind: EvaluatorKind,
    raw: &RawIssue,
    locator: &EvidenceLocator,
    position: usize,
) -> Option<NormalizedIssue> {
    let location = match locator.locate(raw) {
        Resolution::Unlocatable => return None,
        Resolution::Unanchored { .. } => None,
        Resolution::Anchored(location) => Some(location),
    };

    let mut quote = raw.quote.clone();
    if quote.trim().is_empty() {
        if let Some(location) = location {
            if let Some(sentence) = locator.sentence(location.sentence_index) {
                quote = char_slice(sentence, location.char_start, location.char_end).to_string();
            }
        }
    }

    let agent = kind.agent_label();
    Some(NormalizedIssue {
        id: format!("{}-{:04}", agent, position),
        agent: agent.to_string(),
        issue_type: raw
            .issue_type
            .clone()
            .unwrap_or_else(|| UNSPECIFIED_TYPE.to_string()),
        severity: raw.severity.unwrap_or_else(|| kind.default_severity()),
        confidence: raw.confidence,
        location,
        quote,
        reason: raw.reason.clone(),
        suggestion: raw.suggestion.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::DocSpan;
    use crate::segmenter::segment;
    use crate::types::Severity;

    fn output(issues: Vec<RawIssue>) -> EvaluatorOutput {
        EvaluatorOutput {
            issues,
            ..Default::default()
        }
    }

    fn quoted(quote: &str) -> RawIssue {
        RawIssue {
            quote: quote.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_collection_order_and_ids() {
        let locator = EvidenceLocator::from_sentences(&segment("Dark night. Bright day."));
        let mut outputs = BTreeMap::new();
        outputs.insert(EvaluatorKind::TensionCurve, output(vec![quoted("day")]));
        outputs.insert(EvaluatorKind::Tone, output(vec![quoted("night")]));
        outputs.insert(EvaluatorKind::Trauma, output(vec![quoted("missing"), quoted("Dark")]));

        let evidence = normalize_issues(&outputs, &locator);
        let ids: Vec<&str> = evidence.issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["tone-0000", "trauma-0001", "tension-0002"]);
        assert_eq!(evidence.highlights.len(), 3);
    }

    #[test]
    fn test_defaults_are_filled() {
        let locator = EvidenceLocator::from_sentences(&segment("She froze. Then ran."));
        let mut outputs = BTreeMap::new();
        outputs.insert(
            EvaluatorKind::Trauma,
            output(vec![RawIssue {
                sentence_index_hint: Some(1),
                char_start_hint: Some(5),
                char_end_hint: Some(8),
                ..Default::default()
            }]),
        );

        let evidence = normalize_issues(&outputs, &locator);
        let issue = &evidence.issues[0];
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.issue_type, "unspecified");
        assert_eq!(issue.quote, "ran");

        let highlight = &evidence.highlights[0];
        assert_eq!(highlight.label, "unspecified");
        assert_eq!(highlight.reason, "unspecified");
        assert_eq!((highlight.doc_start, highlight.doc_end), (16, 19));
    }

    #[test]
    fn test_unanchored_issue_kept_without_highlight() {
        let locator = EvidenceLocator::new(vec!["Orphan sentence.".to_string()], Vec::<DocSpan>::new());
        let mut outputs = BTreeMap::new();
        outputs.insert(EvaluatorKind::Logic, output(vec![quoted("Orphan")]));

        let evidence = normalize_issues(&outputs, &locator);
        assert_eq!(evidence.issues.len(), 1);
        assert!(evidence.issues[0].location.is_none());
        assert!(evidence.highlights.is_empty());
    }

    #[test]
    fn test_located_spans_stay_inside_sentence() {
        let text = "Ice cracked. The boat listed. Nobody spoke.";
        let sentences = segment(text);
        let locator = EvidenceLocator::from_sentences(&sentences);
        let mut outputs = BTreeMap::new();
        outputs.insert(
            EvaluatorKind::Tone,
            output(vec![
                quoted("boat"),
                RawIssue {
                    quote: "spoke".to_string(),
                    sentence_index_hint: Some(0),
                    ..Default::default()
                },
            ]),
        );

        for issue in normalize_issues(&outputs, &locator).issues {
            let location = issue.location.unwrap();
            let sentence = &sentences[location.sentence_index];
            assert!(location.doc_start >= sentence.doc_start);
            assert!(location.doc_end <= sentence.doc_end);
            assert!(location.doc_end > location.doc_start);
            assert_eq!(char_slice(text, location.doc_start, location.doc_end), issue.quote);
        }
    }
}
