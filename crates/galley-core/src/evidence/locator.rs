//! Anchor-then-refine location of raw issues.

use serde::{Deserialize, Serialize};

use super::IssueLocation;
use crate::issue::RawIssue;
use crate::text::{char_len, char_occurrences, char_slice};
use crate::types::Sentence;

/// How far (in characters) around a start hint duplicate quotes are searched.
pub const HINT_WINDOW_MARGIN: usize = 8;

/// Document span of one sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocSpan {
    pub doc_start: usize,
    pub doc_end: usize,
}

/// Outcome of locating one raw issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Sentence and character range verified against the text.
    Anchored(IssueLocation),

    /// A sentence was chosen but it has no usable document span.
    Unanchored { sentence_index: usize },

    /// No sentence could be resolved; the issue must be dropped.
    Unlocatable,
}

/// Remove markdown emphasis evaluators like to wrap quotes in.
pub fn strip_markup(quote: &str) -> String {
    quote
        .replace("**", "")
        .replace("__", "")
        .replace('`', "")
        .trim()
        .to_string()
}

/// Locates raw issues inside a sentence table.
///
/// The offset table may be shorter than the sentence table; sentences
/// without an entry resolve to [`Resolution::Unanchored`].
#[derive(Debug, Clone, Default)]
pub struct EvidenceLocator {
    sentences: Vec<String>,
    offsets: Vec<DocSpan>,
}

impl EvidenceLocator {
    pub fn new(sentences: Vec<String>, offsets: Vec<DocSpan>) -> Self {
        Self { sentences, offsets }
    }

    /// Build a locator from segmenter output.
    pub fn from_sentences(sentences: &[Sentence]) -> Self {
        Self {
            sentences: sentences.iter().map(|s| s.text.clone()).collect(),
            offsets: sentences
                .iter()
                .map(|s| DocSpan {
                    doc_start: s.doc_start,
                    doc_end: s.doc_end,
                })
                .collect(),
        }
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    pub fn sentence(&self, index: usize) -> Option<&str> {
        self.sentences.get(index).map(String::as_str)
    }

    /// Anchor a raw issue to a verified span.
    pub fn locate(&self, issue: &RawIssue) -> Resolution {
        let quote = issue.quote.trim();
        let stripped = strip_markup(quote);

        let Some(mut index) = self.resolve_sentence(issue.sentence_index_hint, quote, &stripped)
        else {
            return Resolution::Unlocatable;
        };

        // A hint pointing at a sentence without the quote is corrected to the
        // nearest sentence that has it.
        if !quote.is_empty() && !self.contains(index, quote, &stripped) {
            if let Some(closest) = self.closest_containing(index, quote, &stripped) {
                tracing::debug!(from = index, to = closest, "Corrected sentence hint");
                index = closest;
            }
        }

        let sentence = self.sentences[index].as_str();
        let effective = if !quote.is_empty() && sentence.contains(quote) {
            Some(quote)
        } else if !stripped.is_empty() && sentence.contains(stripped.as_str()) {
            Some(stripped.as_str())
        } else {
            None
        };

        let (char_start, char_end) = resolve_range(
            sentence,
            quote,
            effective,
            issue.char_start_hint,
            issue.char_end_hint,
        );

        let Some(span) = self.offsets.get(index) else {
            return Resolution::Unanchored {
                sentence_index: index,
            };
        };
        let doc_start = span.doc_start + char_start;
        let doc_end = span.doc_start + char_end;
        if doc_end <= doc_start || doc_end > span.doc_end {
            return Resolution::Unanchored {
                sentence_index: index,
            };
        }

        Resolution::Anchored(IssueLocation {
            sentence_index: index,
            char_start,
            char_end,
            doc_start,
            doc_end,
        })
    }

    fn resolve_sentence(&self, hint: Option<usize>, quote: &str, stripped: &str) -> Option<usize> {
        if let Some(index) = hint.filter(|i| *i < self.sentences.len()) {
            return Some(index);
        }
        self.first_containing(quote)
            .or_else(|| self.first_containing(stripped))
    }

    fn first_containing(&self, needle: &str) -> Option<usize> {
        if needle.is_empty() {
            return None;
        }
        self.sentences.iter().position(|s| s.contains(needle))
    }

    fn contains(&self, index: usize, quote: &str, stripped: &str) -> bool {
        let sentence = &self.sentences[index];
        sentence.contains(quote) || (!stripped.is_empty() && sentence.contains(stripped))
    }

    /// Sentence containing the quote closest to `anchor`; ties go to the lower index.
    fn closest_containing(&self, anchor: usize, quote: &str, stripped: &str) -> Option<usize> {
        let closest = |needle: &str| {
            self.sentences
                .iter()
                .enumerate()
                .filter(|(_, s)| s.contains(needle))
                .map(|(i, _)| i)
                .min_by_key(|i| (i.abs_diff(anchor), *i))
        };
        closest(quote).or_else(|| {
            if stripped.is_empty() {
                None
            } else {
                closest(stripped)
            }
        })
    }
}

/// Resolve the sentence-relative character range of a quote.
///
/// `effective` is the variant of the quote actually present in the
/// sentence, if any.
fn resolve_range(
    sentence: &str,
    quote: &str,
    effective: Option<&str>,
    start_hint: Option<usize>,
    end_hint: Option<usize>,
) -> (usize, usize) {
    let len = char_len(sentence);

    if let (Some(start), Some(end)) = (start_hint, end_hint) {
        if start < end && end <= len {
            let denoted = char_slice(sentence, start, end);
            if quote.is_empty() || denoted == quote || effective == Some(denoted) {
                return (start, end);
            }
            if let Some(needle) = effective {
                if let Some(offset) = char_occurrences(denoted, needle).first() {
                    let from = start + offset;
                    return (from, from + char_len(needle));
                }
            }
            if !denoted.trim().is_empty() && quote.contains(denoted) {
                return (start, end);
            }
        }
    }

    let Some(needle) = effective else {
        return (0, len);
    };
    let occurrences = char_occurrences(sentence, needle);
    let needle_len = char_len(needle);

    let near_hint = start_hint.and_then(|anchor| {
        occurrences
            .iter()
            .copied()
            .filter(|o| o.abs_diff(anchor) <= HINT_WINDOW_MARGIN)
            .min_by_key(|o| (o.abs_diff(anchor), *o))
    });

    match near_hint.or_else(|| occurrences.first().copied()) {
        Some(start) => (start, start + needle_len),
        None => (0, len),
    }
}
