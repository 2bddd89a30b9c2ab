//! Sentence segmentation.
//!
//! Splits raw text into an ordered, non-overlapping sentence table. The
//! sentence indices produced here are the addressing substrate every
//! evaluator and the evidence locator anchor to.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::Sentence;

lazy_static! {
    // Lazily consume up to the next terminator: '.', '!', '?', newline or end of text.
    static ref SENTENCE_PATTERN: Regex = Regex::new(r"(?s).*?(?:[.!?]|\n|$)").unwrap();
}

/// Walks a string forward, converting byte positions into character offsets.
struct CharCursor<'a> {
    text: &'a str,
    byte: usize,
    chars: usize,
}

impl<'a> CharCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            byte: 0,
            chars: 0,
        }
    }

    /// Advance to `byte` (must not move backwards) and return its char offset.
    fn advance_to(&mut self, byte: usize) -> usize {
        debug_assert!(byte >= self.byte);
        self.chars += self.text[self.byte..byte].chars().count();
        self.byte = byte;
        self.chars
    }
}

/// Split `text` into sentences.
///
/// Empty or whitespace-only input yields an empty table.
pub fn segment(text: &str) -> Vec<Sentence> {
    let mut sentences: Vec<Sentence> = Vec::new();
    let mut cursor = CharCursor::new(text);

    for m in SENTENCE_PATTERN.find_iter(text) {
        let piece = m.as_str();
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }

        let leading = piece.len() - piece.trim_start().len();
        let start_byte = m.start() + leading;
        let end_byte = start_byte + trimmed.len();

        let doc_start = cursor.advance_to(start_byte);
        let doc_end = cursor.advance_to(end_byte);

        sentences.push(Sentence {
            index: sentences.len(),
            text: trimmed.to_string(),
            doc_start,
            doc_end,
        });
    }

    if sentences.is_empty() {
        if let Some(whole) = whole_text_sentence(text) {
            sentences.push(whole);
        }
    }

    tracing::debug!(sentences = sentences.len(), "Segmented text");
    sentences
}

/// Treat the whole trimmed text as sentence 0.
fn whole_text_sentence(text: &str) -> Option<Sentence> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let leading = text.len() - text.trim_start().len();
    let doc_start = text[..leading].chars().count();
    Some(Sentence {
        index: 0,
        text: trimmed.to_string(),
        doc_start,
        doc_end: doc_start + trimmed.chars().count(),
    })
}
