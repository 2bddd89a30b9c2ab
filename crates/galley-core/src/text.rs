//! Character-offset helpers.
//!
//! Every offset exposed by this crate counts characters, so slicing goes
//! through these helpers instead of raw byte ranges.

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte position of the character at `char_idx`, or `s.len()` past the end.
fn byte_offset(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(s.len())
}

/// Slice `s` by character offsets. Out-of-range offsets are clamped.
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let end = end.max(start);
    let b0 = byte_offset(s, start);
    let b1 = byte_offset(s, end);
    &s[b0..b1]
}

/// Character offsets of every occurrence of `needle` in `haystack`,
/// including overlapping ones, in ascending order.
pub fn char_occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut from = 0;
    let mut chars_before = 0;
    let mut counted_to = 0;

    while let Some(pos) = haystack[from..].find(needle) {
        let byte = from + pos;
        chars_before += haystack[counted_to..byte].chars().count();
        counted_to = byte;
        found.push(chars_before);

        let step = haystack[byte..]
            .chars()
            .next()
            .map(char::len_utf8)
            .unwrap_or(1);
        from = byte + step;
        if from >= haystack.len() {
            break;
        }
    }

    found
}
