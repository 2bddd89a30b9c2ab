//! Chunk planning and merging for long manuscripts.

use std::ops::Range;
use std::time::Duration;

use galley_core::EvaluatorOutput;

use crate::config::ChunkingConfig;

/// Contiguous sentence ranges, one per provider call.
///
/// At or below the threshold the whole table is one chunk.
pub fn plan_chunks(sentence_count: usize, config: &ChunkingConfig) -> Vec<Range<usize>> {
    if sentence_count == 0 {
        return Vec::new();
    }
    if sentence_count <= config.chunk_threshold {
        return vec![0..sentence_count];
    }

    let size = config.chunk_size.max(1);
    (0..sentence_count)
        .step_by(size)
        .map(|start| start..(start + size).min(sentence_count))
        .collect()
}

/// How long an evaluator's chunks may run before the stragglers are cut.
///
/// A tenth of the evaluator timeout is kept back, so the chunks that did
/// finish are merged before the node itself times out.
pub fn chunk_deadline(evaluator_timeout: Duration) -> Duration {
    evaluator_timeout.saturating_sub(evaluator_timeout / 10)
}

/// One chunk's output, with hints still relative to `start`.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub start: usize,

    /// Exclusive end of the chunk's sentence range
    pub end: usize,
    pub output: EvaluatorOutput,
}

/// Fold chunk outputs into one evaluator output.
///
/// Hints are shifted into global coordinates and issues are stable-sorted
/// by sentence (unplaced issues last), so the result does not depend on
/// completion order. A hint pointing outside its chunk is dropped rather
/// than shifted onto a neighbouring chunk's sentence. Degraded chunks contribute nothing but a count; if
/// every chunk degraded, the whole output is degraded.
pub fn merge_chunks(mut results: Vec<ChunkResult>) -> EvaluatorOutput {
    results.sort_by_key(|r| r.start);
    let total = results.len();

    let mut merged = EvaluatorOutput::default();
    let mut notes = Vec::new();
    let mut scores = Vec::new();
    let mut curve = Vec::new();
    let mut first_error = None;

    for ChunkResult { start, end, output } in results {
        if let Some(error) = output.error {
            merged.chunks_failed += 1;
            first_error.get_or_insert(error);
            continue;
        }

        let len = end.saturating_sub(start);
        merged.issues.extend(output.issues.into_iter().map(|mut issue| {
            if issue.sentence_index_hint.is_some_and(|local| local >= len) {
                issue.sentence_index_hint = None;
            }
            issue.offset_sentence_hint(start);
            issue
        }));
        if let Some(note) = output.note {
            notes.push(note);
        }
        if let Some(score) = output.score {
            scores.push(f64::from(score));
        }
        if let Some(points) = output
            .details
            .as_ref()
            .and_then(|d| d.get("curve"))
            .and_then(|c| c.as_array())
        {
            curve.extend(points.iter().cloned());
        }
    }

    if total > 0 && merged.chunks_failed == total {
        let error = first_error.unwrap_or_default();
        let mut degraded = EvaluatorOutput::degraded(if total == 1 {
            error
        } else {
            format!("all {} chunks failed: {}", total, error)
        });
        degraded.chunks_failed = total;
        return degraded;
    }

    merged
        .issues
        .sort_by_key(|issue| (issue.sentence_index_hint.is_none(), issue.sentence_index_hint));

    if merged.chunks_failed > 0 {
        notes.push(format!(
            "{} of {} chunks failed and were excluded",
            merged.chunks_failed, total
        ));
    }
    if !notes.is_empty() {
        merged.note = Some(notes.join("\n"));
    }
    if !scores.is_empty() {
        merged.score = Some((scores.iter().sum::<f64>() / scores.len() as f64).round() as u8);
    }
    if !curve.is_empty() {
        merged.details = Some(serde_json::json!({ "curve": curve }));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use galley_core::RawIssue;
    use proptest::prelude::*;

    fn config(threshold: usize, size: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_threshold: threshold,
            chunk_size: size,
            chunk_concurrency: 4,
        }
    }

    fn issue(hint: Option<usize>, quote: &str) -> RawIssue {
        RawIssue {
            quote: quote.to_string(),
            sentence_index_hint: hint,
            ..Default::default()
        }
    }

    fn chunk(start: usize, issues: Vec<RawIssue>) -> ChunkResult {
        ChunkResult {
            start,
            end: start + 50,
            output: EvaluatorOutput {
                issues,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_plan_below_threshold() {
        assert_eq!(plan_chunks(50, &config(50, 50)), vec![0..50]);
        assert!(plan_chunks(0, &config(50, 50)).is_empty());
    }

    #[test]
    fn test_plan_above_threshold() {
        assert_eq!(plan_chunks(120, &config(50, 50)), vec![0..50, 50..100, 100..120]);
    }

    #[test]
    fn test_merge_remaps_and_sorts() {
        // Completion order is arbitrary; the third chunk lands first.
        let merged = merge_chunks(vec![
            chunk(100, vec![issue(Some(5), "late")]),
            chunk(0, vec![issue(None, "floating"), issue(Some(7), "early")]),
            chunk(50, vec![issue(Some(0), "middle")]),
        ]);

        let hints: Vec<Option<usize>> = merged.issues.iter().map(|i| i.sentence_index_hint).collect();
        assert_eq!(hints, vec![Some(7), Some(50), Some(105), None]);
        assert_eq!(merged.chunks_failed, 0);
        assert!(!merged.is_degraded());
    }

    #[test]
    fn test_failed_chunk_excluded() {
        let merged = merge_chunks(vec![
            chunk(0, vec![issue(Some(1), "kept")]),
            ChunkResult {
                start: 50,
                end: 100,
                output: EvaluatorOutput::degraded("timeout"),
            },
        ]);

        assert_eq!(merged.issues.len(), 1);
        assert_eq!(merged.chunks_failed, 1);
        assert!(!merged.is_degraded());
        assert!(merged.note.unwrap().contains("1 of 2 chunks failed"));
    }

    #[test]
    fn test_all_chunks_failed_degrades() {
        let merged = merge_chunks(vec![
            ChunkResult {
                start: 0,
                end: 50,
                output: EvaluatorOutput::degraded("circuit open for tone"),
            },
            ChunkResult {
                start: 50,
                end: 100,
                output: EvaluatorOutput::degraded("circuit open for tone"),
            },
        ]);

        assert!(merged.is_degraded());
        assert!(merged.issues.is_empty());
        assert_eq!(merged.chunks_failed, 2);
        assert!(merged.error.unwrap().starts_with("all 2 chunks failed"));
    }

    #[test]
    fn test_out_of_chunk_hints_dropped() {
        let reply = r#"{"issues": [
            {"quote": "huge", "sentence_index": 18446744073709551615},
            {"quote": "past the end", "sentence_index": 50},
            {"quote": "last", "sentence_index": 49}
        ]}"#;
        let output = crate::evaluators::parse_evaluator_response(reply).unwrap();

        let merged = merge_chunks(vec![ChunkResult {
            start: 50,
            end: 100,
            output,
        }]);

        let hints: Vec<(&str, Option<usize>)> = merged
            .issues
            .iter()
            .map(|i| (i.quote.as_str(), i.sentence_index_hint))
            .collect();
        assert_eq!(
            hints,
            vec![("last", Some(99)), ("huge", None), ("past the end", None)]
        );
    }

    #[test]
    fn test_chunk_deadline_leaves_headroom() {
        assert_eq!(chunk_deadline(Duration::from_secs(300)), Duration::from_secs(270));
        assert_eq!(chunk_deadline(Duration::from_secs(5)), Duration::from_millis(4500));
        assert_eq!(chunk_deadline(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_scores_and_curves_combined() {
        let mut first = chunk(0, vec![]);
        first.output.score = Some(80);
        first.output.details = Some(serde_json::json!({"curve": [{"tension": "increase"}]}));
        let mut second = chunk(50, vec![]);
        second.output.score = Some(61);
        second.output.details = Some(serde_json::json!({"curve": [{"tension": "decrease"}]}));

        let merged = merge_chunks(vec![second, first]);
        assert_eq!(merged.score, Some(71));
        let curve = &merged.details.unwrap()["curve"];
        assert_eq!(curve[0]["tension"], "increase");
        assert_eq!(curve[1]["tension"], "decrease");
    }

    proptest! {
        #[test]
        fn plan_covers_every_sentence_once(
            count in 0usize..400,
            threshold in 0usize..80,
            size in 1usize..80,
        ) {
            let chunks = plan_chunks(count, &config(threshold, size));

            let mut next = 0;
            for range in &chunks {
                prop_assert_eq!(range.start, next);
                prop_assert!(range.end > range.start);
                if count > threshold {
                    prop_assert!(range.len() <= size);
                }
                next = range.end;
            }
            prop_assert_eq!(next, count);
        }
    }
}
