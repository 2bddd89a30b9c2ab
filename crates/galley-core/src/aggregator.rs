//! Aggregator: combines per-category issue lists into one decision.
//!
//! The aggregator applies a fixed, non-configurable policy:
//! 1. `problem_types` lists every category with at least one issue, in the
//!    priority order `hate > trauma > logic > tone > cliche`
//! 2. `primary_issue` is the first of those categories
//! 3. `decision` is `rewrite` if any non-cliché category has issues, else `pass`
//!
//! Persona signals and spelling findings are informational only. The
//! aggregator never consults time, randomness or the network.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::issue::RawIssue;
use crate::state::EvaluatorOutput;
use crate::types::{Decision, EvaluatorKind, PersonaFeedback, ProblemType, ReaderPersona};

/// The outcome of aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub decision: Decision,

    /// Categories with issues, in priority order
    pub problem_types: Vec<ProblemType>,

    pub primary_issue: Option<ProblemType>,

    /// Human-readable basis for each category and signal
    pub rationale: BTreeMap<String, String>,

    #[serde(default)]
    pub reader_confusion_detected: bool,

    #[serde(default)]
    pub reader_context_gap: bool,

    #[serde(default)]
    pub summary: String,
}

/// Borrowed issue lists, one per aggregation input.
///
/// An absent list is an empty list.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueLists<'a> {
    pub hate: &'a [RawIssue],
    pub trauma: &'a [RawIssue],
    pub logic: &'a [RawIssue],
    pub tone: &'a [RawIssue],
    pub cliche: &'a [RawIssue],
    pub spelling: &'a [RawIssue],
}

impl<'a> IssueLists<'a> {
    /// Borrow the issue lists out of evaluator outputs.
    pub fn from_outputs(outputs: &'a BTreeMap<EvaluatorKind, EvaluatorOutput>) -> Self {
        let issues = |kind: EvaluatorKind| -> &'a [RawIssue] {
            outputs
                .get(&kind)
                .map(|output| output.issues.as_slice())
                .unwrap_or(&[])
        };

        Self {
            hate: issues(EvaluatorKind::HateBias),
            trauma: issues(EvaluatorKind::Trauma),
            logic: issues(EvaluatorKind::Logic),
            tone: issues(EvaluatorKind::Tone),
            cliche: issues(EvaluatorKind::GenreCliche),
            spelling: issues(EvaluatorKind::Spelling),
        }
    }

    pub fn get(&self, problem: ProblemType) -> &'a [RawIssue] {
        match problem {
            ProblemType::Hate => self.hate,
            ProblemType::Trauma => self.trauma,
            ProblemType::Logic => self.logic,
            ProblemType::Tone => self.tone,
            ProblemType::Cliche => self.cliche,
        }
    }
}

/// The Aggregator turns issue lists into an [`AggregateResult`].
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate issue lists into a decision.
    ///
    /// # Arguments
    ///
    /// * `lists` - Issue lists per category
    /// * `feedback` - Weak signals from the reader persona, if any
    /// * `persona` - The reader persona the evaluators assumed, if any
    pub fn aggregate(
        &self,
        lists: &IssueLists<'_>,
        feedback: Option<&PersonaFeedback>,
        persona: Option<&ReaderPersona>,
    ) -> AggregateResult {
        let mut rationale = BTreeMap::new();
        let mut problem_types = Vec::new();

        for problem in ProblemType::PRIORITY {
            let count = lists.get(problem).len();
            if count > 0 {
                problem_types.push(problem);
            }
            rationale.insert(problem.as_str().to_string(), category_rationale(problem, count));
        }

        let (reader_confusion_detected, reader_context_gap) =
            self.persona_signals(feedback, &mut rationale);

        rationale.insert("logic_basis".to_string(), logic_basis(persona));

        let primary_issue = problem_types.first().copied();
        let decision = if problem_types.iter().any(|p| p.forces_rewrite()) {
            Decision::Rewrite
        } else {
            Decision::Pass
        };
        let summary = build_summary(decision, primary_issue, &problem_types);

        tracing::debug!(
            decision = ?decision,
            primary = ?primary_issue,
            spelling = lists.spelling.len(),
            "Aggregated issues"
        );

        AggregateResult {
            decision,
            problem_types,
            primary_issue,
            rationale,
            reader_confusion_detected,
            reader_context_gap,
            summary,
        }
    }

    /// Record persona counts and return the (confusion, context gap) flags.
    fn persona_signals(
        &self,
        feedback: Option<&PersonaFeedback>,
        rationale: &mut BTreeMap<String, String>,
    ) -> (bool, bool) {
        let Some(feedback) = feedback else {
            return (false, false);
        };

        let confusions = feedback.confusions.len();
        if confusions > 0 {
            rationale.insert(
                "persona_confusion".to_string(),
                format!("{} confusion(s) detected from reader persona", confusions),
            );
        }

        let gaps = feedback.missing_context.len();
        if gaps > 0 {
            rationale.insert(
                "persona_context_gap".to_string(),
                format!("{} missing context point(s) detected", gaps),
            );
        }

        (confusions > 0, gaps > 0)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn category_rationale(problem: ProblemType, count: usize) -> String {
    match (problem, count) {
        (_, 0) => "no issue".to_string(),
        (ProblemType::Cliche, n) => format!("{} cliché pattern(s) detected (reference only)", n),
        (_, n) => format!("{} issue(s) detected", n),
    }
}

fn logic_basis(persona: Option<&ReaderPersona>) -> String {
    match persona
        .and_then(|p| p.knowledge_level.as_deref())
        .filter(|level| !level.trim().is_empty())
    {
        Some(level) => format!("logic evaluation performed based on {} reader level", level),
        None => "logic evaluation performed based on default reader level".to_string(),
    }
}

fn build_summary(
    decision: Decision,
    primary_issue: Option<ProblemType>,
    problem_types: &[ProblemType],
) -> String {
    match (decision, primary_issue) {
        (Decision::Rewrite, Some(primary)) => {
            let types: Vec<&str> = problem_types.iter().map(|p| p.as_str()).collect();
            format!(
                "Rewrite recommended: primary issue is {}; problem types: {}.",
                primary,
                types.join(", ")
            )
        }
        _ => "No major issues found. The manuscript can proceed as is (pass).".to_string(),
    }
}
