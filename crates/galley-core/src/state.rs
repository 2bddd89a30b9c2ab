//! Per-run review state and the patches nodes return.
//!
//! Every result slot has exactly one writer and is overwritten by key.
//! `logs` is the only accumulating field: patches append to it, and the
//! executor orders it by node registration once the run finishes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::aggregator::AggregateResult;
use crate::evidence::NormalizedEvidence;
use crate::issue::RawIssue;
use crate::types::{EvaluatorKind, PersonaFeedback, ReaderPersona, Sentence};

/// How a patch value is merged into the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Replace the slot (single writer)
    Overwrite,
    /// Concatenate, preserving order
    Append,
}

/// Addressable slots of [`ReviewState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    Sentences,
    ReaderPersona,
    PersonaFeedback,
    Evaluation(EvaluatorKind),
    Evidence,
    Aggregate,
    RewriteGuidelines,
    FinalReport,
    QaScores,
    Logs,
}

impl StateKey {
    pub fn merge_strategy(self) -> MergeStrategy {
        match self {
            StateKey::Logs => MergeStrategy::Append,
            _ => MergeStrategy::Overwrite,
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Sentences => f.write_str("sentences"),
            StateKey::ReaderPersona => f.write_str("reader_persona"),
            StateKey::PersonaFeedback => f.write_str("persona_feedback"),
            StateKey::Evaluation(kind) => write!(f, "{}_result", kind),
            StateKey::Evidence => f.write_str("evidence"),
            StateKey::Aggregate => f.write_str("aggregate"),
            StateKey::RewriteGuidelines => f.write_str("rewrite_guidelines"),
            StateKey::FinalReport => f.write_str("final_report"),
            StateKey::QaScores => f.write_str("qa_scores"),
            StateKey::Logs => f.write_str("logs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// A user-facing progress message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Graph node that produced the entry
    pub node: String,
    pub agent: String,
    pub message: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        node: impl Into<String>,
        agent: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            agent: agent.into(),
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }

    pub fn info(node: impl Into<String>, agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node, agent, LogLevel::Info, message)
    }

    pub fn warning(node: impl Into<String>, agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node, agent, LogLevel::Warning, message)
    }

    pub fn error(node: impl Into<String>, agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node, agent, LogLevel::Error, message)
    }
}

/// What one evaluator wrote into the state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorOutput {
    /// Issues with sentence hints already in global coordinates
    #[serde(default)]
    pub issues: Vec<RawIssue>,

    /// Diagnostic or free-form note from the evaluator
    #[serde(default)]
    pub note: Option<String>,

    /// Set when the evaluator degraded to an empty result
    #[serde(default)]
    pub error: Option<String>,

    /// Self-reported quality score, 0-100
    #[serde(default)]
    pub score: Option<u8>,

    /// Chunks whose contribution was excluded
    #[serde(default)]
    pub chunks_failed: usize,

    /// Evaluator-specific payload (e.g. a tension curve)
    #[serde(default)]
    pub details: Option<JsonValue>,
}

impl EvaluatorOutput {
    /// A neutral result carrying an error marker.
    pub fn degraded(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            note: Some(error.clone()),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Score summary for one evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorScore {
    pub score: Option<u8>,
    pub issue_count: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaScores {
    pub scores: BTreeMap<EvaluatorKind, EvaluatorScore>,
}

impl QaScores {
    pub fn from_outputs(outputs: &BTreeMap<EvaluatorKind, EvaluatorOutput>) -> Self {
        let scores = outputs
            .iter()
            .map(|(kind, output)| {
                (
                    *kind,
                    EvaluatorScore {
                        score: output.score.map(|s| s.min(100)),
                        issue_count: output.issues.len(),
                        degraded: output.is_degraded(),
                    },
                )
            })
            .collect();
        Self { scores }
    }

    /// Mean of the reported scores, if any evaluator reported one.
    pub fn mean(&self) -> Option<f64> {
        let reported: Vec<f64> = self
            .scores
            .values()
            .filter_map(|s| s.score.map(f64::from))
            .collect();
        if reported.is_empty() {
            None
        } else {
            Some(reported.iter().sum::<f64>() / reported.len() as f64)
        }
    }
}

/// The per-run execution state.
///
/// Entry fields are set once at construction; result slots are filled by
/// nodes through [`StatePatch`]es.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    pub original_text: String,
    pub context: Option<JsonValue>,

    /// Upstream summary handed to evaluators as extra context
    pub global_summary: Option<String>,

    /// Evaluators enabled for this run
    pub selection: BTreeSet<EvaluatorKind>,

    pub sentences: Option<Vec<Sentence>>,
    pub reader_persona: Option<ReaderPersona>,
    pub persona_feedback: Option<PersonaFeedback>,
    pub evaluations: BTreeMap<EvaluatorKind, EvaluatorOutput>,
    pub evidence: Option<NormalizedEvidence>,
    pub aggregate: Option<AggregateResult>,
    pub rewrite_guidelines: Option<JsonValue>,
    pub final_report: Option<JsonValue>,
    pub qa_scores: Option<QaScores>,

    pub logs: Vec<LogEntry>,
}

impl ReviewState {
    pub fn new(original_text: impl Into<String>) -> Self {
        Self {
            original_text: original_text.into(),
            selection: EvaluatorKind::ALL.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Option<JsonValue>) -> Self {
        self.context = context;
        self
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.global_summary = summary;
        self
    }

    pub fn with_selection(mut self, selection: impl IntoIterator<Item = EvaluatorKind>) -> Self {
        self.selection = selection.into_iter().collect();
        self
    }

    /// The sentence table, empty until segmentation ran.
    pub fn sentences(&self) -> &[Sentence] {
        self.sentences.as_deref().unwrap_or(&[])
    }

    pub fn evaluation(&self, kind: EvaluatorKind) -> Option<&EvaluatorOutput> {
        self.evaluations.get(&kind)
    }

    pub fn is_selected(&self, kind: EvaluatorKind) -> bool {
        self.selection.contains(&kind)
    }

    /// Evaluators whose output carries an error marker.
    pub fn degraded_evaluators(&self) -> Vec<EvaluatorKind> {
        self.evaluations
            .iter()
            .filter(|(_, output)| output.is_degraded())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Merge a patch: overwrite by key, append logs.
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(sentences) = patch.sentences {
            self.sentences = Some(sentences);
        }
        if let Some(persona) = patch.reader_persona {
            self.reader_persona = Some(persona);
        }
        if let Some(feedback) = patch.persona_feedback {
            self.persona_feedback = Some(feedback);
        }
        if let Some((kind, output)) = patch.evaluation {
            self.evaluations.insert(kind, output);
        }
        if let Some(evidence) = patch.evidence {
            self.evidence = Some(evidence);
        }
        if let Some(aggregate) = patch.aggregate {
            self.aggregate = Some(aggregate);
        }
        if let Some(guidelines) = patch.rewrite_guidelines {
            self.rewrite_guidelines = Some(guidelines);
        }
        if let Some(report) = patch.final_report {
            self.final_report = Some(report);
        }
        if let Some(scores) = patch.qa_scores {
            self.qa_scores = Some(scores);
        }
        self.logs.extend(patch.logs);
    }

    /// Stable-sort logs by the rank of the node that wrote them.
    pub fn order_logs_by<F>(&mut self, rank: F)
    where
        F: Fn(&str) -> usize,
    {
        self.logs.sort_by_key(|entry| rank(&entry.node));
    }
}

/// A partial update returned by a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub sentences: Option<Vec<Sentence>>,
    pub reader_persona: Option<ReaderPersona>,
    pub persona_feedback: Option<PersonaFeedback>,
    pub evaluation: Option<(EvaluatorKind, EvaluatorOutput)>,
    pub evidence: Option<NormalizedEvidence>,
    pub aggregate: Option<AggregateResult>,
    pub rewrite_guidelines: Option<JsonValue>,
    pub final_report: Option<JsonValue>,
    pub qa_scores: Option<QaScores>,
    pub logs: Vec<LogEntry>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(mut self, entry: LogEntry) -> Self {
        self.logs.push(entry);
        self
    }

    /// A patch that only appends log entries.
    pub fn logs_only(logs: Vec<LogEntry>) -> Self {
        Self {
            logs,
            ..Default::default()
        }
    }

    /// Keys this patch writes.
    pub fn keys(&self) -> Vec<StateKey> {
        let mut keys = Vec::new();
        if self.sentences.is_some() {
            keys.push(StateKey::Sentences);
        }
        if self.reader_persona.is_some() {
            keys.push(StateKey::ReaderPersona);
        }
        if self.persona_feedback.is_some() {
            keys.push(StateKey::PersonaFeedback);
        }
        if let Some((kind, _)) = &self.evaluation {
            keys.push(StateKey::Evaluation(*kind));
        }
        if self.evidence.is_some() {
            keys.push(StateKey::Evidence);
        }
        if self.aggregate.is_some() {
            keys.push(StateKey::Aggregate);
        }
        if self.rewrite_guidelines.is_some() {
            keys.push(StateKey::RewriteGuidelines);
        }
        if self.final_report.is_some() {
            keys.push(StateKey::FinalReport);
        }
        if self.qa_scores.is_some() {
            keys.push(StateKey::QaScores);
        }
        if !self.logs.is_empty() {
            keys.push(StateKey::Logs);
        }
        keys
    }

    /// Drop every write outside `allowed` and return the dropped keys.
    ///
    /// Logs are always allowed.
    pub fn retain_keys(&mut self, allowed: &BTreeSet<StateKey>) -> Vec<StateKey> {
        let dropped: Vec<StateKey> = self
            .keys()
            .into_iter()
            .filter(|key| *key != StateKey::Logs && !allowed.contains(key))
            .collect();

        for key in &dropped {
            match key {
                StateKey::Sentences => self.sentences = None,
                StateKey::ReaderPersona => self.reader_persona = None,
                StateKey::PersonaFeedback => self.persona_feedback = None,
                StateKey::Evaluation(_) => self.evaluation = None,
                StateKey::Evidence => self.evidence = None,
                StateKey::Aggregate => self.aggregate = None,
                StateKey::RewriteGuidelines => self.rewrite_guidelines = None,
                StateKey::FinalReport => self.final_report = None,
                StateKey::QaScores => self.qa_scores = None,
                StateKey::Logs => {}
            }
        }
        dropped
    }
}
