//! Shared types for manuscript review.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A sentence of the source text together with its document span.
///
/// Offsets count characters (Unicode scalar values), not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    /// Position in the sentence table (stable key for evaluators)
    pub index: usize,

    /// Trimmed sentence text
    pub text: String,

    /// First character of the sentence in the source text
    pub doc_start: usize,

    /// One past the last character of the sentence in the source text
    pub doc_end: usize,
}

impl Sentence {
    /// Length of the sentence in characters.
    pub fn char_len(&self) -> usize {
        self.doc_end - self.doc_start
    }
}

/// Error returned when an evaluator name cannot be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown evaluator: {0}")]
pub struct UnknownEvaluator(pub String);

/// The evaluators that can run in the fan-out stage.
///
/// Declaration order is the collection order used when normalizing evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Tone,
    Logic,
    Trauma,
    HateBias,
    GenreCliche,
    Spelling,
    TensionCurve,
}

impl EvaluatorKind {
    /// Every evaluator, in collection order.
    pub const ALL: [EvaluatorKind; 7] = [
        EvaluatorKind::Tone,
        EvaluatorKind::Logic,
        EvaluatorKind::Trauma,
        EvaluatorKind::HateBias,
        EvaluatorKind::GenreCliche,
        EvaluatorKind::Spelling,
        EvaluatorKind::TensionCurve,
    ];

    /// Node name used in the execution graph.
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluatorKind::Tone => "tone",
            EvaluatorKind::Logic => "logic",
            EvaluatorKind::Trauma => "trauma",
            EvaluatorKind::HateBias => "hate_bias",
            EvaluatorKind::GenreCliche => "genre_cliche",
            EvaluatorKind::Spelling => "spelling",
            EvaluatorKind::TensionCurve => "tension_curve",
        }
    }

    /// Agent label attached to normalized issues and highlights.
    pub fn agent_label(self) -> &'static str {
        match self {
            EvaluatorKind::TensionCurve => "tension",
            other => other.as_str(),
        }
    }

    /// Aggregation category this evaluator feeds, if any.
    ///
    /// Spelling and tension findings are reported but never decide.
    pub fn problem_type(self) -> Option<ProblemType> {
        match self {
            EvaluatorKind::HateBias => Some(ProblemType::Hate),
            EvaluatorKind::Trauma => Some(ProblemType::Trauma),
            EvaluatorKind::Logic => Some(ProblemType::Logic),
            EvaluatorKind::Tone => Some(ProblemType::Tone),
            EvaluatorKind::GenreCliche => Some(ProblemType::Cliche),
            EvaluatorKind::Spelling | EvaluatorKind::TensionCurve => None,
        }
    }

    /// Severity assumed when the evaluator did not report one.
    pub fn default_severity(self) -> Severity {
        match self {
            EvaluatorKind::Trauma | EvaluatorKind::HateBias => Severity::High,
            EvaluatorKind::GenreCliche | EvaluatorKind::Spelling => Severity::Low,
            EvaluatorKind::Tone | EvaluatorKind::Logic | EvaluatorKind::TensionCurve => {
                Severity::Medium
            }
        }
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluatorKind {
    type Err = UnknownEvaluator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace('-', "_");
        match key.as_str() {
            "tone" => Ok(EvaluatorKind::Tone),
            "logic" | "causality" => Ok(EvaluatorKind::Logic),
            "trauma" => Ok(EvaluatorKind::Trauma),
            "hate_bias" | "hate" | "hatebias" => Ok(EvaluatorKind::HateBias),
            "genre_cliche" | "cliche" => Ok(EvaluatorKind::GenreCliche),
            "spelling" => Ok(EvaluatorKind::Spelling),
            "tension_curve" | "tension" => Ok(EvaluatorKind::TensionCurve),
            _ => Err(UnknownEvaluator(s.to_string())),
        }
    }
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Parse the severity spellings evaluators tend to produce.
    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" | "minor" | "info" => Some(Severity::Low),
            "medium" | "moderate" | "mid" => Some(Severity::Medium),
            "high" | "critical" | "severe" | "major" => Some(Severity::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Aggregation categories.
///
/// Declaration order is the decision priority: `hate > trauma > logic > tone > cliche`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    Hate,
    Trauma,
    Logic,
    Tone,
    Cliche,
}

impl ProblemType {
    /// Every category, in priority order.
    pub const PRIORITY: [ProblemType; 5] = [
        ProblemType::Hate,
        ProblemType::Trauma,
        ProblemType::Logic,
        ProblemType::Tone,
        ProblemType::Cliche,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProblemType::Hate => "hate",
            ProblemType::Trauma => "trauma",
            ProblemType::Logic => "logic",
            ProblemType::Tone => "tone",
            ProblemType::Cliche => "cliche",
        }
    }

    /// Whether findings in this category can force a rewrite.
    pub fn forces_rewrite(self) -> bool {
        !matches!(self, ProblemType::Cliche)
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pass,
    Rewrite,
}

/// Reader persona derived from the request context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderPersona {
    #[serde(default = "default_persona_name")]
    pub name: String,

    #[serde(default)]
    pub role: Option<String>,

    /// Assumed background knowledge (e.g. "beginner", "intermediate")
    #[serde(default)]
    pub knowledge_level: Option<String>,

    #[serde(default)]
    pub expectations: Vec<String>,
}

fn default_persona_name() -> String {
    "default reader".to_string()
}

impl Default for ReaderPersona {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            role: Some("general audience".to_string()),
            knowledge_level: None,
            expectations: vec!["general readability".to_string()],
        }
    }
}

/// Weak signals surfaced from the reader persona's point of view.
///
/// Items are kept as opaque JSON; only their presence and count matter here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaFeedback {
    #[serde(default)]
    pub confusions: Vec<serde_json::Value>,

    #[serde(default)]
    pub missing_context: Vec<serde_json::Value>,
}
