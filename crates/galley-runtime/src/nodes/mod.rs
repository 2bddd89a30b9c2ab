//! The non-evaluator nodes of the review graph.

mod aggregate;
mod evidence;
mod guidance;
mod persona;
mod scoring;
mod split;

pub use aggregate::AggregateNode;
pub use evidence::EvidenceNode;
pub use guidance::{ReportNode, RewriteNode};
pub use persona::{parse_persona, parse_persona_feedback, PersonaFeedbackNode, ReaderPersonaNode};
pub use scoring::QaScoresNode;
pub use split::SplitNode;

/// Node names, shared by the pipeline wiring and tests.
pub mod names {
    pub const READER_PERSONA: &str = "reader_persona";
    pub const SPLIT: &str = "split";
    pub const PERSONA_FEEDBACK: &str = "persona_feedback";
    pub const AGGREGATE: &str = "aggregate";
    pub const EVIDENCE: &str = "evidence";
    pub const REWRITE: &str = "rewrite";
    pub const REPORT: &str = "report";
    pub const QA_SCORES: &str = "qa_scores";
}
