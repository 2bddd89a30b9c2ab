//! Evaluator adapters.
//!
//! One [`EvaluatorNode`] per [`EvaluatorKind`]. Each reads the sentence
//! table plus the optional persona and summary, asks the model for issues
//! (chunked on long manuscripts) and writes exactly one evaluation slot.
//! An adapter never fails its node: provider and parse failures come back
//! as a degraded output with a diagnostic note.

mod adapter;
mod chunking;
pub mod parse;

pub use adapter::EvaluatorNode;
pub use chunking::{chunk_deadline, merge_chunks, plan_chunks, ChunkResult};
pub use parse::{extract_json_object, parse_evaluator_response, ParseError};
