//! # galley-runtime
//!
//! Async review graph and LLM plumbing for Galley.
//!
//! `galley-core` decides; this crate gathers what it decides on. A review
//! runs as a dependency graph:
//!
//! - A reader persona is derived from the request context
//! - The manuscript is segmented into a sentence table
//! - Evaluators fan out over the table, chunking long manuscripts
//! - The aggregator joins them and routes to rewrite guidance or the report
//! - Evidence is anchored onto document spans alongside
//!
//! Every model call goes through one gateway per run (circuit breaker,
//! token budget, retry with backoff). A failing evaluator degrades to an
//! empty result; only structural problems fail a run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use galley_runtime::{ProviderRegistry, ReviewPipeline, ReviewRequest, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("galley.yaml")?;
//! let pipeline = ReviewPipeline::from_config(config, &ProviderRegistry::with_defaults())?;
//!
//! let outcome = pipeline
//!     .review(ReviewRequest::new(manuscript).with_selection(["tone", "logic"]))
//!     .await?;
//! println!("{:?}: {}", outcome.decision, outcome.summary);
//! ```

pub mod cache;
pub mod config;
pub mod evaluators;
pub mod gateway;
pub mod graph;
pub mod nodes;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use cache::{ChunkKey, EvaluationCache};
pub use config::{ConfigError, RuntimeConfig};
pub use evaluators::EvaluatorNode;
pub use gateway::{GatewayError, ProviderGateway};
pub use graph::{
    ExecutionTrace, GraphBuilder, GraphError, Node, NodeError, NodeStatus, ReviewGraph,
    RouteOutcome, RunError,
};
pub use pipeline::{review_graph, PipelineError, ReviewOutcome, ReviewPipeline, ReviewRequest};
pub use providers::{LlmProvider, ProviderError, ProviderRegistry, ProviderSpec};
pub use resilience::{BudgetTracker, CircuitBreaker, LlmUsage};
