//! Review graph: nodes, edges, routing and the executor.
//!
//! Nodes are `ReviewState -> StatePatch` functions. The builder validates
//! the wiring once (unknown names, cycles, unmapped routes, two writers of
//! one slot); the executor then runs every node whose dependencies are
//! resolved, with bounded concurrency, and merges patches as they land.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use galley_core::{ReviewState, StateKey, StatePatch};

mod builder;
mod executor;

pub use builder::{GraphBuilder, ReviewGraph, RouteOutcome, Router};
pub use executor::{ExecutionTrace, NodeStatus, RunError, TraceEntry};

/// Node-local failure. The executor degrades the node and keeps going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    #[error("{0}")]
    Failed(String),
}

/// Build-time wiring errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' registered twice")]
    DuplicateNode(String),

    #[error("no entry node set")]
    MissingEntry,

    #[error("graph contains a cycle through '{0}'")]
    Cycle(String),

    #[error("router on '{source_node}' has no target for outcome '{outcome}'")]
    UnmappedRoute {
        source_node: String,
        outcome: RouteOutcome,
    },

    #[error("'{key}' written by both '{first}' and '{second}'")]
    DuplicateWriter {
        key: StateKey,
        first: String,
        second: String,
    },
}

/// A unit of work in the review graph.
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique node name; also the `node` field of its log entries.
    fn name(&self) -> &str;

    /// State slots this node may write. Undeclared writes are dropped.
    fn writes(&self) -> Vec<StateKey>;

    /// Per-node timeout override.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn run(&self, state: Arc<ReviewState>) -> Result<StatePatch, NodeError>;
}
