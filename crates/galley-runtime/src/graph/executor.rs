use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use galley_core::{LogEntry, ReviewState, StatePatch};

use super::builder::ReviewGraph;

/// Run-time structural failures. Everything else degrades a single node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("required entry field '{0}' is missing")]
    MissingEntryField(&'static str),

    #[error("run finished without a result from '{0}'")]
    MissingResult(&'static str),

    #[error("unknown node in disabled set: '{0}'")]
    UnknownNode(String),

    #[error("execution stalled with unresolved nodes: {0:?}")]
    Stalled(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    Degraded { reason: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node: String,
    #[serde(flatten)]
    pub status: NodeStatus,
}

/// What happened to every node, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub entries: Vec<TraceEntry>,
}

impl ExecutionTrace {
    pub fn status(&self, node: &str) -> Option<&NodeStatus> {
        self.entries
            .iter()
            .find(|entry| entry.node == node)
            .map(|entry| &entry.status)
    }

    /// Names of nodes that ran but degraded.
    pub fn degraded(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.status, NodeStatus::Degraded { .. }))
            .map(|entry| entry.node.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Waiting,
    Running,
    Done,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl ReviewGraph {
    /// Run the graph to completion.
    ///
    /// Nodes named in `disabled` are skipped up front; downstream joins
    /// proceed without them.
    pub async fn run(
        &self,
        initial: ReviewState,
        disabled: &BTreeSet<String>,
    ) -> Result<(ReviewState, ExecutionTrace), RunError> {
        let n = self.nodes.len();
        let mut state = Arc::new(initial);
        let mut slots = vec![Slot::Waiting; n];
        let mut statuses: Vec<Option<NodeStatus>> = vec![None; n];
        let mut activated = vec![false; n];
        activated[self.entry] = true;

        for name in disabled {
            let i = *self
                .index
                .get(name)
                .ok_or_else(|| RunError::UnknownNode(name.clone()))?;
            slots[i] = Slot::Done;
            statuses[i] = Some(NodeStatus::Skipped);
            debug!(node = %name, "Node disabled for this run");
        }

        let mut running: FuturesUnordered<BoxFuture<'static, (usize, Result<StatePatch, String>)>> =
            FuturesUnordered::new();

        loop {
            let ready = self.resolve(&mut slots, &mut statuses, &activated);

            for i in ready {
                if running.len() >= self.max_concurrency {
                    break;
                }
                slots[i] = Slot::Running;
                running.push(self.spawn(i, Arc::clone(&state)));
            }

            let Some((i, outcome)) = running.next().await else {
                break;
            };

            let name = self.nodes[i].name().to_string();
            let status = match outcome {
                Ok(mut patch) => {
                    let dropped = patch.retain_keys(&self.writes[i]);
                    if !dropped.is_empty() {
                        warn!(node = %name, ?dropped, "Dropped undeclared state writes");
                    }
                    Arc::make_mut(&mut state).apply(patch);
                    NodeStatus::Completed
                }
                Err(reason) => {
                    warn!(node = %name, %reason, "Node degraded");
                    Arc::make_mut(&mut state)
                        .apply(StatePatch::logs_only(vec![LogEntry::error(
                            name.as_str(),
                            name.as_str(),
                            reason.clone(),
                        )]));
                    NodeStatus::Degraded { reason }
                }
            };

            for &next in &self.successors[i] {
                activated[next] = true;
            }
            if let Some(edges) = &self.routers[i] {
                let outcome = (edges.router)(&state);
                if let Some(&target) = edges.targets.get(&outcome) {
                    debug!(node = %name, %outcome, target = self.nodes[target].name(), "Routed");
                    activated[target] = true;
                }
            }

            slots[i] = Slot::Done;
            statuses[i] = Some(status);
        }

        let unresolved: Vec<String> = (0..n)
            .filter(|&i| slots[i] != Slot::Done)
            .map(|i| self.nodes[i].name().to_string())
            .collect();
        if !unresolved.is_empty() {
            return Err(RunError::Stalled(unresolved));
        }

        let mut state = Arc::try_unwrap(state).unwrap_or_else(|shared| (*shared).clone());
        state.order_logs_by(|node| self.rank(node));

        let trace = ExecutionTrace {
            entries: self
                .nodes
                .iter()
                .zip(statuses)
                .map(|(node, status)| TraceEntry {
                    node: node.name().to_string(),
                    status: status.unwrap_or(NodeStatus::Skipped),
                })
                .collect(),
        };

        info!(
            nodes = n,
            degraded = trace.degraded().len(),
            "Review graph finished"
        );
        Ok((state, trace))
    }

    /// Mark unreachable nodes skipped and return the nodes ready to run,
    /// in registration order.
    fn resolve(
        &self,
        slots: &mut [Slot],
        statuses: &mut [Option<NodeStatus>],
        activated: &[bool],
    ) -> Vec<usize> {
        loop {
            let mut changed = false;
            for i in 0..self.nodes.len() {
                if slots[i] != Slot::Waiting || activated[i] {
                    continue;
                }
                let sources_done = self.predecessors[i]
                    .iter()
                    .chain(&self.conditional_sources[i])
                    .all(|&s| slots[s] == Slot::Done);
                if sources_done && i != self.entry {
                    debug!(node = self.nodes[i].name(), "Node not activated, skipping");
                    slots[i] = Slot::Done;
                    statuses[i] = Some(NodeStatus::Skipped);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        (0..self.nodes.len())
            .filter(|&i| {
                slots[i] == Slot::Waiting
                    && activated[i]
                    && self.predecessors[i]
                        .iter()
                        .chain(&self.conditional_sources[i])
                        .all(|&s| slots[s] == Slot::Done)
            })
            .collect()
    }

    fn spawn(
        &self,
        i: usize,
        snapshot: Arc<ReviewState>,
    ) -> BoxFuture<'static, (usize, Result<StatePatch, String>)> {
        let node = Arc::clone(&self.nodes[i]);
        let timeout = node.timeout().unwrap_or(self.node_timeout);
        let span = info_span!("node", node = node.name());

        async move {
            debug!("Node started");
            let run = AssertUnwindSafe(node.run(snapshot)).catch_unwind();
            let outcome = match tokio::time::timeout(timeout, run).await {
                Ok(Ok(Ok(patch))) => Ok(patch),
                Ok(Ok(Err(err))) => Err(err.to_string()),
                Ok(Err(panic)) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
                Err(_) => Err(format!("timed out after {}", humantime::format_duration(timeout))),
            };
            (i, outcome)
        }
        .instrument(span)
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, Node, NodeError, RouteOutcome};
    use async_trait::async_trait;
    use galley_core::{
        AggregateResult, Decision, EvaluatorKind, EvaluatorOutput, StateKey,
    };
    use std::collections::BTreeMap;
    use std::time::Duration;

    enum Behavior {
        Log,
        Fail,
        Panic,
        Hang,
        WriteUndeclared,
        Decide(Decision),
    }

    struct Scripted {
        name: &'static str,
        writes: Vec<StateKey>,
        behavior: Behavior,
    }

    #[async_trait]
    impl Node for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn writes(&self) -> Vec<StateKey> {
            self.writes.clone()
        }

        async fn run(&self, _state: Arc<ReviewState>) -> Result<StatePatch, NodeError> {
            let log = LogEntry::info(self.name, self.name, "ran");
            match &self.behavior {
                Behavior::Log => Ok(StatePatch::new().log(log)),
                Behavior::Fail => Err(NodeError::Failed("provider unavailable".into())),
                Behavior::Panic => panic!("boom"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(StatePatch::new())
                }
                Behavior::WriteUndeclared => Ok(StatePatch {
                    evaluation: Some((EvaluatorKind::Tone, EvaluatorOutput::default())),
                    ..StatePatch::new().log(log)
                }),
                Behavior::Decide(decision) => Ok(StatePatch {
                    aggregate: Some(AggregateResult {
                        decision: *decision,
                        problem_types: vec![],
                        primary_issue: None,
                        rationale: BTreeMap::new(),
                        reader_confusion_detected: false,
                        reader_context_gap: false,
                        summary: String::new(),
                    }),
                    ..StatePatch::new().log(log)
                }),
            }
        }
    }

    fn node(name: &'static str, writes: Vec<StateKey>, behavior: Behavior) -> Arc<dyn Node> {
        Arc::new(Scripted {
            name,
            writes,
            behavior,
        })
    }

    /// entry -> {a, b} -> join -> (rewrite | report), rewrite -> report
    fn graph(a: Behavior, decision: Decision) -> ReviewGraph {
        GraphBuilder::new()
            .add_node(node("entry", vec![StateKey::Logs], Behavior::Log))
            .add_node(node("a", vec![StateKey::Logs], a))
            .add_node(node("b", vec![StateKey::Logs], Behavior::Log))
            .add_node(node("join", vec![StateKey::Aggregate], Behavior::Decide(decision)))
            .add_node(node("rewrite", vec![StateKey::Logs], Behavior::Log))
            .add_node(node("report", vec![StateKey::Logs], Behavior::Log))
            .set_entry("entry")
            .add_edge("entry", "a")
            .add_edge("entry", "b")
            .add_edge("a", "join")
            .add_edge("b", "join")
            .add_conditional_edges(
                "join",
                RouteOutcome::from_decision,
                [
                    (RouteOutcome::Rewrite, "rewrite".to_string()),
                    (RouteOutcome::Report, "report".to_string()),
                ],
            )
            .add_edge("rewrite", "report")
            .node_timeout(Duration::from_millis(50))
            .compile()
            .unwrap()
    }

    fn nodes_logged(state: &ReviewState) -> Vec<&str> {
        state.logs.iter().map(|l| l.node.as_str()).collect()
    }

    #[tokio::test]
    async fn test_rewrite_route_runs_both_guidance_nodes() {
        let (state, trace) = graph(Behavior::Log, Decision::Rewrite)
            .run(ReviewState::new("x"), &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(trace.status("rewrite"), Some(&NodeStatus::Completed));
        assert_eq!(trace.status("report"), Some(&NodeStatus::Completed));
        assert_eq!(
            nodes_logged(&state),
            vec!["entry", "a", "b", "join", "rewrite", "report"]
        );
    }

    #[tokio::test]
    async fn test_pass_route_skips_rewrite() {
        let (state, trace) = graph(Behavior::Log, Decision::Pass)
            .run(ReviewState::new("x"), &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(trace.status("rewrite"), Some(&NodeStatus::Skipped));
        assert_eq!(trace.status("report"), Some(&NodeStatus::Completed));
        assert!(!nodes_logged(&state).contains(&"rewrite"));
    }

    #[tokio::test]
    async fn test_failing_branch_still_joins() {
        for behavior in [Behavior::Fail, Behavior::Panic] {
            let (state, trace) = graph(behavior, Decision::Pass)
                .run(ReviewState::new("x"), &BTreeSet::new())
                .await
                .unwrap();

            assert!(matches!(trace.status("a"), Some(NodeStatus::Degraded { .. })));
            assert_eq!(trace.status("join"), Some(&NodeStatus::Completed));
            assert!(state.aggregate.is_some());
            let error = state.logs.iter().find(|l| l.node == "a").unwrap();
            assert_eq!(error.level, galley_core::LogLevel::Error);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_only_that_node() {
        let (_, trace) = graph(Behavior::Hang, Decision::Pass)
            .run(ReviewState::new("x"), &BTreeSet::new())
            .await
            .unwrap();

        match trace.status("a") {
            Some(NodeStatus::Degraded { reason }) => assert!(reason.contains("timed out")),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(trace.status("b"), Some(&NodeStatus::Completed));
        assert_eq!(trace.status("report"), Some(&NodeStatus::Completed));
    }

    #[tokio::test]
    async fn test_disabled_node_is_skipped() {
        let disabled: BTreeSet<String> = ["a".to_string()].into();
        let (_, trace) = graph(Behavior::Log, Decision::Pass)
            .run(ReviewState::new("x"), &disabled)
            .await
            .unwrap();

        assert_eq!(trace.status("a"), Some(&NodeStatus::Skipped));
        assert_eq!(trace.status("join"), Some(&NodeStatus::Completed));
    }

    #[tokio::test]
    async fn test_unknown_disabled_node() {
        let disabled: BTreeSet<String> = ["nope".to_string()].into();
        let err = graph(Behavior::Log, Decision::Pass)
            .run(ReviewState::new("x"), &disabled)
            .await
            .unwrap_err();
        assert_eq!(err, RunError::UnknownNode("nope".into()));
    }

    #[tokio::test]
    async fn test_undeclared_write_dropped() {
        let (state, trace) = graph(Behavior::WriteUndeclared, Decision::Pass)
            .run(ReviewState::new("x"), &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(trace.status("a"), Some(&NodeStatus::Completed));
        assert!(state.evaluations.is_empty());
        assert!(nodes_logged(&state).contains(&"a"));
    }
}
