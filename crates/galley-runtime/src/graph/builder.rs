use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use galley_core::{Decision, MergeStrategy, ReviewState, StateKey};

use super::{GraphError, Node};

/// Every outcome a router may return. Each must be mapped at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOutcome {
    Rewrite,
    Report,
}

impl RouteOutcome {
    pub const ALL: [RouteOutcome; 2] = [RouteOutcome::Rewrite, RouteOutcome::Report];

    /// Route on the aggregate decision; no aggregate means nothing to rewrite.
    pub fn from_decision(state: &ReviewState) -> Self {
        match state.aggregate.as_ref().map(|a| a.decision) {
            Some(Decision::Rewrite) => RouteOutcome::Rewrite,
            _ => RouteOutcome::Report,
        }
    }
}

impl fmt::Display for RouteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteOutcome::Rewrite => f.write_str("rewrite"),
            RouteOutcome::Report => f.write_str("report"),
        }
    }
}

pub type Router = Arc<dyn Fn(&ReviewState) -> RouteOutcome + Send + Sync>;

pub(super) struct ConditionalEdges {
    pub router: Router,
    pub targets: BTreeMap<RouteOutcome, usize>,
}

/// Collects nodes and edges; [`GraphBuilder::compile`] validates them.
pub struct GraphBuilder {
    nodes: Vec<Arc<dyn Node>>,
    edges: Vec<(String, String)>,
    conditional: Vec<(String, Router, BTreeMap<RouteOutcome, String>)>,
    entry: Option<String>,
    max_concurrency: usize,
    node_timeout: Duration,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            conditional: Vec::new(),
            entry: None,
            max_concurrency: 8,
            node_timeout: Duration::from_secs(120),
        }
    }

    /// Register a node. Registration order is the log ordering rank.
    pub fn add_node(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// After `source` finishes, `router` picks exactly one target.
    pub fn add_conditional_edges<F>(
        mut self,
        source: impl Into<String>,
        router: F,
        targets: impl IntoIterator<Item = (RouteOutcome, String)>,
    ) -> Self
    where
        F: Fn(&ReviewState) -> RouteOutcome + Send + Sync + 'static,
    {
        self.conditional
            .push((source.into(), Arc::new(router), targets.into_iter().collect()));
        self
    }

    pub fn set_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn compile(self) -> Result<ReviewGraph, GraphError> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name().to_string(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.name().to_string()));
            }
        }
        let lookup = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
        };

        let entry_name = self.entry.as_deref().ok_or(GraphError::MissingEntry)?;
        let entry = lookup(entry_name)?;

        let n = self.nodes.len();
        let mut successors = vec![Vec::new(); n];
        let mut predecessors = vec![Vec::new(); n];
        for (from, to) in &self.edges {
            let (from, to) = (lookup(from)?, lookup(to)?);
            if !successors[from].contains(&to) {
                successors[from].push(to);
                predecessors[to].push(from);
            }
        }

        let mut routers: Vec<Option<ConditionalEdges>> = (0..n).map(|_| None).collect();
        let mut conditional_sources = vec![Vec::new(); n];
        for (source, router, targets) in self.conditional {
            let source_index = lookup(&source)?;
            let mut resolved = BTreeMap::new();
            for outcome in RouteOutcome::ALL {
                let target = targets.get(&outcome).ok_or_else(|| GraphError::UnmappedRoute {
                    source_node: source.clone(),
                    outcome,
                })?;
                let target = lookup(target)?;
                resolved.insert(outcome, target);
                if !conditional_sources[target].contains(&source_index) {
                    conditional_sources[target].push(source_index);
                }
            }
            routers[source_index] = Some(ConditionalEdges {
                router,
                targets: resolved,
            });
        }

        let writes = check_single_writer(&self.nodes)?;
        check_acyclic(&self.nodes, &successors, &routers)?;

        Ok(ReviewGraph {
            nodes: self.nodes,
            index,
            entry,
            successors,
            predecessors,
            conditional_sources,
            routers,
            writes,
            max_concurrency: self.max_concurrency,
            node_timeout: self.node_timeout,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_single_writer(nodes: &[Arc<dyn Node>]) -> Result<Vec<BTreeSet<StateKey>>, GraphError> {
    let mut owners: HashMap<StateKey, &str> = HashMap::new();
    let mut writes = Vec::with_capacity(nodes.len());

    for node in nodes {
        let declared: BTreeSet<StateKey> = node.writes().into_iter().collect();
        for key in &declared {
            if key.merge_strategy() == MergeStrategy::Append {
                continue;
            }
            if let Some(first) = owners.insert(*key, node.name()) {
                return Err(GraphError::DuplicateWriter {
                    key: *key,
                    first: first.to_string(),
                    second: node.name().to_string(),
                });
            }
        }
        writes.push(declared);
    }
    Ok(writes)
}

fn check_acyclic(
    nodes: &[Arc<dyn Node>],
    successors: &[Vec<usize>],
    routers: &[Option<ConditionalEdges>],
) -> Result<(), GraphError> {
    let n = nodes.len();
    let mut out: Vec<Vec<usize>> = successors.to_vec();
    for (source, edges) in routers.iter().enumerate() {
        if let Some(edges) = edges {
            out[source].extend(edges.targets.values().copied());
        }
    }

    let mut in_degree = vec![0usize; n];
    for targets in &out {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = queue.pop_front() {
        visited += 1;
        for &t in &out[i] {
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                queue.push_back(t);
            }
        }
    }

    if visited == n {
        Ok(())
    } else {
        let stuck = (0..n).find(|&i| in_degree[i] > 0).unwrap_or(0);
        Err(GraphError::Cycle(nodes[stuck].name().to_string()))
    }
}

/// A validated graph, ready to run any number of times.
pub struct ReviewGraph {
    pub(super) nodes: Vec<Arc<dyn Node>>,
    pub(super) index: HashMap<String, usize>,
    pub(super) entry: usize,
    pub(super) successors: Vec<Vec<usize>>,
    pub(super) predecessors: Vec<Vec<usize>>,
    pub(super) conditional_sources: Vec<Vec<usize>>,
    pub(super) routers: Vec<Option<ConditionalEdges>>,
    pub(super) writes: Vec<BTreeSet<StateKey>>,
    pub(super) max_concurrency: usize,
    pub(super) node_timeout: Duration,
}

impl ReviewGraph {
    /// Node names in registration order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registration rank of `name`; unknown names sort last.
    pub fn rank(&self, name: &str) -> usize {
        self.index.get(name).copied().unwrap_or(usize::MAX)
    }
}

impl fmt::Debug for ReviewGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewGraph")
            .field("nodes", &self.node_names())
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}
