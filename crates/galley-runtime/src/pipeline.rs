//! The review pipeline: request in, outcome out.
//!
//! [`ReviewPipeline`] owns what outlives a single run (provider, circuit
//! breaker, response cache). Every [`ReviewPipeline::review`] call builds a
//! fresh gateway and graph, so token budgets are per run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use galley_core::{
    Decision, EvaluatorKind, Highlight, LogEntry, NormalizedIssue, ProblemType, QaScores,
    ReviewState,
};

use crate::cache::EvaluationCache;
use crate::config::{ConfigError, RuntimeConfig};
use crate::evaluators::EvaluatorNode;
use crate::gateway::ProviderGateway;
use crate::graph::{ExecutionTrace, GraphBuilder, GraphError, ReviewGraph, RouteOutcome, RunError};
use crate::nodes::{
    names, AggregateNode, EvidenceNode, PersonaFeedbackNode, QaScoresNode, ReaderPersonaNode,
    ReportNode, RewriteNode, SplitNode,
};
use crate::providers::{LlmProvider, ProviderError, ProviderRegistry};
use crate::resilience::{BudgetTracker, CircuitBreaker, LlmUsage};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid review graph: {0}")]
    Graph(#[from] GraphError),

    #[error("review run failed: {0}")]
    Run(#[from] RunError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Inbound review request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub original_text: Option<String>,

    /// Opaque author metadata (genre, audience, ...)
    #[serde(default)]
    pub context: Option<JsonValue>,

    /// Evaluator names; empty or unknown-only falls back to the defaults
    #[serde(default)]
    pub evaluator_selection: Option<Vec<String>>,

    /// Optional synopsis handed to every evaluator as reference
    #[serde(default)]
    pub summary: Option<String>,
}

impl ReviewRequest {
    pub fn new(original_text: impl Into<String>) -> Self {
        Self {
            original_text: Some(original_text.into()),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_selection<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evaluator_selection = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Outbound review payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewOutcome {
    pub decision: Decision,
    pub problem_types: Vec<ProblemType>,
    pub primary_issue: Option<ProblemType>,
    pub rationale: BTreeMap<String, String>,
    pub normalized_issues: Vec<NormalizedIssue>,
    pub highlights: Vec<Highlight>,
    pub logs: Vec<LogEntry>,
    pub summary: String,
    pub reader_confusion_detected: bool,
    pub reader_context_gap: bool,
    pub degraded_evaluators: Vec<EvaluatorKind>,
    pub rewrite_guidelines: Option<JsonValue>,
    pub final_report: Option<JsonValue>,
    pub qa_scores: Option<QaScores>,
    pub trace: ExecutionTrace,
    pub usage: LlmUsage,
}

impl ReviewOutcome {
    fn from_run(
        state: ReviewState,
        trace: ExecutionTrace,
        usage: LlmUsage,
    ) -> Result<Self, RunError> {
        let ReviewState {
            evaluations,
            evidence,
            aggregate,
            rewrite_guidelines,
            final_report,
            qa_scores,
            logs,
            ..
        } = state;

        // The join can only be missing if the graph itself misbehaved.
        let aggregate = aggregate.ok_or(RunError::MissingResult(names::AGGREGATE))?;
        let evidence = evidence.unwrap_or_default();

        let mut degraded: BTreeSet<EvaluatorKind> = evaluations
            .iter()
            .filter(|(_, output)| output.is_degraded())
            .map(|(kind, _)| *kind)
            .collect();
        degraded.extend(
            trace
                .degraded()
                .into_iter()
                .filter_map(|node| node.parse::<EvaluatorKind>().ok()),
        );

        Ok(Self {
            decision: aggregate.decision,
            problem_types: aggregate.problem_types,
            primary_issue: aggregate.primary_issue,
            rationale: aggregate.rationale,
            normalized_issues: evidence.issues,
            highlights: evidence.highlights,
            logs,
            summary: aggregate.summary,
            reader_confusion_detected: aggregate.reader_confusion_detected,
            reader_context_gap: aggregate.reader_context_gap,
            degraded_evaluators: degraded.into_iter().collect(),
            rewrite_guidelines,
            final_report,
            qa_scores,
            trace,
            usage,
        })
    }
}

/// Wire the review graph.
///
/// ```text
/// reader_persona -> split -> { persona_feedback, evaluators... } -> aggregate
///                    split + evaluators -> evidence
/// aggregate --rewrite--> rewrite -> report
///           --report---> report
/// { report, evidence } -> qa_scores
/// ```
///
/// Every evaluator is registered; unselected ones are disabled per run.
pub fn review_graph(
    gateway: Arc<ProviderGateway>,
    config: &RuntimeConfig,
    cache: Option<Arc<EvaluationCache>>,
) -> Result<ReviewGraph, GraphError> {
    let mut builder = GraphBuilder::new()
        .max_concurrency(config.max_concurrency)
        .node_timeout(config.node_timeout)
        .add_node(Arc::new(ReaderPersonaNode::new(Arc::clone(&gateway))))
        .add_node(Arc::new(SplitNode))
        .add_node(Arc::new(PersonaFeedbackNode::new(Arc::clone(&gateway))));

    for kind in EvaluatorKind::ALL {
        let mut node = EvaluatorNode::new(
            kind,
            Arc::clone(&gateway),
            config.chunking.clone(),
            config.evaluator_timeout,
        );
        if let Some(cache) = &cache {
            node = node.with_cache(Arc::clone(cache));
        }
        builder = builder.add_node(Arc::new(node));
    }

    builder = builder
        .add_node(Arc::new(AggregateNode::new()))
        .add_node(Arc::new(EvidenceNode))
        .add_node(Arc::new(RewriteNode::new(Arc::clone(&gateway))))
        .add_node(Arc::new(ReportNode::new(Arc::clone(&gateway))))
        .add_node(Arc::new(QaScoresNode))
        .set_entry(names::READER_PERSONA)
        .add_edge(names::READER_PERSONA, names::SPLIT)
        .add_edge(names::SPLIT, names::PERSONA_FEEDBACK)
        .add_edge(names::PERSONA_FEEDBACK, names::AGGREGATE)
        .add_edge(names::SPLIT, names::EVIDENCE);

    for kind in EvaluatorKind::ALL {
        builder = builder
            .add_edge(names::SPLIT, kind.as_str())
            .add_edge(kind.as_str(), names::AGGREGATE)
            .add_edge(kind.as_str(), names::EVIDENCE);
    }

    builder
        .add_conditional_edges(
            names::AGGREGATE,
            RouteOutcome::from_decision,
            [
                (RouteOutcome::Rewrite, names::REWRITE.to_string()),
                (RouteOutcome::Report, names::REPORT.to_string()),
            ],
        )
        .add_edge(names::REWRITE, names::REPORT)
        .add_edge(names::REPORT, names::QA_SCORES)
        .add_edge(names::EVIDENCE, names::QA_SCORES)
        .compile()
}

/// Long-lived review service.
pub struct ReviewPipeline {
    provider: Arc<dyn LlmProvider>,
    config: RuntimeConfig,
    breaker: Arc<CircuitBreaker>,
    cache: Option<Arc<EvaluationCache>>,
}

impl ReviewPipeline {
    /// Validate `config` and the graph wiring once, up front.
    pub fn new(provider: Arc<dyn LlmProvider>, config: RuntimeConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(EvaluationCache::new(&config.cache)));
        let pipeline = Self {
            provider,
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            config,
            cache,
        };

        let graph = review_graph(pipeline.gateway(), &pipeline.config, pipeline.cache.clone())?;
        info!(
            provider = pipeline.provider.name(),
            model = %pipeline.config.completion.model,
            nodes = graph.node_names().len(),
            "Review pipeline ready"
        );
        Ok(pipeline)
    }

    /// Build the provider named in `config.provider` from `registry`.
    pub fn from_config(
        config: RuntimeConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self, PipelineError> {
        let provider = registry.build(&config.provider)?;
        Self::new(provider, config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Circuit state shared by every run.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    fn gateway(&self) -> Arc<ProviderGateway> {
        Arc::new(ProviderGateway::new(
            Arc::clone(&self.provider),
            self.config.completion.clone(),
            self.config.retry.clone(),
            Arc::clone(&self.breaker),
            BudgetTracker::from_config(&self.config.budgets),
        ))
    }

    /// Resolve a requested evaluator selection.
    ///
    /// Unknown names are ignored with a warning. If nothing usable is left
    /// the configured defaults apply.
    pub fn selection(&self, requested: Option<&[String]>) -> BTreeSet<EvaluatorKind> {
        let mut selected = BTreeSet::new();
        for name in requested.unwrap_or_default() {
            match name.parse::<EvaluatorKind>() {
                Ok(kind) => {
                    selected.insert(kind);
                }
                Err(err) => warn!(error = %err, "Ignoring unknown evaluator"),
            }
        }

        if selected.is_empty() {
            if requested.is_some_and(|names| !names.is_empty()) {
                warn!("No usable evaluator requested, using defaults");
            }
            selected.extend(self.config.default_evaluators.iter().copied());
        }
        selected
    }

    /// Run one review.
    ///
    /// Fails only on structural problems; provider trouble shows up as
    /// degraded evaluators and warning logs in the outcome.
    pub async fn review(&self, request: ReviewRequest) -> Result<ReviewOutcome, PipelineError> {
        let ReviewRequest {
            original_text,
            context,
            evaluator_selection,
            summary,
        } = request;
        let original_text = original_text.ok_or(RunError::MissingEntryField("original_text"))?;

        let selection = self.selection(evaluator_selection.as_deref());
        let disabled: BTreeSet<String> = EvaluatorKind::ALL
            .into_iter()
            .filter(|kind| !selection.contains(kind))
            .map(|kind| kind.as_str().to_string())
            .collect();

        let gateway = self.gateway();
        let graph = review_graph(Arc::clone(&gateway), &self.config, self.cache.clone())?;

        let state = ReviewState::new(original_text)
            .with_context(context)
            .with_summary(summary)
            .with_selection(selection.iter().copied());

        let span = info_span!("review", evaluators = selection.len());
        let (state, trace) = graph.run(state, &disabled).instrument(span).await?;
        let outcome = ReviewOutcome::from_run(state, trace, gateway.usage())?;

        info!(
            decision = ?outcome.decision,
            issues = outcome.normalized_issues.len(),
            degraded = outcome.degraded_evaluators.len(),
            tokens = outcome.usage.total_tokens,
            "Review finished"
        );
        Ok(outcome)
    }
}
