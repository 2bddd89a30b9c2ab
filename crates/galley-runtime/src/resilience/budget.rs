//! Token budgets for one review run.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use galley_core::EvaluatorKind;

use crate::config::BudgetConfig;
use crate::providers::TokenUsage;

/// A token ceiling with a running total.
pub struct TokenBudget {
    pub max_tokens: u32,
    used: AtomicU32,
}

impl TokenBudget {
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            used: AtomicU32::new(0),
        }
    }

    pub fn can_afford(&self, tokens: u32) -> bool {
        self.remaining() >= tokens
    }

    pub fn record(&self, tokens: u32) {
        self.used.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> u32 {
        self.max_tokens.saturating_sub(self.used())
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }
}

/// Accumulated model usage for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,

    /// Completed provider calls
    pub llm_calls: u32,

    /// Evaluator chunks answered from the result cache
    pub cache_hits: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens (input, output)
        let (input_rate, output_rate) = match model {
            m if m.contains("solar-mini") => (0.15, 0.15),
            m if m.contains("solar-pro") => (0.25, 0.25),
            m if m.contains("gpt-4o-mini") => (0.15, 0.6),
            _ => (0.25, 0.25),
        };

        (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate
            + (usage.completion_tokens as f64 / 1_000_000.0) * output_rate
    }
}

/// Global and per-evaluator budgets plus the usage ledger.
///
/// Calls made outside an evaluator (persona, guidance) only count against
/// the global budget.
pub struct BudgetTracker {
    evaluator_budgets: HashMap<EvaluatorKind, TokenBudget>,
    global_budget: TokenBudget,
    usage: RwLock<LlmUsage>,
}

impl BudgetTracker {
    pub fn new(global_max: u32, per_evaluator_max: u32) -> Self {
        let evaluator_budgets = EvaluatorKind::ALL
            .into_iter()
            .map(|kind| (kind, TokenBudget::new(per_evaluator_max)))
            .collect();

        Self {
            evaluator_budgets,
            global_budget: TokenBudget::new(global_max),
            usage: RwLock::new(LlmUsage::default()),
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.global_max_tokens, config.per_evaluator_max_tokens)
    }

    pub fn can_afford(&self, kind: Option<EvaluatorKind>, estimated_tokens: u32) -> bool {
        let scoped_ok = kind
            .and_then(|k| self.evaluator_budgets.get(&k))
            .map(|b| b.can_afford(estimated_tokens))
            .unwrap_or(true);

        scoped_ok && self.global_budget.can_afford(estimated_tokens)
    }

    pub fn record_usage(&self, kind: Option<EvaluatorKind>, usage: &TokenUsage, model: &str) {
        let total = usage.total();
        if let Some(budget) = kind.and_then(|k| self.evaluator_budgets.get(&k)) {
            budget.record(total);
        }
        self.global_budget.record(total);
        self.usage.write().add(usage, model);
    }

    pub fn record_cache_hit(&self) {
        self.usage.write().cache_hits += 1;
    }

    pub fn usage(&self) -> LlmUsage {
        self.usage.read().clone()
    }

    pub fn remaining_global(&self) -> u32 {
        self.global_budget.remaining()
    }

    pub fn remaining_for(&self, kind: EvaluatorKind) -> u32 {
        self.evaluator_budgets
            .get(&kind)
            .map(|b| b.remaining())
            .unwrap_or(0)
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::from_config(&BudgetConfig::default())
    }
}
