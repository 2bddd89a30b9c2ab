//! Per-evaluator circuit breaker.
//!
//! After repeated provider failures an evaluator's circuit opens and its
//! remaining chunks degrade immediately instead of waiting on timeouts.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

use galley_core::EvaluatorKind;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow; counts consecutive failures
    Closed { failures: u32 },

    /// Calls are refused until the recovery timeout elapses
    Open { opened_at: Instant },

    /// Trial calls allowed; counts consecutive successes
    HalfOpen { successes: u32 },
}

pub struct CircuitBreaker {
    states: RwLock<HashMap<EvaluatorKind, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls for `kind` must be refused right now.
    ///
    /// An open circuit whose recovery timeout elapsed moves to half-open
    /// and lets the caller through.
    pub fn is_open(&self, kind: EvaluatorKind) -> bool {
        let mut states = self.states.write();
        match states.get(&kind) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    states.insert(kind, CircuitState::HalfOpen { successes: 0 });
                    tracing::info!(evaluator = %kind, "Circuit half-open, allowing trial call");
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub fn record_success(&self, kind: EvaluatorKind) {
        let mut states = self.states.write();
        match states.get(&kind).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(kind, CircuitState::Closed { failures: 0 });
                    tracing::info!(evaluator = %kind, "Circuit closed after recovery");
                } else {
                    states.insert(
                        kind,
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(kind, CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, kind: EvaluatorKind) {
        let mut states = self.states.write();
        let failures = match states.get(&kind) {
            Some(CircuitState::Closed { failures }) => *failures + 1,
            None => 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    kind,
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(evaluator = %kind, "Circuit reopened after failed trial call");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(
                kind,
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(evaluator = %kind, failures, "Circuit opened after repeated failures");
        } else {
            states.insert(kind, CircuitState::Closed { failures });
        }
    }

    pub fn state(&self, kind: EvaluatorKind) -> CircuitState {
        self.states
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
