//! Guards around provider calls.
//!
//! - Circuit breaker per evaluator so one failing prompt cannot drain the run
//! - Token budgets, global and per evaluator
//! - Exponential backoff for retryable provider errors

mod budget;
mod circuit_breaker;
mod retry;

pub use budget::{BudgetTracker, LlmUsage, TokenBudget};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use retry::backoff;
