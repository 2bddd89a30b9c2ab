//! Backoff policy for retryable provider errors.

use backon::ExponentialBuilder;

use crate::config::RetryConfig;

/// Exponential backoff matching `config`.
///
/// `max_attempts` counts the first call, so the builder gets one less retry.
pub fn backoff(config: &RetryConfig) -> ExponentialBuilder {
    let builder = ExponentialBuilder::default()
        .with_min_delay(config.min_delay)
        .with_max_delay(config.max_delay)
        .with_max_times(config.max_attempts.saturating_sub(1));

    if config.jitter {
        builder.with_jitter()
    } else {
        builder
    }
}
