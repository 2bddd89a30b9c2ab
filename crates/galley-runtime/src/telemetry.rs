//! Tracing setup for binaries and tests embedding the runtime.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "galley_core=info,galley_runtime=info";

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides the default directives. Fails if a global
/// subscriber is already set.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVES))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_only_one_global_subscriber() {
        let _ = super::init();
        assert!(super::init().is_err());
    }
}
