use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured directive.
pub fn init(directive: &str) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) if !from_env.trim().is_empty() => EnvFilter::try_new(from_env),
        _ => EnvFilter::try_new(directive),
    }
    .with_context(|| format!("invalid log filter {}", directive))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))?;

    tracing::info!("initialized logging with filter {}", directive);
    Ok(())
}
