//! Tracing subscriber setup for binaries embedding the resilience core.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a subscriber is
/// already installed or the filter does not parse.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = filter_from(std::env::var("RUST_LOG").ok().as_deref(), &config.level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}

fn filter_from(env: Option<&str>, level: &str) -> Result<EnvFilter> {
    let directives = env.filter(|value| !value.trim().is_empty()).unwrap_or(level);
    EnvFilter::try_new(directives)
        .map_err(|e| Error::Config(format!("invalid log filter '{directives}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_configured_level() {
        let filter = filter_from(Some("mcp_resilience=trace"), "info").unwrap();
        assert!(filter.to_string().contains("mcp_resilience=trace"));
    }

    #[test]
    fn test_configured_level_used_without_env() {
        let filter = filter_from(None, "warn").unwrap();
        assert_eq!(filter.to_string(), "warn");

        let blank = filter_from(Some("  "), "debug").unwrap();
        assert_eq!(blank.to_string(), "debug");
    }
}
