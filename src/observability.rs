//! Structured logging setup.

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;

/// Initialize the global tracing subscriber. Each component logs under its
/// own `target` (`"proxy"`, `"cache"`, `"crawler"`, ...), standing in for the
/// original implementation's `[COMPONENT]` stdout prefix.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.observability.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.observability.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(target: "observability", "tracing initialized at level {}", config.observability.log_level);
    Ok(())
}
