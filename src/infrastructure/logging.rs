//! Logging system initialization
//!
//! Console logging through tracing-subscriber. The filter is assembled from
//! the configured level plus per-module overrides; `RUST_LOG` wins when set.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::infrastructure::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; a second call returns an error from the
/// subscriber registry, which is surfaced to the caller.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(&config.level);
        for (module, level) in &config.module_filters {
            if let Ok(directive) = format!("{module}={level}").parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}
