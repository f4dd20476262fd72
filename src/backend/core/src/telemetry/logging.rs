//! Structured logging setup.
//!
//! JSON output for production, pretty output for local work, selected by
//! [`ObservabilityConfig::json_logging`]. `RUST_LOG` overrides the
//! configured level when set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error when the level does not parse or a subscriber is
/// already installed.
pub fn init_logging(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(env) => EnvFilter::try_new(env)?,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    if config.json_logging {
        let fmt_layer = fmt::layer()
            .json()
            .with_current_span(false)
            .with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer().pretty().with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    }

    tracing::info!(
        level = %config.log_level,
        json = config.json_logging,
        "Logging initialized"
    );
    Ok(())
}
