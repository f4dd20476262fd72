//! Telemetry: structured logging and Prometheus metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use foreman_core::config::ObservabilityConfig;
//! use foreman_core::telemetry::init_telemetry;
//!
//! let config = ObservabilityConfig::default();
//! let handle = init_telemetry(&config).expect("Failed to initialize telemetry");
//! println!("{}", handle.render_metrics());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, MetricsRegistry};

use crate::config::ObservabilityConfig;

/// Initialize logging and, when enabled, the Prometheus recorder.
///
/// Call once at startup; a second call fails on the global subscriber.
/// With `metrics_enabled` off no recorder is installed and metric macros
/// become no-ops.
///
/// # Errors
///
/// Returns an error if either component fails to initialize.
pub fn init_telemetry(config: &ObservabilityConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = if config.metrics_enabled {
        Some(init_metrics()?)
    } else {
        None
    };
    init_logging(config)?;
    Ok(TelemetryHandle { metrics })
}

/// Handle kept alive for the lifetime of the process.
pub struct TelemetryHandle {
    /// Metrics registry backing the /metrics route, absent when disabled
    pub metrics: Option<MetricsRegistry>,
}

impl TelemetryHandle {
    /// Render current metrics in Prometheus text format.
    pub fn render_metrics(&self) -> String {
        self.metrics
            .as_ref()
            .map(MetricsRegistry::render)
            .unwrap_or_default()
    }
}
