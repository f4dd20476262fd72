//! Prometheus metrics setup.
//!
//! Installs the `metrics-exporter-prometheus` recorder and describes the
//! counters the dispatch path emits. Rendering happens in the `/metrics`
//! route through [`MetricsRegistry::render`].

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Registry wrapping the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish()
    }
}

impl MetricsRegistry {
    /// Render current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the Prometheus recorder and describe the metric families.
///
/// # Errors
///
/// Returns an error when a recorder is already installed.
pub fn init_metrics() -> anyhow::Result<MetricsRegistry> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metric_descriptions();
    Ok(MetricsRegistry { handle })
}

fn register_metric_descriptions() {
    describe_counter!(
        "foreman_jobs_submitted_total",
        "Job submissions accepted, by kind"
    );
    describe_counter!(
        "foreman_jobs_completed_total",
        "Job runs that finished successfully, by job type"
    );
    describe_counter!(
        "foreman_jobs_failed_total",
        "Job runs that failed, by job type"
    );
    describe_counter!(
        "foreman_jobs_cancelled_total",
        "Repetitive schedules cancelled"
    );
    describe_counter!(
        "foreman_admission_checks_total",
        "Admission checks performed"
    );
    describe_counter!(
        "foreman_admission_rejected_total",
        "Submissions rejected by admission control, by dimension"
    );
    describe_counter!(
        "foreman_grouped_absorbed_total",
        "Buffered submissions absorbed by a group representative"
    );
    describe_counter!(
        "foreman_retries_scheduled_total",
        "Retries scheduled, by job type"
    );
    describe_counter!(
        "foreman_pool_rejections_total",
        "Submissions rejected by a saturated pool"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_installs_once() {
        // First call may race other tests for the global recorder; either
        // way the second call must fail.
        let first = init_metrics();
        let second = init_metrics();
        assert!(first.is_err() || second.is_err());
        if let Ok(registry) = first {
            metrics::counter!("foreman_jobs_submitted_total", "kind" => "one_time").increment(1);
            assert!(registry.render().contains("foreman_jobs_submitted_total"));
        }
    }
}
