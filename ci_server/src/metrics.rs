//! Prometheus metrics for the CI lifecycle engine.

use metrics::counter;

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(source: &str) {
    counter!("ci_webhooks_received_total", "source" => source.to_string()).increment(1);
}

/// Record the outcome of a pipeline patch.
pub fn pipeline_patched(action: &str, outcome: &str) {
    counter!(
        "ci_pipeline_patch_total",
        "action" => action.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a workflow run status write.
pub fn workflow_status_updated(status: &str) {
    counter!("ci_workflow_status_updates_total", "status" => status.to_string()).increment(1);
}

/// Record artifacts persisted by an external CI ingestion.
pub fn artifacts_ingested(count: usize) {
    counter!("ci_artifacts_ingested_total").increment(count as u64);
}

/// Record a post-commit notifier failure.
pub fn notifier_degraded(call: &str) {
    counter!("ci_notifier_degraded_total", "call" => call.to_string()).increment(1);
}
