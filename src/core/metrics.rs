use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("papers_created_total", "Papers persisted, labelled by source");
    metrics::describe_counter!("questions_stored_total", "Question rows written with a new paper");
    metrics::describe_counter!(
        "ai_generation_attempts_total",
        "Remote completion attempts, labelled by outcome"
    );
    metrics::describe_counter!("questions_generated_total", "Normalized AI questions returned");
    metrics::describe_counter!("paper_exports_total", "Rendered paper documents");
    metrics::describe_counter!("http_requests_total", "HTTP responses by status");
    metrics::describe_histogram!("http_request_duration_seconds", "HTTP latency by status");
}
