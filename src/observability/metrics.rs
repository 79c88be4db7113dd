//! Metrics for the city-data ingestion job
//!
//! Metric names live in one enum so call sites never spell Prometheus names by hand.

use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Source API
    ApiRequestsSuccess,
    ApiRequestsError,
    ApiRequestDuration,
    ApiPayloadBytes,

    // Collector
    CollectorAreasFetched,
    CollectorRunsFailed,

    // Loader
    LoaderRowsWritten,
    LoaderLoadsSuccess,
    LoaderLoadsError,
    LoaderDuration,

    // Whole runs
    PipelineRunsSuccess,
    PipelineRunsFailed,
    PipelineRunDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ApiRequestsSuccess => "seoul_api_requests_success_total",
            MetricName::ApiRequestsError => "seoul_api_requests_error_total",
            MetricName::ApiRequestDuration => "seoul_api_request_duration_seconds",
            MetricName::ApiPayloadBytes => "seoul_api_payload_bytes",

            MetricName::CollectorAreasFetched => "seoul_collector_areas_fetched_total",
            MetricName::CollectorRunsFailed => "seoul_collector_runs_failed_total",

            MetricName::LoaderRowsWritten => "seoul_loader_rows_written_total",
            MetricName::LoaderLoadsSuccess => "seoul_loader_loads_success_total",
            MetricName::LoaderLoadsError => "seoul_loader_loads_error_total",
            MetricName::LoaderDuration => "seoul_loader_duration_seconds",

            MetricName::PipelineRunsSuccess => "seoul_pipeline_runs_success_total",
            MetricName::PipelineRunsFailed => "seoul_pipeline_runs_failed_total",
            MetricName::PipelineRunDuration => "seoul_pipeline_run_duration_seconds",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            ApiRequestsSuccess,
            ApiRequestsError,
            ApiRequestDuration,
            ApiPayloadBytes,
            CollectorAreasFetched,
            CollectorRunsFailed,
            LoaderRowsWritten,
            LoaderLoadsSuccess,
            LoaderLoadsError,
            LoaderDuration,
            PipelineRunsSuccess,
            PipelineRunsFailed,
            PipelineRunDuration,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus recorder and its `/metrics` listener when
/// SEOUL_METRICS_ADDR is set. Must be called inside the tokio runtime.
///
/// Without it the `metrics` macros record into the no-op recorder, which is
/// what tests and one-off runs want.
pub fn init() {
    let Ok(addr_str) = std::env::var(crate::constants::ENV_METRICS_ADDR) else {
        info!("Metrics exporter disabled (no {})", crate::constants::ENV_METRICS_ADDR);
        return;
    };
    let addr = match addr_str.parse::<std::net::SocketAddr>() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics addr '{}': {}", addr_str, e);
            return;
        }
    };
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
    }
}

pub mod api {
    use super::MetricName;

    pub fn request_success(duration_secs: f64, payload_bytes: usize) {
        ::metrics::counter!(MetricName::ApiRequestsSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::ApiRequestDuration.as_str()).record(duration_secs);
        ::metrics::histogram!(MetricName::ApiPayloadBytes.as_str()).record(payload_bytes as f64);
    }

    pub fn request_error(area: &str) {
        ::metrics::counter!(MetricName::ApiRequestsError.as_str(), "area" => area.to_string())
            .increment(1);
    }
}

pub mod collector {
    use super::MetricName;

    pub fn area_fetched() {
        ::metrics::counter!(MetricName::CollectorAreasFetched.as_str()).increment(1);
    }

    pub fn run_failed() {
        ::metrics::counter!(MetricName::CollectorRunsFailed.as_str()).increment(1);
    }
}

pub mod loader {
    use super::MetricName;

    pub fn load_success(table: &str, rows: usize, duration_secs: f64) {
        let table = table.to_string();
        ::metrics::counter!(MetricName::LoaderRowsWritten.as_str(), "table" => table.clone())
            .increment(rows as u64);
        ::metrics::counter!(MetricName::LoaderLoadsSuccess.as_str(), "table" => table.clone())
            .increment(1);
        ::metrics::histogram!(MetricName::LoaderDuration.as_str(), "table" => table)
            .record(duration_secs);
    }

    pub fn load_error(table: &str) {
        ::metrics::counter!(MetricName::LoaderLoadsError.as_str(), "table" => table.to_string())
            .increment(1);
    }
}

pub mod pipeline {
    use super::MetricName;

    pub fn run_finished(success: bool, duration_secs: f64) {
        let name = if success {
            MetricName::PipelineRunsSuccess
        } else {
            MetricName::PipelineRunsFailed
        };
        ::metrics::counter!(name.as_str()).increment(1);
        ::metrics::histogram!(MetricName::PipelineRunDuration.as_str()).record(duration_secs);
    }
}
