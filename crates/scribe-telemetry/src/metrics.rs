//! Prometheus recorder and the names of every metric the service emits.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the global Prometheus recorder. Call once at startup, before any
/// job is submitted; the handle renders the `/metrics` body.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError(format!("failed to install metrics recorder: {e}")))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Jobs accepted by `POST /transcribe` (counter).
pub const JOBS_SUBMITTED_TOTAL: &str = "jobs_submitted_total";
/// Jobs that reached Completed (counter).
pub const JOBS_COMPLETED_TOTAL: &str = "jobs_completed_total";
/// Jobs that reached Failed (counter).
pub const JOBS_FAILED_TOTAL: &str = "jobs_failed_total";
/// Routines currently running (gauge).
pub const JOBS_ACTIVE: &str = "jobs_active";
/// Wall time of a routine from spawn to exit (histogram).
pub const JOB_DURATION_SECONDS: &str = "job_duration_seconds";
