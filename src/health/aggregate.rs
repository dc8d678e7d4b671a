//! Composite health report served by the edge itself.
//!
//! The edge is alive whenever it can answer, so the report is always
//! `status: ok`; the backend's own payload (or an error object) and the
//! supervisor's view of the process are attached for diagnosis.
//!
//! A successful lookup also completes a late readiness handoff: a backend
//! that missed the startup window is promoted from degraded to ready here.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use url::Url;

use crate::health::probe::HealthProbe;
use crate::lifecycle::{ProcessStatus, ProcessSupervisor};
use crate::observability::metrics;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub proxy: &'static str,
    pub backend: Value,
    pub process: ProcessStatus,
}

pub async fn report(
    probe: &HealthProbe,
    base: &Url,
    path: &str,
    timeout: Duration,
    supervisor: &ProcessSupervisor,
) -> HealthReport {
    let backend = match probe.check(base, path, timeout).await {
        Ok(payload) => {
            if supervisor.mark_ready() {
                tracing::info!("Backend became ready after the startup window");
                metrics::record_backend_ready(true);
            }
            payload
        }
        Err(e) => {
            tracing::debug!(error = %e, "Backend health lookup failed");
            json!({ "error": e.to_string() })
        }
    };

    HealthReport {
        status: "ok",
        proxy: "edge",
        backend,
        process: supervisor.status(),
    }
}
