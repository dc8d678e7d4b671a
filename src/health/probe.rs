//! Readiness probing of the managed backend.
//!
//! # Responsibilities
//! - Poll the backend health endpoint until it answers or attempts run out
//! - One-shot health lookups for the aggregate endpoint
//!
//! # Design Decisions
//! - Every attempt has its own short timeout; a hung attempt costs one cycle
//! - Exhaustion is an outcome (`ready: false`), never an error
//! - Progress logged every `log_every` attempts, not every attempt

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, Request, StatusCode},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time;
use url::Url;

use crate::config::ReadinessConfig;
use crate::error::EdgeError;

const USER_AGENT: &str = "edge-proxy-health-check";

/// Result of one readiness cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub ready: bool,
    pub elapsed_attempts: u32,
    pub last_error: Option<String>,
}

pub struct HealthProbe {
    client: Client<HttpConnector, Body>,
    attempt_timeout: Duration,
    log_every: u32,
}

impl HealthProbe {
    pub fn new(attempt_timeout: Duration, log_every: u32) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            attempt_timeout,
            log_every: log_every.max(1),
        }
    }

    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self::new(config.attempt_timeout(), config.log_every)
    }

    /// Sleep `interval`, probe, repeat, at most `max_attempts` times.
    pub async fn wait_until_ready(
        &self,
        base: &Url,
        path: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> HealthStatus {
        let url = join(base, path);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            time::sleep(interval).await;

            match self.fetch(&url, self.attempt_timeout).await {
                Ok((status, _)) if status.is_success() => {
                    tracing::info!(url = %url, attempts = attempt, "Backend ready");
                    return HealthStatus {
                        ready: true,
                        elapsed_attempts: attempt,
                        last_error: None,
                    };
                }
                Ok((status, _)) => last_error = Some(format!("status {}", status.as_u16())),
                Err(e) => last_error = Some(e),
            }

            if attempt % self.log_every == 0 {
                tracing::info!(
                    url = %url,
                    attempts = attempt,
                    max_attempts,
                    last_error = ?last_error,
                    "Still waiting for backend"
                );
            }
        }

        tracing::warn!(
            url = %url,
            attempts = max_attempts,
            last_error = ?last_error,
            "Backend did not become ready"
        );
        HealthStatus {
            ready: false,
            elapsed_attempts: max_attempts,
            last_error,
        }
    }

    /// Single health lookup returning the backend's own payload.
    ///
    /// A non-success status is reported as `{"error": <status>}`.
    pub async fn check(&self, base: &Url, path: &str, timeout: Duration) -> Result<Value, EdgeError> {
        let url = join(base, path);
        let (status, body) = self
            .fetch(&url, timeout)
            .await
            .map_err(|detail| EdgeError::BackendUnreachable {
                url: url.clone(),
                detail,
            })?;

        if !status.is_success() {
            return Ok(json!({ "error": status.as_u16() }));
        }
        serde_json::from_slice(&body)
            .map_err(|e| EdgeError::UpstreamError(format!("invalid health payload: {}", e)))
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(StatusCode, Bytes), String> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .header(header::USER_AGENT, USER_AGENT)
            .body(Body::empty())
            .map_err(|e| format!("invalid health request: {}", e))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| format!("connection error: {}", e))?;
            let (parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(Body::new(body), usize::MAX)
                .await
                .map_err(|e| format!("body error: {}", e))?;
            Ok((parts.status, bytes))
        };

        match time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {:?}", timeout)),
        }
    }
}

fn join(base: &Url, path: &str) -> String {
    format!("{}{}", base.as_str().trim_end_matches('/'), path)
}
