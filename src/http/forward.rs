//! HTTP forwarding to the managed backend.
//!
//! # Responsibilities
//! - Build the outbound request: same method, path and verbatim query
//! - Sanitize headers in both directions through the [`HeaderPolicy`]
//! - Bound the whole exchange with one long timeout
//! - Map transport failures onto [`EdgeError`]
//!
//! # Design Decisions
//! - Exactly one attempt per call; the backend does expensive non-idempotent
//!   work, so blind retries are unsafe
//! - Connect/refused/reset failures are 503, everything else 500
//! - Backend bodies are decoded before they reach the client; the edge
//!   negotiates its own `accept-encoding` and never relays a compressed body

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Uri},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tower::ServiceExt;
use tower_http::decompression::Decompression;
use url::Url;

use crate::error::EdgeError;
use crate::http::headers::{Direction, HeaderPolicy};
use crate::http::request::ProxyRequest;
use crate::http::response::ProxyResponse;

pub struct RequestForwarder {
    client: Decompression<Client<HttpConnector, Body>>,
    base: Url,
    policy: HeaderPolicy,
    timeout: Duration,
}

impl RequestForwarder {
    pub fn new(base: Url, policy: HeaderPolicy, timeout: Duration) -> Self {
        let client = Decompression::new(
            Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        );
        Self {
            client,
            base,
            policy,
            timeout,
        }
    }

    /// Absolute backend URL for `request`.
    pub fn target_url(&self, request: &ProxyRequest) -> String {
        format!(
            "{}{}",
            self.base.as_str().trim_end_matches('/'),
            request.path_and_query()
        )
    }

    pub async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        let target = self.target_url(request);
        let uri: Uri = target
            .parse()
            .map_err(|e| EdgeError::UpstreamError(format!("invalid target URI {}: {}", target, e)))?;

        let body = match request.body() {
            Some(bytes) => Body::from(bytes.clone()),
            None => Body::empty(),
        };
        let mut outbound = Request::builder()
            .method(request.method().clone())
            .uri(uri)
            .body(body)
            .map_err(|e| EdgeError::UpstreamError(format!("failed to build request: {}", e)))?;
        *outbound.headers_mut() = self.policy.filter(Direction::Request, request.headers());

        tracing::debug!(method = %request.method(), target = %target, "Forwarding request");

        let exchange = async {
            let response = self
                .client
                .clone()
                .oneshot(outbound)
                .await
                .map_err(|e| classify(&target, &e))?;

            let (parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(Body::new(body), usize::MAX)
                .await
                .map_err(|e| EdgeError::UpstreamError(format!("failed to read backend response: {}", e)))?;

            Ok(ProxyResponse::from_backend(parts.status, &parts.headers, bytes, &self.policy))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(EdgeError::UpstreamError(format!(
                "backend did not answer within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Unreachable when no connection could be made or it was torn down under us.
fn classify(target: &str, err: &hyper_util::client::legacy::Error) -> EdgeError {
    let detail = error_chain(err);
    if err.is_connect() || is_connection_drop(err) {
        EdgeError::BackendUnreachable {
            url: target.to_string(),
            detail,
        }
    } else {
        EdgeError::UpstreamError(detail)
    }
}

fn is_connection_drop(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            );
        }
        source = e.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}
