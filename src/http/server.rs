//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router: root, aggregate health, forwarding, WebSockets
//! - Wire up middleware (tracing, request ID)
//! - Bind server to listener with graceful shutdown
//!
//! # Routes
//! ```text
//! GET  /                      → static info, no backend traffic
//! GET  <prefix>/health        → aggregate health (always 200)
//! ANY  <websocket path>       → upgrade: StreamRelay, otherwise forward/reject
//! *    <prefix>/<anything>    → RequestForwarder (GET/POST/PUT/DELETE/PATCH/OPTIONS)
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        State,
    },
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, MethodRouter},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use url::Url;

use crate::config::EdgeConfig;
use crate::error::EdgeError;
use crate::health::{aggregate, HealthProbe, HealthReport};
use crate::http::forward::RequestForwarder;
use crate::http::headers::HeaderPolicy;
use crate::http::request::{request_id, ProxyRequest, UuidRequestId};
use crate::http::websocket::StreamRelay;
use crate::lifecycle::{shutdown, ProcessSupervisor};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<RequestForwarder>,
    pub relay: Arc<StreamRelay>,
    pub probe: Arc<HealthProbe>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub policy: Arc<HeaderPolicy>,
    pub backend: Url,
    pub health_path: String,
    pub health_timeout: Duration,
    pub prefix: String,
    pub max_body: usize,
}

/// The front door of the edge.
pub struct EdgeServer {
    router: Router,
    config: EdgeConfig,
}

impl EdgeServer {
    /// Build the server. The supervisor is only read from here on.
    pub fn new(config: EdgeConfig, supervisor: Arc<ProcessSupervisor>) -> Result<Self, EdgeError> {
        let backend = Url::parse(&config.backend.url)?;
        let policy = HeaderPolicy::from_config(&config.headers);

        let forwarder = RequestForwarder::new(
            backend.clone(),
            policy.clone(),
            Duration::from_secs(config.timeouts.forward_secs),
        );
        let relay = StreamRelay::new(&backend, Duration::from_secs(config.timeouts.connect_secs))?;
        let probe = HealthProbe::from_config(&config.readiness);

        let state = AppState {
            forwarder: Arc::new(forwarder),
            relay: Arc::new(relay),
            probe: Arc::new(probe),
            supervisor,
            policy: Arc::new(policy),
            backend,
            health_path: config.readiness.path.clone(),
            health_timeout: Duration::from_secs(config.timeouts.health_secs),
            prefix: config.routing.prefix.trim_end_matches('/').to_string(),
            max_body: config.security.max_body_size,
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &EdgeConfig, state: AppState) -> Router {
        let prefix = state.prefix.clone();
        let health = get(health_handler)
            .post(forward_handler)
            .put(forward_handler)
            .delete(forward_handler)
            .patch(forward_handler)
            .options(forward_handler);

        let mut router = Router::new()
            .route("/", get(root_handler))
            .route(&format!("{}/health", prefix), health)
            .route(&format!("{}/{{*path}}", prefix), forwarding());
        if !prefix.is_empty() {
            router = router.route(&format!("{}/", prefix), forwarding());
        }

        let mut seen = HashSet::new();
        for path in &config.routing.websocket_paths {
            if seen.insert(path.as_str()) {
                router = router.route(path, any(websocket_handler));
            }
        }

        router
            .fallback(not_found)
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// The fully layered router, for serving or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.config.backend.url,
            prefix = %self.config.routing.prefix,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait_for(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Methods the edge forwards.
fn forwarding() -> MethodRouter<AppState> {
    get(forward_handler)
        .post(forward_handler)
        .put(forward_handler)
        .delete(forward_handler)
        .patch(forward_handler)
        .options(forward_handler)
}

async fn root_handler() -> Json<Value> {
    Json(json!({ "message": "Edge proxy", "docs": "/docs" }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" })))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(
        aggregate::report(
            &state.probe,
            &state.backend,
            &state.health_path,
            state.health_timeout,
            &state.supervisor,
        )
        .await,
    )
}

/// Forward one request and map any failure to its client-visible form.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = match ProxyRequest::from_request(request, state.max_body).await {
        Ok(proxy_request) => match state.forwarder.forward(&proxy_request).await {
            Ok(response) => response.into_response(),
            Err(e) => {
                match &e {
                    EdgeError::BackendUnreachable { .. } => {
                        tracing::warn!(request_id = %request_id, method = %method, path = %path, error = %e, "Backend unreachable")
                    }
                    _ => {
                        tracing::error!(request_id = %request_id, method = %method, path = %path, error = %e, "Upstream error")
                    }
                }
                e.into_response()
            }
        },
        Err(e) => {
            tracing::warn!(request_id = %request_id, method = %method, path = %path, error = %e, "Rejected request");
            e.into_response()
        }
    };

    let status = response.status();
    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = status.as_u16(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Request forwarded"
    );
    metrics::record_request(method.as_str(), status.as_u16(), start_time);
    response
}

/// Upgrade requests go to the relay; plain requests under the prefix are
/// forwarded like any other, the rest get the upgrade rejection.
async fn websocket_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request<Body>,
) -> Response {
    match ws {
        Ok(ws) => {
            let path_and_query = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| request.uri().path().to_string());
            let headers = state.policy.filter_handshake(request.headers());
            let relay = state.relay.clone();
            ws.on_upgrade(move |socket| async move {
                relay.run(socket, &path_and_query, headers).await;
            })
        }
        Err(_) if is_under_prefix(&state.prefix, request.uri().path()) => {
            forward_handler(State(state), request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

fn is_under_prefix(prefix: &str, path: &str) -> bool {
    path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}
