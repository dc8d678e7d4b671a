//! Shared utilities for integration testing: mock backends and an in-process edge.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use edge_proxy::config::EdgeConfig;
use edge_proxy::lifecycle::{ProcessSupervisor, Shutdown};
use edge_proxy::EdgeServer;

/// Serve `app` on an ephemeral port.
pub async fn spawn_app(app: Router) -> SocketAddr {
    spawn_app_at("127.0.0.1:0".parse().unwrap(), app).await
}

/// Serve `app` on a fixed address, e.g. one the edge already points at.
pub async fn spawn_app_at(addr: SocketAddr, app: Router) -> SocketAddr {
    let listener = TcpListener::bind(addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Edge config pointing at an externally run backend.
pub fn edge_config(backend: SocketAddr) -> EdgeConfig {
    let mut config = EdgeConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.backend.url = format!("http://{}", backend);
    config.backend.managed = false;
    config.timeouts.health_secs = 1;
    config.timeouts.connect_secs = 2;
    config
}

pub struct RunningEdge {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub supervisor: Arc<ProcessSupervisor>,
}

impl RunningEdge {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

/// Start an edge on an ephemeral port with an idle supervisor.
pub async fn start_edge(config: EdgeConfig) -> RunningEdge {
    start_edge_with(config, Arc::new(ProcessSupervisor::new())).await
}

pub async fn start_edge_with(config: EdgeConfig, supervisor: Arc<ProcessSupervisor>) -> RunningEdge {
    let shutdown = Shutdown::new();
    let server = EdgeServer::new(config, supervisor.clone()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    RunningEdge {
        addr,
        shutdown,
        supervisor,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Backend that reports what it received, plus a few fixed endpoints.
pub fn inspecting_backend() -> Router {
    Router::new()
        .route("/api/health", get(|| async { Json(json!({ "status": "healthy" })) }))
        .route("/api/created", post(created))
        .route(
            "/api/compressed",
            get(compressible).layer(CompressionLayer::new()),
        )
        .route("/api/ws", any(ws_echo))
        .route("/ws", any(ws_echo))
        .route("/api/ws/short", any(ws_close_after_two))
        .route("/api/ws/info", any(ws_info))
        .route("/api/{*path}", any(inspect))
}

async fn inspect(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let mut seen = Map::new();
    for (name, value) in &headers {
        seen.insert(
            name.as_str().to_string(),
            Value::String(value.to_str().unwrap_or_default().to_string()),
        );
    }
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": seen,
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Large enough to clear the compression size threshold.
pub fn compressible_payload() -> Value {
    let items: Vec<Value> = (0..64)
        .map(|i| json!({ "id": i, "label": format!("item-{}", i) }))
        .collect();
    json!({ "ok": true, "items": items })
}

async fn compressible() -> Json<Value> {
    Json(compressible_payload())
}

async fn created(body: Bytes) -> Response {
    let mut response = (
        StatusCode::CREATED,
        [("x-backend", "mock")],
        Json(json!({ "created": true, "size": body.len() })),
    )
        .into_response();
    // Lies about encoding; the edge must not pass it on.
    response
        .headers_mut()
        .insert("content-encoding", "identity".parse().unwrap());
    response
}

async fn ws_echo(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(text) => {
                    let reply = format!("echo:{}", text.as_str());
                    if socket.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
                Message::Binary(data) => {
                    if socket.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
}

async fn ws_close_after_two(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let mut seen = 0;
        while let Some(Ok(message)) = socket.recv().await {
            if let Message::Text(text) = message {
                seen += 1;
                let _ = socket
                    .send(Message::Text(format!("echo:{}", text.as_str()).into()))
                    .await;
                if seen == 2 {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    })
}

async fn ws_info(ws: WebSocketUpgrade, uri: Uri, headers: HeaderMap) -> Response {
    let info = json!({
        "query": uri.query(),
        "authorization": headers
            .get("authorization")
            .and_then(|v| v.to_str().ok()),
        "host": headers.get("host").and_then(|v| v.to_str().ok()),
    })
    .to_string();
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let _ = socket.send(Message::Text(info.into())).await;
        while let Some(Ok(message)) = socket.recv().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    })
}
