//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the edge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for the edge proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgeConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Managed backend process and its base URL.
    pub backend: BackendConfig,

    /// Readiness probe window.
    pub readiness: ReadinessConfig,

    /// Path prefix and WebSocket paths.
    pub routing: RoutingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Header deny-lists for both forwarding directions.
    pub headers: HeaderConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Request hardening.
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8001").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8001".to_string(),
        }
    }
}

/// The single backend behind the edge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL the backend listens on (e.g., "http://127.0.0.1:8002").
    pub url: String,

    /// Spawn and supervise the backend. When false the edge only proxies.
    pub managed: bool,

    /// Abort startup if the backend cannot be launched.
    pub required: bool,

    /// Program and arguments.
    pub command: Vec<String>,

    /// Working directory for the child.
    pub working_dir: String,

    /// File receiving the child's stdout and stderr.
    pub log_path: String,

    /// Environment variable carrying the port the child must bind.
    pub port_env: String,

    /// Extra environment overlay.
    pub env: HashMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8002".to_string(),
            managed: true,
            required: false,
            command: vec![
                "npx".to_string(),
                "tsx".to_string(),
                "src/app.fractal.ts".to_string(),
            ],
            working_dir: ".".to_string(),
            log_path: "logs/backend.log".to_string(),
            port_env: "PORT".to_string(),
            env: HashMap::new(),
        }
    }
}

/// Readiness probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Health path on the backend.
    pub path: String,

    /// Number of probe cycles before giving up.
    pub max_attempts: u32,

    /// Delay before each probe, in seconds.
    pub interval_secs: u64,

    /// Timeout of a single probe, in seconds.
    pub attempt_timeout_secs: u64,

    /// Log progress every N failed attempts.
    pub log_every: u32,
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            path: "/api/health".to_string(),
            max_attempts: 45,
            interval_secs: 1,
            attempt_timeout_secs: 2,
            log_every: 10,
        }
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Every request under this prefix is forwarded.
    pub prefix: String,

    /// Paths accepting WebSocket upgrades, relayed to the same backend path.
    pub websocket_paths: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            prefix: "/api".to_string(),
            websocket_paths: vec!["/api/ws".to_string(), "/ws".to_string()],
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Ceiling for one forwarded request, in seconds.
    /// Generous on purpose: the backend may compute for minutes.
    pub forward_secs: u64,

    /// Timeout of the aggregate health lookup, in seconds.
    pub health_secs: u64,

    /// WebSocket connect timeout towards the backend, in seconds.
    pub connect_secs: u64,

    /// Grace period between SIGTERM and kill, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            forward_secs: 300,
            health_secs: 3,
            connect_secs: 5,
            shutdown_grace_secs: 5,
        }
    }
}

/// Header names removed in each direction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Dropped from the client request before it goes upstream.
    pub strip_request: Vec<String>,

    /// Dropped from the backend response before it goes to the client.
    pub strip_response: Vec<String>,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            strip_request: vec![
                "host".to_string(),
                "content-length".to_string(),
                "transfer-encoding".to_string(),
                "accept-encoding".to_string(),
            ],
            strip_response: vec![
                "content-encoding".to_string(),
                "transfer-encoding".to_string(),
                "content-length".to_string(),
            ],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum forwarded request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: EdgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8001");
        assert_eq!(config.readiness.max_attempts, 45);
        assert_eq!(config.timeouts.forward_secs, 300);
        assert_eq!(config.routing.websocket_paths, vec!["/api/ws", "/ws"]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: EdgeConfig = toml::from_str(
            r#"
            [backend]
            url = "http://127.0.0.1:9000"
            command = ["node", "server.js"]

            [backend.env]
            NODE_ENV = "production"

            [readiness]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.url, "http://127.0.0.1:9000");
        assert_eq!(config.backend.command, vec!["node", "server.js"]);
        assert_eq!(config.backend.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert_eq!(config.backend.port_env, "PORT");
        assert_eq!(config.readiness.max_attempts, 5);
        assert_eq!(config.readiness.interval_secs, 1);
    }
}
