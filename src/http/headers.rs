//! Header sanitizing policy.
//!
//! # Responsibilities
//! - Strip headers the transport recomputes (length, encoding, host)
//! - Apply one named policy to both HTTP forwarding and WebSocket relaying
//!
//! # Design Decisions
//! - Deny-lists, not allow-lists: unknown headers pass through untouched
//! - Matching is case-insensitive via `HeaderName` normalisation

use axum::http::{header::HeaderName, HeaderMap};

use crate::config::HeaderConfig;

/// Headers the WebSocket client library negotiates itself.
const HANDSHAKE_HEADERS: [&str; 7] = [
    "connection",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-accept",
    "sec-websocket-extensions",
    "sec-websocket-protocol",
];

/// Which way a header set is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → backend.
    Request,
    /// Backend → client.
    Response,
}

#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    strip_request: Vec<HeaderName>,
    strip_response: Vec<HeaderName>,
}

impl HeaderPolicy {
    pub fn from_config(config: &HeaderConfig) -> Self {
        Self {
            strip_request: parse_names(&config.strip_request),
            strip_response: parse_names(&config.strip_response),
        }
    }

    pub fn denied(&self, direction: Direction) -> &[HeaderName] {
        match direction {
            Direction::Request => &self.strip_request,
            Direction::Response => &self.strip_response,
        }
    }

    pub fn allows(&self, direction: Direction, name: &HeaderName) -> bool {
        !self.denied(direction).contains(name)
    }

    /// Copy every allowed header, keeping repeated values.
    pub fn filter(&self, direction: Direction, headers: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            if self.allows(direction, name) {
                out.append(name.clone(), value.clone());
            }
        }
        out
    }

    /// Request headers safe to replay on an outbound WebSocket handshake.
    pub fn filter_handshake(&self, headers: &HeaderMap) -> HeaderMap {
        let mut out = self.filter(Direction::Request, headers);
        for name in HANDSHAKE_HEADERS {
            out.remove(name);
        }
        out
    }
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self::from_config(&HeaderConfig::default())
    }
}

fn parse_names(names: &[String]) -> Vec<HeaderName> {
    names
        .iter()
        .filter_map(|raw| match HeaderName::from_bytes(raw.trim().as_bytes()) {
            Ok(name) => Some(name),
            Err(_) => {
                tracing::warn!(header = %raw, "Ignoring invalid header name in policy");
                None
            }
        })
        .collect()
}
