//! Error taxonomy of the edge.
//!
//! Every failure on the request path ends up as an [`EdgeError`], which knows
//! how to render itself for the client. Nothing is allowed to escape a handler
//! as a panic.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EdgeError {
    /// The child process could not be spawned.
    #[error("failed to launch backend `{command}`: {source}")]
    LaunchFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called on a supervisor that already owns a process.
    #[error("backend process already started")]
    AlreadyStarted,

    /// The readiness probe exhausted its attempts.
    #[error("backend not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    /// No connection could be established to the backend.
    #[error("backend unavailable at {url}: {detail}")]
    BackendUnreachable { url: String, detail: String },

    /// Any other failure while talking to the backend.
    #[error("{0}")]
    UpstreamError(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Raised while building the server or the relay from config, before any
    /// request is accepted; handlers never produce it. Validation rejects the
    /// same URLs up front, so it only surfaces for unvalidated configs.
    #[error("invalid backend url: {0}")]
    InvalidBackendUrl(#[from] url::ParseError),
}

impl EdgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EdgeError::BackendUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EdgeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            EdgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            EdgeError::BackendUnreachable { url, .. } => {
                json!({ "error": "Backend unavailable", "url": url })
            }
            EdgeError::PayloadTooLarge { limit } => {
                json!({ "error": "Payload too large", "limit": limit })
            }
            EdgeError::BadRequest(detail) => json!({ "error": "Bad request", "detail": detail }),
            other => json!({ "error": "Proxy error", "detail": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
