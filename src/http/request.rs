//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4)
//! - Capture the inbound request as an immutable [`ProxyRequest`]
//! - Read the body only for methods that carry one, within size limits
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Declared Content-Length checked before the body is read

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, Method, Request},
};
use http_body_util::LengthLimitError;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::error::EdgeError;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates `x-request-id` values for requests arriving without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Request id carried by `headers`, or "unknown".
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Only these methods have their body forwarded.
pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// One inbound request, captured for a single forwarding call.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl ProxyRequest {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: Option<String>,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Self {
        // Non-body methods never carry a payload, whatever the caller passed.
        let body = if carries_body(&method) { body } else { None };
        Self {
            method,
            path: path.into(),
            query: query.filter(|q| !q.is_empty()),
            headers,
            body,
        }
    }

    /// Capture an axum request. The body stream is drained only for
    /// POST/PUT/PATCH; for other methods it is dropped unread.
    pub async fn from_request(request: Request<Body>, max_body: usize) -> Result<Self, EdgeError> {
        let (parts, body) = request.into_parts();

        let body = if carries_body(&parts.method) {
            if declared_length(&parts.headers).is_some_and(|len| len > max_body) {
                return Err(EdgeError::PayloadTooLarge { limit: max_body });
            }
            let bytes = axum::body::to_bytes(body, max_body).await.map_err(|e| {
                let cause = e.into_inner();
                if cause.is::<LengthLimitError>() {
                    EdgeError::PayloadTooLarge { limit: max_body }
                } else {
                    EdgeError::BadRequest(format!("failed to read request body: {}", cause))
                }
            })?;
            Some(bytes)
        } else {
            None
        };

        Ok(Self::new(
            parts.method,
            parts.uri.path(),
            parts.uri.query().map(str::to_string),
            parts.headers,
            body,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Path plus verbatim query string.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_methods() {
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PUT));
        assert!(carries_body(&Method::PATCH));
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::DELETE));
        assert!(!carries_body(&Method::OPTIONS));
    }

    #[test]
    fn get_body_is_discarded() {
        let req = ProxyRequest::new(
            Method::GET,
            "/api/items",
            None,
            HeaderMap::new(),
            Some(Bytes::from_static(b"ignored")),
        );
        assert!(req.body().is_none());
    }

    #[test]
    fn query_is_kept_verbatim() {
        let req = ProxyRequest::new(
            Method::GET,
            "/api/search",
            Some("q=a%20b&tags=x&tags=y".to_string()),
            HeaderMap::new(),
            None,
        );
        assert_eq!(req.path_and_query(), "/api/search?q=a%20b&tags=x&tags=y");

        let bare = ProxyRequest::new(Method::GET, "/api/x", Some(String::new()), HeaderMap::new(), None);
        assert_eq!(bare.path_and_query(), "/api/x");
    }

    #[tokio::test]
    async fn from_request_reads_post_body() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/items?dry=1")
            .body(Body::from("{\"a\":1}"))
            .unwrap();

        let req = ProxyRequest::from_request(request, 1024).await.unwrap();
        assert_eq!(req.path(), "/api/items");
        assert_eq!(req.query(), Some("dry=1"));
        assert_eq!(req.body().unwrap().as_ref(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn from_request_rejects_declared_oversize() {
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/api/items")
            .header(header::CONTENT_LENGTH, "4096")
            .body(Body::from(vec![0u8; 4096]))
            .unwrap();

        let err = ProxyRequest::from_request(request, 1024).await.unwrap_err();
        assert!(matches!(err, EdgeError::PayloadTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn from_request_rejects_undeclared_oversize() {
        // no content-length, so only the read limit can catch it
        let chunks = (0..2).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 800])));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/items")
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        let err = ProxyRequest::from_request(request, 1024).await.unwrap_err();
        assert!(matches!(err, EdgeError::PayloadTooLarge { limit: 1024 }));
    }

    #[test]
    fn request_id_falls_back_to_unknown() {
        assert_eq!(request_id(&HeaderMap::new()), "unknown");
    }
}
