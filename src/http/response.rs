//! Response handling and transformation.
//!
//! # Responsibilities
//! - Turn a raw backend response into a [`ProxyResponse`]
//! - Drop hop-by-hop headers so the transport recomputes them
//! - Render the buffered body back to the client
//!
//! # Design Decisions
//! - Bodies are fully buffered (one long forward timeout, no per-chunk timer)
//! - Content-Length is never copied; hyper derives it from the buffered body

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::http::headers::{Direction, HeaderPolicy};

/// A backend response ready to be sent to the client.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    content_type: Option<HeaderValue>,
}

impl ProxyResponse {
    /// Build from backend parts, applying the response half of `policy`.
    pub fn from_backend(
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
        policy: &HeaderPolicy,
    ) -> Self {
        let content_type = headers.get(header::CONTENT_TYPE).cloned();
        Self {
            status,
            headers: policy.filter(Direction::Response, headers),
            body,
            content_type,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-backend", HeaderValue::from_static("ts"));

        let response = ProxyResponse::from_backend(
            StatusCode::CREATED,
            &headers,
            Bytes::from_static(b"{\"id\":7}"),
            &HeaderPolicy::default(),
        );

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(response.headers().get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(response.headers().get("x-backend").unwrap(), "ts");
        assert_eq!(response.content_type().unwrap(), "application/json");
    }

    #[tokio::test]
    async fn renders_status_and_body() {
        let response = ProxyResponse::from_backend(
            StatusCode::ACCEPTED,
            &HeaderMap::new(),
            Bytes::from_static(b"queued"),
            &HeaderPolicy::default(),
        )
        .into_response();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"queued");
    }
}
