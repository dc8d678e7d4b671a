//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, dispatch)
//!     → request.rs (buffer body, enforce size limit)
//!     → headers.rs (strip hop/recomputed headers)
//!     → forward.rs (one attempt against the backend)
//!     → response.rs (sanitize, recompute length)
//!     → Send to client
//!
//! WebSocket upgrade
//!     → server.rs (accept client handshake)
//!     → websocket.rs (dial backend, pump frames both ways)
//! ```

pub mod forward;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::RequestForwarder;
pub use headers::{Direction, HeaderPolicy};
pub use request::{ProxyRequest, X_REQUEST_ID};
pub use response::ProxyResponse;
pub use server::EdgeServer;
pub use websocket::{RelayReport, StreamRelay};
