//! Edge proxy: a single public entry point in front of one managed backend.

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::EdgeConfig;
pub use error::EdgeError;
pub use http::EdgeServer;
pub use lifecycle::Shutdown;
