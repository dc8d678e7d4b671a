//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts > 0, timeouts > 0)
//! - Check the backend URL is usable for both HTTP and WebSocket legs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EdgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use url::Url;

use crate::config::schema::EdgeConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic rule and collect all violations.
pub fn validate_config(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    match Url::parse(&config.backend.url) {
        Ok(url) => {
            if url.scheme() != "http" {
                errors.push(ValidationError::new(
                    "backend.url",
                    format!("unsupported scheme '{}'", url.scheme()),
                ));
            }
            if url.host_str().is_none() {
                errors.push(ValidationError::new("backend.url", "missing host"));
            }
        }
        Err(e) => errors.push(ValidationError::new("backend.url", e.to_string())),
    }

    if config.backend.managed {
        if config.backend.command.first().map_or(true, |p| p.is_empty()) {
            errors.push(ValidationError::new(
                "backend.command",
                "a managed backend needs a program to run",
            ));
        }
        if config.backend.port_env.is_empty() {
            errors.push(ValidationError::new("backend.port_env", "must not be empty"));
        }
    }

    if !config.routing.prefix.starts_with('/') {
        errors.push(ValidationError::new("routing.prefix", "must start with '/'"));
    }
    for path in &config.routing.websocket_paths {
        if !path.starts_with('/') || path == "/" {
            errors.push(ValidationError::new(
                "routing.websocket_paths",
                format!("'{}' must be a path below '/'", path),
            ));
        }
    }

    if !config.readiness.path.starts_with('/') {
        errors.push(ValidationError::new("readiness.path", "must start with '/'"));
    }
    if config.readiness.max_attempts == 0 {
        errors.push(ValidationError::new("readiness.max_attempts", "must be > 0"));
    }
    if config.readiness.attempt_timeout_secs == 0 {
        errors.push(ValidationError::new("readiness.attempt_timeout_secs", "must be > 0"));
    }

    for (field, value) in [
        ("timeouts.forward_secs", config.timeouts.forward_secs),
        ("timeouts.health_secs", config.timeouts.health_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&EdgeConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = EdgeConfig::default();
        config.backend.url = "ftp://example.com".to_string();
        config.backend.command.clear();
        config.routing.prefix = "api".to_string();
        config.readiness.max_attempts = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "backend.url",
                "backend.command",
                "routing.prefix",
                "readiness.max_attempts"
            ]
        );
    }

    #[test]
    fn unmanaged_backend_needs_no_command() {
        let mut config = EdgeConfig::default();
        config.backend.managed = false;
        config.backend.command.clear();
        assert!(validate_config(&config).is_ok());
    }
}
