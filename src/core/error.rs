//! # Error Handling
//!
//! One error enum for the whole center, built with `thiserror`. Startup code
//! propagates it with `?` up to the entrypoint, which turns any error into a
//! logged diagnostic and a non-zero exit. Request handlers turn it into an
//! HTTP response through [`IntoResponse`].
//!
//! ## Status mapping
//!
//! Every variant knows its HTTP status code so that proxy failures surface
//! to clients the way a gateway is expected to report them: `502` when the
//! upstream could not be reached, `503` when no instance is available and
//! `504` when the upstream did not answer in time.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result alias used throughout the center.
pub type CenterResult<T> = Result<T, CenterError>;

/// Every failure the center can report.
#[derive(Debug, Error, Clone)]
pub enum CenterError {
    /// The configuration context could not be constructed or is invalid
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The entrypoint was invoked more than once in this process
    #[error("The center has already been started in this process")]
    AlreadyStarted,

    /// A lifecycle transition that the state machine does not allow
    #[error("Invalid lifecycle transition from {from} to {to}")]
    Lifecycle { from: String, to: String },

    /// Registry interaction failed (registration, heartbeat, fetch)
    #[error("Service discovery error: {message}")]
    ServiceDiscovery { message: String },

    /// A route resolved to a service with no available instance
    #[error("Service unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    /// No route matched the request path
    #[error("No route for {path}")]
    RouteNotFound { path: String },

    /// Upstream did not answer within the configured read timeout
    #[error("Upstream timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Request body exceeded `server.max_request_size`
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The client request could not be read
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// Upstream connection or protocol failure
    #[error("Upstream request failed: {message}")]
    Upstream { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binding, ...)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl CenterError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a service discovery error with a custom message
    pub fn service_discovery<S: Into<String>>(message: S) -> Self {
        Self::ServiceDiscovery {
            message: message.into(),
        }
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream error with a custom message
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code reported to clients for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::BadRequest { .. } | Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. }
            | Self::AlreadyStarted
            | Self::Lifecycle { .. }
            | Self::ServiceDiscovery { .. }
            | Self::Internal { .. }
            | Self::Io { .. }
            | Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable error type used in JSON bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::AlreadyStarted => "already_started",
            Self::Lifecycle { .. } => "lifecycle_error",
            Self::ServiceDiscovery { .. } => "service_discovery_error",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Timeout { .. } => "timeout",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::BadRequest { .. } => "bad_request",
            Self::Upstream { .. } => "upstream_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }

    /// Whether the error happened while building the process context.
    ///
    /// Startup failures terminate the process; everything else is reported
    /// per request.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::AlreadyStarted | Self::Lifecycle { .. } | Self::Io { .. }
        )
    }
}

impl From<std::io::Error> for CenterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CenterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CenterError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Upstream client errors split into timeouts and everything else
impl From<reqwest::Error> for CenterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_ms: 0 }
        } else {
            Self::Upstream {
                message: err.to_string(),
            }
        }
    }
}

impl IntoResponse for CenterError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("Invalid port: {}", port)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::CenterError::config(format!($($arg)*))
    };
}
