//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and how port
//! errors surface as HTTP responses.

use axum::http::StatusCode;
use clipfeed_core::llm::LlmError;
use clipfeed_core::ports::PortError;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying database migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Maps a port error to the status code and message a handler returns.
pub fn port_error_response(error: &PortError) -> (StatusCode, String) {
    match error {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        PortError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        PortError::Llm(LlmError::RequestEncoding(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
        PortError::Llm(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
        PortError::Unexpected(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "An unexpected error occurred".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_errors_map_to_status_codes() {
        assert_eq!(
            port_error_response(&PortError::NotFound("x".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            port_error_response(&PortError::InvalidInput("x".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            port_error_response(&PortError::Llm(LlmError::Api("overloaded".into()))).0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            port_error_response(&PortError::Llm(LlmError::RequestEncoding("x".into()))).0,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn unexpected_errors_hide_their_details() {
        let (status, body) = port_error_response(&PortError::Unexpected("pool timed out".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("pool"));
    }
}
