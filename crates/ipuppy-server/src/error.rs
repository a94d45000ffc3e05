//! Error types for the iPuppy server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The path names a kernel this server does not manage.
    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    /// Malformed request body.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Kernel or execution error.
    #[error("{0}")]
    Core(#[from] ipuppy_core::Error),

    /// Listen address could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// HTTP status reported for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::KernelNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Core(ipuppy_core::Error::KernelUnavailable) => StatusCode::CONFLICT,
            ServerError::Core(_) | ServerError::InvalidAddress(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServerError::KernelNotFound("k".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Core(ipuppy_core::Error::KernelUnavailable).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::Core(ipuppy_core::Error::StartupCrash {
                status: "exit status: 1".into(),
                stderr: "No module named ipykernel".into(),
            })
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServerError::BadRequest("missing code".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_startup_error_message_keeps_stderr() {
        let err = ServerError::Core(ipuppy_core::Error::StartupCrash {
            status: "exit status: 1".into(),
            stderr: "No module named ipykernel".into(),
        });
        assert!(err.to_string().contains("No module named ipykernel"));
    }
}
